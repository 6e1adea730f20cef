//! Shared test infrastructure: a recording transport for driving the
//! connection manager by hand, and an in-process WebSocket server.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    accept_async,
    tungstenite::{
        protocol::{frame::coding::CloseCode, CloseFrame},
        Message as WsMessage,
    },
};

use realtime_link::client::{
    ConnectionManager, ConnectionSnapshot, Generation, Transport, TransportEvent, TransportEventKind,
};
use realtime_link::error::Result;
use realtime_link::protocol::{self, Frame};

/// Token the mock server rejects with close code 4001
pub const REJECTED_TOKEN: &str = "reject-me";

// ─────────────────────────────────────────────────────────────────
// Recording transport
// ─────────────────────────────────────────────────────────────────

/// Transport that records calls and never touches the network
#[derive(Debug, Default)]
pub struct RecordingTransport {
    pub opened: Vec<Generation>,
    pub sent: Vec<String>,
    pub closes: Vec<bool>,
    /// Number of upcoming sends to refuse
    pub fail_sends: usize,
}

impl RecordingTransport {
    /// Sent frames, decoded
    pub fn frames(&self) -> Vec<Frame> {
        self.sent
            .iter()
            .map(|text| protocol::decode(text, 0).unwrap())
            .collect()
    }

    pub fn kinds(&self) -> Vec<String> {
        self.frames().into_iter().map(|f| f.kind).collect()
    }

    pub fn clear(&mut self) {
        self.sent.clear();
    }
}

impl Transport for RecordingTransport {
    fn open(&mut self, generation: Generation, _url: &str, _protocols: &[String]) {
        self.opened.push(generation);
    }

    fn send(&mut self, text: String) -> Result<()> {
        if self.fail_sends > 0 {
            self.fail_sends -= 1;
            return Err(realtime_link::error::Error::transport("write refused"));
        }
        self.sent.push(text);
        Ok(())
    }

    fn close(&mut self, clean: bool) {
        self.closes.push(clean);
    }
}

pub type TestManager = ConnectionManager<RecordingTransport>;

/// Deliver `kind` from the manager's current transport
pub fn feed(mgr: &mut TestManager, kind: TransportEventKind, now: u64) {
    let event = TransportEvent::new(mgr.generation(), kind);
    mgr.handle_event(event, now);
}

pub fn feed_open(mgr: &mut TestManager, now: u64) {
    feed(mgr, TransportEventKind::Opened, now);
}

pub fn feed_close(mgr: &mut TestManager, code: Option<u16>, now: u64) {
    feed(
        mgr,
        TransportEventKind::Closed {
            code,
            reason: String::new(),
        },
        now,
    );
}

pub fn feed_text(mgr: &mut TestManager, text: &str, now: u64) {
    feed(mgr, TransportEventKind::Text(text.to_string()), now);
}

// ─────────────────────────────────────────────────────────────────
// Mock realtime server
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum ServerCommand {
    Push(String),
    Drop,
}

/// In-process realtime endpoint.
///
/// Confirms every connection, answers pings, rejects [`REJECTED_TOKEN`],
/// and records every frame it receives.
pub struct MockServer {
    addr: SocketAddr,
    received: Arc<Mutex<Vec<Value>>>,
    accepted: Arc<AtomicUsize>,
    commands: broadcast::Sender<ServerCommand>,
    accept_task: JoinHandle<()>,
}

impl MockServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let accepted = Arc::new(AtomicUsize::new(0));
        let (commands, _) = broadcast::channel(64);

        let accept_task = tokio::spawn({
            let received = received.clone();
            let accepted = accepted.clone();
            let commands = commands.clone();
            async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let n = accepted.fetch_add(1, Ordering::SeqCst) + 1;
                    tokio::spawn(serve(stream, n, received.clone(), commands.subscribe()));
                }
            }
        });

        Self {
            addr,
            received,
            accepted,
            commands,
            accept_task,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/realtime", self.addr)
    }

    /// Connections accepted so far
    pub fn connections(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    pub fn received(&self) -> Vec<Value> {
        self.received.lock().clone()
    }

    /// Received frames of `kind`
    pub fn received_kind(&self, kind: &str) -> Vec<Value> {
        self.received()
            .into_iter()
            .filter(|f| f["kind"] == kind)
            .collect()
    }

    /// Send a frame to every connected client
    pub fn push(&self, frame: Value) {
        let _ = self.commands.send(ServerCommand::Push(frame.to_string()));
    }

    /// Drop every connection without a close handshake
    pub fn drop_connections(&self) {
        let _ = self.commands.send(ServerCommand::Drop);
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn serve(
    stream: TcpStream,
    n: usize,
    received: Arc<Mutex<Vec<Value>>>,
    mut commands: broadcast::Receiver<ServerCommand>,
) {
    let Ok(ws_stream) = accept_async(stream).await else {
        return;
    };
    let (mut write, mut read) = ws_stream.split();

    let confirmed = json!({
        "kind": "connection_confirmed",
        "data": { "connectionId": format!("conn-{}", n) },
    });
    if write.send(WsMessage::Text(confirmed.to_string())).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            message = read.next() => match message {
                Some(Ok(WsMessage::Text(text))) => {
                    let Ok(frame) = serde_json::from_str::<Value>(&text) else {
                        continue;
                    };
                    received.lock().push(frame.clone());

                    match frame["kind"].as_str() {
                        Some("ping") => {
                            let pong = json!({
                                "kind": "pong",
                                "data": { "timestamp": frame["timestamp"] },
                            });
                            let _ = write.send(WsMessage::Text(pong.to_string())).await;
                        }
                        Some("authenticate") if frame["data"]["token"] == REJECTED_TOKEN => {
                            let close = CloseFrame {
                                code: CloseCode::from(4001),
                                reason: "invalid token".into(),
                            };
                            let _ = write.send(WsMessage::Close(Some(close))).await;
                            return;
                        }
                        _ => {}
                    }
                }
                Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => return,
                Some(Ok(_)) => {}
            },

            command = commands.recv() => match command {
                Ok(ServerCommand::Push(text)) => {
                    let _ = write.send(WsMessage::Text(text)).await;
                }
                Ok(ServerCommand::Drop) => return,
                Err(_) => {}
            },
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Waiting helpers
// ─────────────────────────────────────────────────────────────────

/// Wait until the snapshot satisfies `predicate`, or panic after `limit`
pub async fn wait_for_state<F>(
    rx: &mut watch::Receiver<ConnectionSnapshot>,
    limit: Duration,
    predicate: F,
) -> ConnectionSnapshot
where
    F: Fn(&ConnectionSnapshot) -> bool,
{
    let result = tokio::time::timeout(limit, async {
        loop {
            {
                let snapshot = rx.borrow_and_update();
                if predicate(&snapshot) {
                    return snapshot.clone();
                }
            }
            rx.changed().await.unwrap();
        }
    })
    .await;

    match result {
        Ok(snapshot) => snapshot,
        Err(_) => panic!("state condition not reached, last: {:?}", rx.borrow()),
    }
}

/// Poll `check` every 10ms until it holds, or panic after `limit`
pub async fn eventually<F>(limit: Duration, what: &str, check: F)
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + limit;
    while !check() {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// An address nothing listens on
pub async fn closed_port_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("ws://{}/realtime", addr)
}
