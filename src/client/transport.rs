//! Transport seam
//!
//! The connection manager talks to the network only through [`Transport`].
//! Each opened transport is tagged with a generation; events report the
//! generation they came from so late events of a replaced socket can be
//! recognised and dropped.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest,
        handshake::client::Request,
        http::HeaderValue,
        protocol::{frame::coding::CloseCode, CloseFrame},
        Message as WsMessage,
    },
};
use tracing::{debug, error, info, trace, warn};

use crate::error::{Error, Result};

/// Identifies one opened transport
pub type Generation = u64;

/// Something a transport reported
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEventKind {
    /// Handshake finished; frames may flow
    Opened,
    /// Text message received
    Text(String),
    /// Binary message received
    Binary(Vec<u8>),
    /// Text frames accepted by `send` that never reached the wire; a
    /// `Closed` follows
    Unsent(Vec<String>),
    /// Socket-level failure; a `Closed` follows
    Error(String),
    /// The transport is gone
    Closed { code: Option<u16>, reason: String },
}

/// An event tagged with the transport that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct TransportEvent {
    pub generation: Generation,
    pub kind: TransportEventKind,
}

impl TransportEvent {
    pub fn new(generation: Generation, kind: TransportEventKind) -> Self {
        Self { generation, kind }
    }
}

/// Duplex connection used by the connection manager
pub trait Transport: Send {
    /// Start opening a connection; progress arrives as events tagged `generation`
    fn open(&mut self, generation: Generation, url: &str, protocols: &[String]);

    /// Queue a text frame on the open connection. A frame accepted here
    /// that the connection fails to write is reported back in
    /// [`TransportEventKind::Unsent`].
    fn send(&mut self, text: String) -> Result<()>;

    /// Close the current connection. `clean` requests a normal close
    /// handshake; otherwise the connection is dropped.
    fn close(&mut self, clean: bool);
}

// ─────────────────────────────────────────────────────────────────
// WebSocket transport
// ─────────────────────────────────────────────────────────────────

enum SocketCommand {
    Send(String),
    Close,
}

struct ActiveSocket {
    generation: Generation,
    commands: mpsc::UnboundedSender<SocketCommand>,
    task: JoinHandle<()>,
}

/// [`Transport`] backed by `tokio-tungstenite`, one task per connection
pub struct SocketTransport {
    events: mpsc::UnboundedSender<TransportEvent>,
    connect_timeout: Duration,
    active: Option<ActiveSocket>,
}

impl SocketTransport {
    /// Events from every socket this transport opens go to `events`
    pub fn new(events: mpsc::UnboundedSender<TransportEvent>, connect_timeout: Duration) -> Self {
        Self {
            events,
            connect_timeout,
            active: None,
        }
    }
}

impl Transport for SocketTransport {
    fn open(&mut self, generation: Generation, url: &str, protocols: &[String]) {
        self.close(false);

        let (commands, command_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_socket(
            generation,
            url.to_string(),
            protocols.to_vec(),
            self.connect_timeout,
            command_rx,
            self.events.clone(),
        ));

        self.active = Some(ActiveSocket {
            generation,
            commands,
            task,
        });
    }

    fn send(&mut self, text: String) -> Result<()> {
        let active = self
            .active
            .as_ref()
            .ok_or_else(|| Error::transport("no open socket"))?;
        active
            .commands
            .send(SocketCommand::Send(text))
            .map_err(|_| Error::transport("socket task has stopped"))
    }

    fn close(&mut self, clean: bool) {
        let Some(active) = self.active.take() else {
            return;
        };
        debug!(generation = active.generation, clean, "Closing socket");
        if !clean || active.commands.send(SocketCommand::Close).is_err() {
            active.task.abort();
        }
    }
}

impl Drop for SocketTransport {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            active.task.abort();
        }
    }
}

fn build_request(url: &str, protocols: &[String]) -> Result<Request> {
    let mut request = url.into_client_request()?;
    if !protocols.is_empty() {
        let value = HeaderValue::from_str(&protocols.join(", "))
            .map_err(|e| Error::config_field_invalid("protocols", e.to_string()))?;
        request.headers_mut().insert("Sec-WebSocket-Protocol", value);
    }
    Ok(request)
}

/// Drive one WebSocket connection until it closes
async fn run_socket(
    generation: Generation,
    url: String,
    protocols: Vec<String>,
    connect_timeout: Duration,
    mut commands: mpsc::UnboundedReceiver<SocketCommand>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let emit = |kind: TransportEventKind| {
        let _ = events.send(TransportEvent::new(generation, kind));
    };
    let fail = |message: String| failure(message).into_iter().for_each(&emit);

    let request = match build_request(&url, &protocols) {
        Ok(r) => r,
        Err(e) => {
            error!(url = %url, error = %e, "Cannot build handshake request");
            fail(e.to_string());
            return;
        }
    };

    info!(url = %url, generation, "Connecting");

    let connecting = tokio::time::timeout(connect_timeout, connect_async(request));
    tokio::pin!(connecting);

    let ws_stream = loop {
        tokio::select! {
            result = &mut connecting => match result {
                Ok(Ok((stream, _response))) => break stream,
                Ok(Err(e)) => {
                    warn!(url = %url, error = %e, "Connection failed");
                    fail(format!("Connection failed: {}", e));
                    return;
                }
                Err(_) => {
                    warn!(url = %url, timeout_ms = connect_timeout.as_millis() as u64, "Connection timed out");
                    fail(format!("Connection timed out after {}ms", connect_timeout.as_millis()));
                    return;
                }
            },
            command = commands.recv() => match command {
                Some(SocketCommand::Send(_)) => warn!(generation, "Dropping frame sent before open"),
                Some(SocketCommand::Close) | None => {
                    debug!(generation, "Close requested while connecting");
                    return;
                }
            },
        }
    };

    info!(generation, "WebSocket connection established");
    emit(TransportEventKind::Opened);

    let (mut write, mut read) = ws_stream.split();
    let mut unsent = Vec::new();

    let terminal = loop {
        tokio::select! {
            message = read.next() => match message {
                Some(Ok(WsMessage::Text(text))) => emit(TransportEventKind::Text(text)),
                Some(Ok(WsMessage::Binary(data))) => emit(TransportEventKind::Binary(data)),
                Some(Ok(WsMessage::Ping(data))) => {
                    if let Err(e) = write.send(WsMessage::Pong(data)).await {
                        break failure(e.to_string());
                    }
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (Some(u16::from(f.code)), f.reason.to_string()))
                        .unwrap_or((None, String::new()));
                    info!(generation, code = ?code, reason = %reason, "Server closed connection");
                    break vec![TransportEventKind::Closed { code, reason }];
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!(generation, error = %e, "WebSocket error");
                    break failure(e.to_string());
                }
                None => {
                    info!(generation, "WebSocket stream ended");
                    break vec![TransportEventKind::Closed { code: None, reason: "stream ended".to_string() }];
                }
            },

            command = commands.recv() => match command {
                Some(SocketCommand::Send(text)) => {
                    trace!(generation, bytes = text.len(), "Sending frame");
                    if let Err(e) = write.send(WsMessage::Text(text.clone())).await {
                        warn!(generation, error = %e, "Send failed");
                        unsent.push(text);
                        break failure(e.to_string());
                    }
                }
                Some(SocketCommand::Close) | None => {
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: "client disconnect".into(),
                    };
                    let _ = write.send(WsMessage::Close(Some(frame))).await;
                    debug!(generation, "Socket closed by client");
                    return;
                }
            },
        }
    };

    commands.close();
    while let Ok(command) = commands.try_recv() {
        if let SocketCommand::Send(text) = command {
            unsent.push(text);
        }
    }
    if !unsent.is_empty() {
        warn!(generation, frames = unsent.len(), "Returning frames that were never written");
        emit(TransportEventKind::Unsent(unsent));
    }
    for kind in terminal {
        emit(kind);
    }
}

/// Events reporting a socket failure
fn failure(message: String) -> Vec<TransportEventKind> {
    vec![
        TransportEventKind::Error(message.clone()),
        TransportEventKind::Closed {
            code: None,
            reason: message,
        },
    ]
}
