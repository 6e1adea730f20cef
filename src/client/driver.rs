//! Async client handle
//!
//! [`RealtimeClient`] wraps a [`ConnectionManager`] over a [`SocketTransport`]
//! and runs it on a tokio task. The task wakes on transport events, on the
//! manager's earliest timer deadline, and whenever a caller changes
//! something through the handle.

use std::future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::config::ClientConfig;
use super::manager::{ConnectionManager, SendOutcome};
use super::router::{Listener, ListenerId};
use super::state::{ClientEvent, ConnectionSnapshot};
use super::transport::{SocketTransport, TransportEvent};
use crate::error::Result;
use crate::protocol::Frame;

/// Capacity of the event broadcast; slow receivers see `Lagged`
const EVENT_CAPACITY: usize = 256;

// ─────────────────────────────────────────────────────────────────
// Clock
// ─────────────────────────────────────────────────────────────────

/// Maps the manager's epoch milliseconds onto tokio's clock, so a paused
/// test runtime drives heartbeats and backoff too
#[derive(Debug, Clone, Copy)]
struct Clock {
    origin: Instant,
    origin_ms: u64,
}

impl Clock {
    fn new() -> Self {
        Self {
            origin: Instant::now(),
            origin_ms: chrono::Utc::now().timestamp_millis().max(0) as u64,
        }
    }

    fn now_ms(&self) -> u64 {
        self.origin_ms + self.origin.elapsed().as_millis() as u64
    }

    fn instant_at(&self, ms: u64) -> Instant {
        self.origin + Duration::from_millis(ms.saturating_sub(self.origin_ms))
    }
}

// ─────────────────────────────────────────────────────────────────
// Shared state
// ─────────────────────────────────────────────────────────────────

struct Inner {
    client_id: Uuid,
    manager: Mutex<ConnectionManager<SocketTransport>>,
    wake: Notify,
    clock: Clock,
    state_tx: watch::Sender<ConnectionSnapshot>,
    events_tx: broadcast::Sender<ClientEvent>,
}

impl Inner {
    /// Run `f` against the manager, then publish what it produced.
    ///
    /// The lock is released before anything is published.
    fn apply<R>(&self, f: impl FnOnce(&mut ConnectionManager<SocketTransport>, u64) -> R) -> R {
        let now = self.clock.now_ms();
        let (result, events, snapshot) = {
            let mut manager = self.manager.lock();
            let result = f(&mut manager, now);
            (result, manager.drain_events(), manager.snapshot())
        };
        self.publish(events, snapshot);
        result
    }

    /// Same as [`apply`](Self::apply), and wake the driver to re-read deadlines
    fn update<R>(&self, f: impl FnOnce(&mut ConnectionManager<SocketTransport>, u64) -> R) -> R {
        let result = self.apply(f);
        self.wake.notify_one();
        result
    }

    fn publish(&self, events: Vec<ClientEvent>, snapshot: ConnectionSnapshot) {
        self.state_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
        for event in events {
            if let ClientEvent::StateChanged(state) = &event {
                info!(state = %state, "Connection state changed");
            }
            // No receivers is fine
            let _ = self.events_tx.send(event);
        }
    }
}

/// Aborts the driver when the last handle goes away
struct DriverGuard {
    task: JoinHandle<()>,
}

impl Drop for DriverGuard {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ─────────────────────────────────────────────────────────────────
// Client handle
// ─────────────────────────────────────────────────────────────────

/// Handle to one realtime connection. Cheap to clone; every clone drives
/// the same connection.
#[derive(Clone)]
pub struct RealtimeClient {
    inner: Arc<Inner>,
    guard: Arc<DriverGuard>,
}

impl RealtimeClient {
    /// Create the client and spawn its driver. Must be called inside a
    /// tokio runtime. Connects immediately when `auto_connect` is set.
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;

        let client_id = Uuid::new_v4();
        let auto_connect = config.auto_connect;
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let transport = SocketTransport::new(transport_tx, config.connect_timeout);
        let manager = ConnectionManager::new(config, transport);
        let (state_tx, _) = watch::channel(manager.snapshot());
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);

        let inner = Arc::new(Inner {
            client_id,
            manager: Mutex::new(manager),
            wake: Notify::new(),
            clock: Clock::new(),
            state_tx,
            events_tx,
        });

        let span = info_span!("realtime", client_id = %client_id);
        let task = tokio::spawn(drive(inner.clone(), transport_rx).instrument(span));

        let client = Self {
            inner,
            guard: Arc::new(DriverGuard { task }),
        };
        if auto_connect {
            client.connect();
        }
        Ok(client)
    }

    pub fn client_id(&self) -> Uuid {
        self.inner.client_id
    }

    /// Open the connection if it is not already open or opening
    pub fn connect(&self) {
        self.inner.update(|m, now| m.connect(now));
    }

    /// Close the connection and cancel every timer
    pub fn disconnect(&self) {
        self.inner.update(|m, now| m.disconnect(now));
    }

    /// Send `data` on `kind`, queueing it while disconnected.
    ///
    /// Returns false only when the frame had to be queued and the queue was
    /// full.
    pub fn send_message(&self, kind: &str, data: Value) -> bool {
        self.send_frame(Frame::new(kind).with_data(data)).is_ok()
    }

    /// Send a prepared frame
    pub fn send_frame(&self, frame: Frame) -> Result<SendOutcome> {
        self.inner.update(|m, now| m.send_message(frame, now))
    }

    /// Register `listener` for frames on `channel`.
    ///
    /// The listener stays registered until [`Subscription::unsubscribe`],
    /// [`unsubscribe`](Self::unsubscribe) or
    /// [`clear_subscriptions`](Self::clear_subscriptions); dropping the
    /// returned handle does not remove it.
    pub fn subscribe<F>(&self, channel: &str, listener: F) -> Subscription
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let listener: Listener = Arc::new(listener);
        let id = self.inner.update(|m, now| m.subscribe(channel, listener, now));
        Subscription {
            inner: Arc::downgrade(&self.inner),
            channel: channel.to_string(),
            id,
        }
    }

    /// Remove every listener of `channel`
    pub fn unsubscribe(&self, channel: &str) -> bool {
        self.inner.update(|m, now| m.unsubscribe(channel, now))
    }

    pub fn clear_subscriptions(&self) {
        self.inner.update(|m, now| m.clear_subscriptions(now));
    }

    /// Set or clear the session token sent on every open
    pub fn set_token(&self, token: Option<String>) {
        self.inner.update(|m, now| m.set_token(token, now));
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.inner.manager.lock().snapshot()
    }

    /// Receiver that always holds the latest snapshot
    pub fn watch_state(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.inner.state_tx.subscribe()
    }

    /// Receiver for events emitted from now on
    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.events_tx.subscribe()
    }

    /// Listener count on `channel`
    pub fn ref_count(&self, channel: &str) -> usize {
        self.inner.manager.lock().ref_count(channel)
    }

    /// Frames waiting for the next open connection
    pub fn queued(&self) -> usize {
        self.inner.manager.lock().queued()
    }

    /// Disconnect and stop the driver. Other clones become inert.
    pub fn shutdown(&self) {
        self.disconnect();
        self.guard.task.abort();
        debug!(client_id = %self.inner.client_id, "Client shut down");
    }
}

impl std::fmt::Debug for RealtimeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeClient")
            .field("client_id", &self.inner.client_id)
            .field("state", &self.snapshot().state)
            .finish()
    }
}

/// A single listener registration
#[derive(Debug)]
pub struct Subscription {
    inner: Weak<Inner>,
    channel: String,
    id: ListenerId,
}

impl Subscription {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Remove this listener. The server is told only when it was the last
    /// one on the channel. Returns false if it was already gone.
    pub fn unsubscribe(self) -> bool {
        let Some(inner) = self.inner.upgrade() else {
            return false;
        };
        inner.update(|m, now| m.unsubscribe_listener(&self.channel, self.id, now))
    }
}

// ─────────────────────────────────────────────────────────────────
// Driver
// ─────────────────────────────────────────────────────────────────

async fn drive(inner: Arc<Inner>, mut transport_rx: mpsc::UnboundedReceiver<TransportEvent>) {
    debug!("Driver started");

    loop {
        let deadline = inner.manager.lock().next_deadline();
        let timer = async {
            match deadline {
                Some(ms) => tokio::time::sleep_until(inner.clock.instant_at(ms)).await,
                None => future::pending::<()>().await,
            }
        };

        tokio::select! {
            event = transport_rx.recv() => {
                let Some(event) = event else {
                    warn!("Transport channel closed, driver stopping");
                    break;
                };
                let delivery = inner.apply(|m, now| m.handle_event(event, now));
                if let Some(delivery) = delivery {
                    let report = delivery.dispatch();
                    if report.failed > 0 {
                        debug!(delivered = report.delivered, failed = report.failed, "Delivery had failures");
                    }
                }
            }

            _ = timer => {
                inner.apply(|m, now| m.on_timer(now));
            }

            _ = inner.wake.notified() => {}
        }
    }
}
