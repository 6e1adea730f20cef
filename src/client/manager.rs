//! Connection manager
//!
//! Owns the connection state machine and composes the heartbeat monitor,
//! reconnect scheduler, outbound queue and subscription router around a
//! single [`Transport`]. The manager does no I/O of its own and never reads
//! a clock: every entry point takes `now` in milliseconds, and the caller
//! wakes it at [`ConnectionManager::next_deadline`] through
//! [`ConnectionManager::on_timer`].

use tracing::{debug, error, info, trace, warn};

use super::config::ClientConfig;
use super::heartbeat::{HeartbeatAction, HeartbeatMonitor};
use super::queue::OutboundQueue;
use super::reconnect::{ReconnectScheduler, Schedule};
use super::router::{Delivery, Listener, ListenerId, Removal, SubscriptionRouter};
use super::state::{ClientEvent, ConnectionSnapshot, ConnectionState, SessionInfo};
use super::transport::{Generation, Transport, TransportEvent, TransportEventKind};
use crate::error::{Error, Result};
use crate::protocol::{self, Frame, KIND_CONNECTION_CONFIRMED, KIND_PING, KIND_PONG};

/// Close codes the server uses to reject credentials
const AUTH_REJECT_CODES: [u16; 2] = [1008, 4001];

/// How an accepted outbound frame was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Written to the open transport
    Sent,
    /// Held for the next open transport
    Queued,
}

pub struct ConnectionManager<T: Transport> {
    config: ClientConfig,
    transport: T,
    state: ConnectionState,
    session: SessionInfo,
    error: Option<String>,
    token: Option<String>,
    generation: Generation,
    live: bool,
    manual_disconnect: bool,
    queue: OutboundQueue,
    router: SubscriptionRouter,
    reconnect: ReconnectScheduler,
    heartbeat: HeartbeatMonitor,
    events: Vec<ClientEvent>,
}

impl<T: Transport> ConnectionManager<T> {
    pub fn new(config: ClientConfig, transport: T) -> Self {
        let queue = OutboundQueue::new(config.message_queue_size);
        let reconnect = ReconnectScheduler::new(
            config.reconnect_interval,
            config.max_reconnect_interval,
            config.reconnect_attempts,
        );
        let heartbeat = HeartbeatMonitor::new(config.heartbeat_interval, config.heartbeat_timeout);

        Self {
            config,
            transport,
            state: ConnectionState::Idle,
            session: SessionInfo::default(),
            error: None,
            token: None,
            generation: 0,
            live: false,
            manual_disconnect: false,
            queue,
            router: SubscriptionRouter::new(),
            reconnect,
            heartbeat,
            events: Vec::new(),
        }
    }

    // ─── Lifecycle ──────────────────────────────────────────────

    /// Open a transport unless one is already open or opening.
    ///
    /// From `Idle` or `Failed` the retry count starts over. From
    /// `Reconnecting` the pending attempt is taken now.
    pub fn connect(&mut self, now: u64) {
        match self.state {
            ConnectionState::Open | ConnectionState::Connecting => {
                debug!(state = %self.state, "Connect ignored");
                return;
            }
            ConnectionState::Idle | ConnectionState::Failed | ConnectionState::Closing => {
                self.session.retry_count = 0;
            }
            ConnectionState::Reconnecting => {}
        }

        self.manual_disconnect = false;
        self.reconnect.cancel();
        self.open_transport(now);
    }

    /// Close the transport and stop every timer. Safe to call in any state.
    pub fn disconnect(&mut self, _now: u64) {
        self.manual_disconnect = true;
        self.reconnect.cancel();
        self.heartbeat.stop();

        if self.live {
            self.set_state(ConnectionState::Closing);
            self.transport.close(true);
            self.live = false;
        }

        self.session = SessionInfo::default();
        self.set_state(ConnectionState::Idle);
        info!("Disconnected");
    }

    /// Token sent in an `authenticate` frame on every open, and right away
    /// if the connection is already open
    pub fn set_token(&mut self, token: Option<String>, now: u64) {
        self.token = token;
        if let Some(token) = self.token.clone() {
            self.send_control(Frame::authenticate(&token), now);
        }
    }

    fn open_transport(&mut self, _now: u64) {
        self.heartbeat.stop();
        if self.live {
            self.transport.close(false);
        }

        self.generation += 1;
        self.live = true;
        info!(url = %self.config.url, generation = self.generation, "Opening transport");
        self.transport
            .open(self.generation, &self.config.url, &self.config.protocols);
        self.set_state(ConnectionState::Connecting);
    }

    // ─── Outbound ───────────────────────────────────────────────

    /// Send an application frame, or queue it while no transport is open.
    ///
    /// While open, frames still queued from an earlier failed write go out
    /// first; the new frame is queued behind any that remain. Fails when the
    /// frame cannot be encoded, or had to be queued and the queue is full.
    pub fn send_message(&mut self, mut frame: Frame, now: u64) -> Result<SendOutcome> {
        frame.stamp(now);

        if self.is_writable() {
            if !self.queue.is_empty() {
                self.flush_queue(now);
            }
            if self.queue.is_empty() {
                match self.transmit(&frame, now) {
                    Ok(()) => return Ok(SendOutcome::Sent),
                    Err(e) if e.is_retryable() => {
                        warn!(kind = %frame.kind, error = %e, "Send failed, queueing")
                    }
                    Err(e) => {
                        self.record_error(&e);
                        return Err(e);
                    }
                }
            }
        }

        match self.queue.enqueue(frame, now) {
            Ok(()) => {
                trace!(queued = self.queue.len(), "Frame queued");
                Ok(SendOutcome::Queued)
            }
            Err(e) => {
                warn!(capacity = self.queue.capacity(), "Outbound queue full");
                self.record_error(&e);
                Err(e)
            }
        }
    }

    /// Register `listener` for `channel`; the server hears about the first
    /// listener only.
    pub fn subscribe(&mut self, channel: &str, listener: Listener, now: u64) -> ListenerId {
        let (id, first) = self.router.add(channel, listener);
        if first {
            self.send_control(Frame::subscribe(channel), now);
        }
        id
    }

    /// Remove one listener; returns false if it was not registered
    pub fn unsubscribe_listener(&mut self, channel: &str, id: ListenerId, now: u64) -> bool {
        match self.router.remove(channel, id) {
            Removal::NotFound => false,
            Removal::Removed => true,
            Removal::ChannelEmptied => {
                self.send_control(Frame::unsubscribe(channel), now);
                true
            }
        }
    }

    /// Remove every listener of `channel`; returns false if it had none
    pub fn unsubscribe(&mut self, channel: &str, now: u64) -> bool {
        if !self.router.remove_channel(channel) {
            return false;
        }
        debug!(channel, "Channel removed");
        self.send_control(Frame::unsubscribe(channel), now);
        true
    }

    /// Drop every subscription
    pub fn clear_subscriptions(&mut self, now: u64) {
        self.router.clear();
        self.send_control(Frame::unsubscribe_all(), now);
    }

    /// Control frames are not queued; subscriptions are replayed on open.
    fn send_control(&mut self, mut frame: Frame, now: u64) {
        if !self.is_writable() {
            trace!(kind = %frame.kind, "Control frame deferred until open");
            return;
        }
        frame.stamp(now);
        if let Err(e) = self.transmit(&frame, now) {
            warn!(kind = %frame.kind, error = %e, "Failed to send control frame");
        }
    }

    fn transmit(&mut self, frame: &Frame, now: u64) -> Result<()> {
        let text = protocol::encode(frame, now)?;
        self.transport.send(text)
    }

    /// Write queued frames in order until one fails
    fn flush_queue(&mut self, now: u64) -> usize {
        let transport = &mut self.transport;
        self.queue.flush(|message| {
            let text = protocol::encode(&message.payload, now)?;
            transport.send(text)
        })
    }

    fn is_writable(&self) -> bool {
        self.live && self.state == ConnectionState::Open
    }

    // ─── Inbound ────────────────────────────────────────────────

    /// Apply a transport event. A frame for a subscribed channel comes back
    /// as a [`Delivery`] for the caller to run.
    pub fn handle_event(&mut self, event: TransportEvent, now: u64) -> Option<Delivery> {
        if event.generation != self.generation || !self.live {
            trace!(generation = event.generation, current = self.generation, "Stale transport event");
            return None;
        }

        match event.kind {
            TransportEventKind::Opened => {
                self.on_open(now);
                None
            }
            TransportEventKind::Text(text) => self.on_text(protocol::decode(&text, now), now),
            TransportEventKind::Binary(bytes) => {
                self.on_text(protocol::decode_bytes(&bytes, now), now)
            }
            TransportEventKind::Unsent(texts) => {
                self.requeue_unsent(texts, now);
                None
            }
            TransportEventKind::Error(message) => {
                self.record_error(&Error::transport(message));
                None
            }
            TransportEventKind::Closed { code, reason } => {
                self.on_close(code, reason, now);
                None
            }
        }
    }

    /// Application frames the transport accepted but never wrote go back to
    /// the head of the queue. Control frames are dropped; the next open
    /// re-sends what they carried.
    fn requeue_unsent(&mut self, texts: Vec<String>, now: u64) {
        let frames: Vec<Frame> = texts
            .iter()
            .filter_map(|text| protocol::decode(text, now).ok())
            .filter(|frame| !protocol::is_reserved_kind(&frame.kind))
            .collect();
        let returned = frames.len();
        let dropped = self.queue.requeue(frames, now);
        if dropped > 0 {
            self.record_error(&Error::QueueOverflow {
                capacity: self.queue.capacity(),
            });
        }
        info!(returned, dropped, "Unwritten frames returned to the queue");
    }

    fn on_open(&mut self, now: u64) {
        if self.state != ConnectionState::Connecting {
            warn!(state = %self.state, "Transport opened in unexpected state");
        }

        let retry_count = self.session.retry_count;
        self.session = SessionInfo::default();
        self.error = None;
        self.set_state(ConnectionState::Open);
        self.heartbeat.start(now);

        if let Some(token) = self.token.clone() {
            if let Err(e) = self.transmit(&Frame::authenticate(&token).with_timestamp(now), now) {
                warn!(error = %e, "Failed to send authenticate frame");
            }
        }

        let channels: Vec<String> = self.router.channels().map(str::to_string).collect();
        for channel in &channels {
            if let Err(e) = self.transmit(&Frame::subscribe(channel).with_timestamp(now), now) {
                warn!(channel = %channel, error = %e, "Failed to resubscribe");
            }
        }

        let flushed = self.flush_queue(now);

        info!(
            generation = self.generation,
            after_retries = retry_count,
            resubscribed = channels.len(),
            flushed,
            "Connection open"
        );
    }

    fn on_text(&mut self, decoded: Result<Frame>, now: u64) -> Option<Delivery> {
        let frame = match decoded {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Dropping malformed frame");
                self.record_error(&e);
                return None;
            }
        };

        match frame.kind.as_str() {
            KIND_PONG => {
                if let Some(latency_ms) = self.heartbeat.on_pong(frame.echoed_timestamp(), now) {
                    trace!(latency_ms, "Pong received");
                    self.session.latency_ms = Some(latency_ms);
                    self.events.push(ClientEvent::Latency { latency_ms });
                }
                None
            }
            KIND_PING => {
                let reply = Frame::pong(frame.timestamp, now);
                if let Err(e) = self.transmit(&reply, now) {
                    warn!(error = %e, "Failed to answer server ping");
                }
                None
            }
            KIND_CONNECTION_CONFIRMED => {
                let connection_id = frame.connection_id();
                info!(connection_id = ?connection_id, "Connection confirmed");
                self.session.connection_id = connection_id.clone();
                self.events.push(ClientEvent::Confirmed { connection_id });
                None
            }
            kind if protocol::is_reserved_kind(kind) => {
                debug!(kind, "Ignoring control frame from server");
                None
            }
            kind => {
                let delivery = self.router.delivery(kind, frame.data.clone());
                if delivery.is_none() {
                    trace!(kind, "No listeners for frame");
                }
                delivery
            }
        }
    }

    fn on_close(&mut self, code: Option<u16>, reason: String, now: u64) {
        self.live = false;
        self.heartbeat.stop();
        self.session.connection_id = None;
        self.session.latency_ms = None;

        if code.is_some_and(|c| AUTH_REJECT_CODES.contains(&c)) {
            let message = if reason.is_empty() {
                format!("server closed the connection with code {}", code.unwrap_or_default())
            } else {
                reason
            };
            self.reconnect.cancel();
            self.record_error(&Error::auth(message));
            self.set_state(ConnectionState::Failed);
            return;
        }

        if self.manual_disconnect {
            self.set_state(ConnectionState::Idle);
            return;
        }

        warn!(code = ?code, reason = %reason, state = %self.state, "Transport closed unexpectedly");
        if self.state == ConnectionState::Open || self.error.is_none() {
            let message = match code {
                Some(code) => format!("connection closed (code {}) {}", code, reason),
                None => format!("connection closed: {}", reason),
            };
            self.record_error(&Error::transport(message.trim_end()));
        }
        self.schedule_reconnect(now);
    }

    // ─── Timers ─────────────────────────────────────────────────

    /// Earliest time [`on_timer`](Self::on_timer) has work to do
    pub fn next_deadline(&self) -> Option<u64> {
        match (self.heartbeat.next_deadline(), self.reconnect.due()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Run whatever timers are due at `now`
    pub fn on_timer(&mut self, now: u64) {
        while let Some(action) = self.heartbeat.poll(now) {
            match action {
                HeartbeatAction::SendPing(sent_at) => {
                    if let Err(e) = self.transmit(&Frame::ping(sent_at), now) {
                        warn!(error = %e, "Failed to send ping");
                    }
                }
                HeartbeatAction::Dead { waited_ms } => {
                    self.on_heartbeat_timeout(waited_ms, now);
                    break;
                }
            }
        }

        if self.reconnect.fire(now) {
            self.on_reconnect_due(now);
        }
    }

    fn on_heartbeat_timeout(&mut self, waited_ms: u64, now: u64) {
        error!(waited_ms, "Heartbeat timeout, dropping connection");
        self.record_error(&Error::HeartbeatTimeout { waited_ms });
        self.transport.close(false);
        self.live = false;
        self.session.connection_id = None;
        self.session.latency_ms = None;
        self.schedule_reconnect(now);
    }

    fn on_reconnect_due(&mut self, now: u64) {
        if self.manual_disconnect || self.state != ConnectionState::Reconnecting {
            debug!(state = %self.state, "Skipping reconnect attempt");
            return;
        }
        info!(attempt = self.session.retry_count, max = self.config.reconnect_attempts, "Reconnecting");
        self.open_transport(now);
    }

    fn schedule_reconnect(&mut self, now: u64) {
        match self.reconnect.schedule(self.session.retry_count, now) {
            Schedule::Retry {
                attempt, delay_ms, ..
            } => {
                self.session.retry_count = attempt;
                self.set_state(ConnectionState::Reconnecting);
                self.events
                    .push(ClientEvent::Reconnecting { attempt, delay_ms });
            }
            Schedule::Exhausted { attempts } => {
                self.record_error(&Error::ReconnectExhausted { attempts });
                self.set_state(ConnectionState::Failed);
            }
        }
    }

    // ─── State ──────────────────────────────────────────────────

    fn set_state(&mut self, next: ConnectionState) {
        if self.state == next {
            return;
        }
        debug!(from = %self.state, to = %next, "State change");
        self.state = next;
        self.events.push(ClientEvent::StateChanged(next));
    }

    fn record_error(&mut self, err: &Error) {
        let fatal = err.is_fatal();
        if fatal {
            error!("{}", err.format_for_log());
        } else {
            debug!("{}", err.format_for_log());
        }
        let message = err.to_string();
        self.error = Some(message.clone());
        self.events.push(ClientEvent::Error { message, fatal });
    }

    /// Take the notifications produced since the last call
    pub fn drain_events(&mut self) -> Vec<ClientEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        ConnectionSnapshot::new(
            self.state,
            &self.session,
            self.error.clone(),
            self.config.reconnect_attempts,
        )
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Local listener count for `channel`
    pub fn ref_count(&self, channel: &str) -> usize {
        self.router.ref_count(channel)
    }

    pub fn channels(&self) -> Vec<String> {
        self.router.channels().map(str::to_string).collect()
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}
