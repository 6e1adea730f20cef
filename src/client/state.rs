//! Connection state and the observable snapshot

use std::fmt;

use serde::Serialize;

// ─────────────────────────────────────────────────────────────────
// Connection State
// ─────────────────────────────────────────────────────────────────

/// Lifecycle of the single transport a client owns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No transport and nothing scheduled
    #[default]
    Idle,
    /// Transport opening
    Connecting,
    /// Transport open, heartbeat running
    Open,
    /// Waiting for the next automatic attempt
    Reconnecting,
    /// Tearing the transport down at the caller's request
    Closing,
    /// Gave up; only an explicit connect leaves this state
    Failed,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        self == ConnectionState::Open
    }

    pub fn is_connecting(self) -> bool {
        self == ConnectionState::Connecting
    }

    pub fn is_reconnecting(self) -> bool {
        self == ConnectionState::Reconnecting
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Closing => "closing",
            ConnectionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

// ─────────────────────────────────────────────────────────────────
// Session Metadata
// ─────────────────────────────────────────────────────────────────

/// Per-session metadata; reset whenever a new `Open` is entered
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct SessionInfo {
    pub connection_id: Option<String>,
    pub retry_count: u32,
    pub latency_ms: Option<u64>,
}

// ─────────────────────────────────────────────────────────────────
// Snapshot
// ─────────────────────────────────────────────────────────────────

/// Point-in-time view of a client, safe to hand to UI code
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSnapshot {
    pub state: ConnectionState,
    pub is_connected: bool,
    pub is_connecting: bool,
    pub is_reconnecting: bool,
    pub connection_id: Option<String>,
    pub error: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub latency: Option<u64>,
}

impl ConnectionSnapshot {
    pub(crate) fn new(
        state: ConnectionState,
        session: &SessionInfo,
        error: Option<String>,
        max_retries: u32,
    ) -> Self {
        Self {
            state,
            is_connected: state.is_connected(),
            is_connecting: state.is_connecting(),
            is_reconnecting: state.is_reconnecting(),
            connection_id: session.connection_id.clone(),
            error,
            retry_count: session.retry_count,
            max_retries,
            latency: session.latency_ms,
        }
    }

    /// Short human status, e.g. `Reconnecting (2/5)`
    pub fn status_line(&self) -> String {
        match self.state {
            ConnectionState::Open => "Live".to_string(),
            ConnectionState::Connecting => "Connecting".to_string(),
            ConnectionState::Reconnecting => {
                format!("Reconnecting ({}/{})", self.retry_count, self.max_retries)
            }
            ConnectionState::Failed => "Failed".to_string(),
            ConnectionState::Idle | ConnectionState::Closing => "Disconnected".to_string(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────

/// Notifications emitted by a client
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// The connection state changed
    StateChanged(ConnectionState),

    /// The server confirmed the session
    Confirmed { connection_id: Option<String> },

    /// A reconnect attempt was scheduled
    Reconnecting { attempt: u32, delay_ms: u64 },

    /// A pong arrived
    Latency { latency_ms: u64 },

    /// An error was recorded in the snapshot
    Error { message: String, fatal: bool },
}
