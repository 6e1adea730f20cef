//! Frame definitions
//!
//! A single flat frame type is used in both directions. Control frames are
//! identified by reserved `kind` values; see [`FrameKind`].

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

// ─────────────────────────────────────────────────────────────────
// Reserved kinds
// ─────────────────────────────────────────────────────────────────

pub const KIND_PING: &str = "ping";
pub const KIND_PONG: &str = "pong";
pub const KIND_AUTHENTICATE: &str = "authenticate";
pub const KIND_CONNECTION_CONFIRMED: &str = "connection_confirmed";
pub const KIND_SUBSCRIBE: &str = "subscribe";
pub const KIND_UNSUBSCRIBE: &str = "unsubscribe";
pub const KIND_UNSUBSCRIBE_ALL: &str = "unsubscribe_all";

/// Classification of a frame's `kind`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameKind<'a> {
    Ping,
    Pong,
    Authenticate,
    ConnectionConfirmed,
    Subscribe,
    Unsubscribe,
    UnsubscribeAll,
    /// Any non-reserved kind is an application channel name
    Channel(&'a str),
}

impl<'a> FrameKind<'a> {
    /// Classify a raw `kind` string
    pub fn classify(kind: &'a str) -> Self {
        match kind {
            KIND_PING => FrameKind::Ping,
            KIND_PONG => FrameKind::Pong,
            KIND_AUTHENTICATE => FrameKind::Authenticate,
            KIND_CONNECTION_CONFIRMED => FrameKind::ConnectionConfirmed,
            KIND_SUBSCRIBE => FrameKind::Subscribe,
            KIND_UNSUBSCRIBE => FrameKind::Unsubscribe,
            KIND_UNSUBSCRIBE_ALL => FrameKind::UnsubscribeAll,
            other => FrameKind::Channel(other),
        }
    }

    /// Whether this kind belongs to the control protocol
    pub fn is_control(&self) -> bool {
        !matches!(self, FrameKind::Channel(_))
    }
}

/// Whether `kind` is one of the reserved control kinds
pub fn is_reserved_kind(kind: &str) -> bool {
    FrameKind::classify(kind).is_control()
}

// ─────────────────────────────────────────────────────────────────
// Frame
// ─────────────────────────────────────────────────────────────────

/// A single wire frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Routing key / control discriminator
    pub kind: String,

    /// Opaque payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    /// Milliseconds since the Unix epoch; stamped on encode when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,

    /// Originating user, when the server attributes the frame
    #[serde(default, rename = "userId", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl Frame {
    /// Create a frame with no payload
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            data: None,
            timestamp: None,
            user_id: None,
        }
    }

    /// Attach a payload
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Set an explicit timestamp
    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Attribute the frame to a user
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Fill in `timestamp` if the caller left it empty
    pub fn stamp(&mut self, now: u64) {
        self.timestamp.get_or_insert(now);
    }

    /// Classify this frame's kind
    pub fn frame_kind(&self) -> FrameKind<'_> {
        FrameKind::classify(&self.kind)
    }

    // ─── Control frame constructors ─────────────────────────────

    pub fn ping(sent_at: u64) -> Self {
        Frame::new(KIND_PING).with_timestamp(sent_at)
    }

    /// Reply to a server ping, echoing its timestamp in `data`
    pub fn pong(echo: Option<u64>, now: u64) -> Self {
        let frame = Frame::new(KIND_PONG).with_timestamp(now);
        match echo {
            Some(ts) => frame.with_data(json!({ "timestamp": ts })),
            None => frame,
        }
    }

    pub fn authenticate(token: &str) -> Self {
        Frame::new(KIND_AUTHENTICATE).with_data(json!({ "token": token }))
    }

    pub fn subscribe(channel: &str) -> Self {
        Frame::new(KIND_SUBSCRIBE).with_data(json!({ "channel": channel }))
    }

    pub fn unsubscribe(channel: &str) -> Self {
        Frame::new(KIND_UNSUBSCRIBE).with_data(json!({ "channel": channel }))
    }

    pub fn unsubscribe_all() -> Self {
        Frame::new(KIND_UNSUBSCRIBE_ALL)
    }

    // ─── Payload accessors ──────────────────────────────────────

    /// Timestamp a pong echoes back, if the server included one
    pub fn echoed_timestamp(&self) -> Option<u64> {
        self.data
            .as_ref()
            .and_then(|d| d.get("timestamp"))
            .and_then(Value::as_u64)
    }

    /// Channel named by a subscribe/unsubscribe control frame
    pub fn target_channel(&self) -> Option<&str> {
        self.data
            .as_ref()
            .and_then(|d| d.get("channel"))
            .and_then(Value::as_str)
    }

    /// Connection id assigned by the server in `connection_confirmed`
    pub fn connection_id(&self) -> Option<String> {
        let data = self.data.as_ref()?;
        data.get("connectionId")
            .or_else(|| data.get("connection_id"))
            .and_then(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.timestamp {
            Some(ts) => write!(f, "{}@{}", self.kind, ts),
            None => write!(f, "{}", self.kind),
        }
    }
}
