//! Runtime client configuration

use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};

/// Immutable settings for one client instance
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket URL of the realtime endpoint
    pub url: String,

    /// Sub-protocols offered in the handshake
    pub protocols: Vec<String>,

    /// Maximum automatic reconnection attempts (0 = never retry)
    pub reconnect_attempts: u32,

    /// Base reconnect delay; doubled per attempt
    pub reconnect_interval: Duration,

    /// Upper bound for a single reconnect delay
    pub max_reconnect_interval: Duration,

    /// Interval between pings while open
    pub heartbeat_interval: Duration,

    /// How long to wait for a pong before declaring the connection dead
    pub heartbeat_timeout: Duration,

    /// How long a transport may take to open
    pub connect_timeout: Duration,

    /// Outbound queue capacity while disconnected
    pub message_queue_size: usize,

    /// Connect as soon as the client is created
    pub auto_connect: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:3001/realtime".to_string(),
            protocols: vec![],
            reconnect_attempts: 5,
            reconnect_interval: Duration::from_millis(3000),
            max_reconnect_interval: Duration::from_millis(60000),
            heartbeat_interval: Duration::from_millis(30000),
            heartbeat_timeout: Duration::from_millis(30000),
            connect_timeout: Duration::from_millis(30000),
            message_queue_size: 100,
            auto_connect: true,
        }
    }
}

impl ClientConfig {
    /// Config for `url` with every other value defaulted
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Check the values a client cannot run without
    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.url)?;
        if url.scheme() != "ws" && url.scheme() != "wss" {
            return Err(Error::config_field_invalid(
                "url",
                format!("URL scheme must be ws or wss, got '{}'", url.scheme()),
            ));
        }
        if self.reconnect_interval.is_zero() {
            return Err(Error::config_field_invalid("reconnect_interval", "must be greater than zero"));
        }
        if self.max_reconnect_interval < self.reconnect_interval {
            return Err(Error::config_field_invalid(
                "max_reconnect_interval",
                "must not be smaller than reconnect_interval",
            ));
        }
        if self.heartbeat_interval.is_zero() || self.heartbeat_timeout.is_zero() {
            return Err(Error::config_field_invalid("heartbeat_interval", "must be greater than zero"));
        }
        if self.message_queue_size == 0 {
            return Err(Error::config_field_invalid("message_queue_size", "must be at least 1"));
        }
        Ok(())
    }
}
