//! realtime-link
//!
//! Client for a realtime messaging endpoint: one long-lived WebSocket
//! session with heartbeats, exponential-backoff reconnects, an offline send
//! queue and reference-counted channel subscriptions that survive reconnects.
//!
//! ```no_run
//! use realtime_link::client::{ClientConfig, RealtimeClient};
//!
//! # async fn demo() -> realtime_link::error::Result<()> {
//! let client = RealtimeClient::new(ClientConfig::new("wss://example.com/realtime"))?;
//! let alerts = client.subscribe("alerts", |data| {
//!     println!("alert: {}", data);
//!     Ok(())
//! });
//! client.send_message("orders", serde_json::json!({ "id": 42 }));
//! alerts.unsubscribe();
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod version;
