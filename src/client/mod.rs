//! Resilient realtime client
//!
//! The pieces, bottom up:
//! - [`OutboundQueue`] holds frames sent while disconnected
//! - [`SubscriptionRouter`] maps channels to listeners
//! - [`HeartbeatMonitor`] and [`ReconnectScheduler`] own the timers
//! - [`ConnectionManager`] is the state machine tying them together
//! - [`RealtimeClient`] runs a manager over a WebSocket on tokio

mod config;
mod driver;
mod heartbeat;
mod manager;
mod queue;
mod reconnect;
mod router;
mod state;
mod transport;

pub use config::ClientConfig;
pub use driver::{RealtimeClient, Subscription};
pub use heartbeat::{HeartbeatAction, HeartbeatMonitor};
pub use manager::{ConnectionManager, SendOutcome};
pub use queue::{OutboundQueue, QueuedMessage};
pub use reconnect::{ReconnectScheduler, Schedule};
pub use router::{Delivery, DispatchReport, Listener, ListenerId, Removal, SubscriptionRouter};
pub use state::{ClientEvent, ConnectionSnapshot, ConnectionState};
pub use transport::{Generation, SocketTransport, Transport, TransportEvent, TransportEventKind};
