//! Subscription router
//!
//! Keeps the channel → listener table and decides when the server needs to
//! hear about it: only on the first listener of a channel and on the removal
//! of its last one. Dispatch isolates every listener from the others.

use std::collections::BTreeMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

/// Callback invoked with a frame's `data` for every frame on its channel
pub type Listener = Arc<dyn Fn(&Value) -> anyhow::Result<()> + Send + Sync>;

/// Identifies one registration so it can be removed on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

struct Subscription {
    listeners: Vec<(ListenerId, Listener)>,
}

/// Result of removing a single listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// Channel or listener unknown
    NotFound,
    /// Other listeners remain on the channel
    Removed,
    /// That was the last listener; the channel entry is gone
    ChannelEmptied,
}

/// Channel → listeners table owned by one client
#[derive(Default)]
pub struct SubscriptionRouter {
    channels: BTreeMap<String, Subscription>,
    next_id: u64,
}

impl SubscriptionRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener; the flag is true when the channel is new
    pub fn add(&mut self, channel: &str, listener: Listener) -> (ListenerId, bool) {
        self.next_id += 1;
        let id = ListenerId(self.next_id);

        let first = !self.channels.contains_key(channel);
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| Subscription { listeners: Vec::new() })
            .listeners
            .push((id, listener));

        debug!(channel, %id, ref_count = self.ref_count(channel), "Listener added");
        (id, first)
    }

    /// Remove one listener
    pub fn remove(&mut self, channel: &str, id: ListenerId) -> Removal {
        let Some(sub) = self.channels.get_mut(channel) else {
            return Removal::NotFound;
        };
        let before = sub.listeners.len();
        sub.listeners.retain(|(lid, _)| *lid != id);
        if sub.listeners.len() == before {
            return Removal::NotFound;
        }
        if sub.listeners.is_empty() {
            self.channels.remove(channel);
            debug!(channel, %id, "Last listener removed");
            Removal::ChannelEmptied
        } else {
            Removal::Removed
        }
    }

    /// Drop a channel and all its listeners; true if it existed
    pub fn remove_channel(&mut self, channel: &str) -> bool {
        self.channels.remove(channel).is_some()
    }

    /// Drop everything; true if any channel existed
    pub fn clear(&mut self) -> bool {
        let had_any = !self.channels.is_empty();
        self.channels.clear();
        had_any
    }

    /// Number of local listeners on `channel`
    pub fn ref_count(&self, channel: &str) -> usize {
        self.channels.get(channel).map_or(0, |s| s.listeners.len())
    }

    pub fn contains(&self, channel: &str) -> bool {
        self.channels.contains_key(channel)
    }

    /// Active channel names, in stable order
    pub fn channels(&self) -> impl Iterator<Item = &str> {
        self.channels.keys().map(String::as_str)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Snapshot the listeners for a frame on `channel`.
    ///
    /// The returned [`Delivery`] owns its listener handles, so it can be run
    /// after whatever lock guards the router has been released.
    pub fn delivery(&self, channel: &str, data: Option<Value>) -> Option<Delivery> {
        let sub = self.channels.get(channel)?;
        Some(Delivery {
            channel: channel.to_string(),
            data: data.unwrap_or(Value::Null),
            listeners: sub.listeners.clone(),
        })
    }
}

impl fmt::Debug for SubscriptionRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: BTreeMap<&str, usize> = self
            .channels
            .iter()
            .map(|(name, sub)| (name.as_str(), sub.listeners.len()))
            .collect();
        f.debug_struct("SubscriptionRouter").field("channels", &counts).finish()
    }
}

// ─────────────────────────────────────────────────────────────────
// Dispatch
// ─────────────────────────────────────────────────────────────────

/// One inbound frame bound to the listeners registered when it arrived
pub struct Delivery {
    channel: String,
    data: Value,
    listeners: Vec<(ListenerId, Listener)>,
}

/// Outcome of running a [`Delivery`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
}

impl Delivery {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    /// Invoke every listener; a failing or panicking listener is logged and
    /// does not stop the rest.
    pub fn dispatch(self) -> DispatchReport {
        let mut report = DispatchReport::default();
        for (id, listener) in &self.listeners {
            match catch_unwind(AssertUnwindSafe(|| listener(&self.data))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    report.failed += 1;
                    warn!(channel = %self.channel, %id, error = %e, "Listener returned an error");
                }
                Err(panic) => {
                    report.failed += 1;
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "non-string panic payload".to_string());
                    warn!(channel = %self.channel, %id, panic = %message, "Listener panicked");
                }
            }
        }
        report
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("channel", &self.channel)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
