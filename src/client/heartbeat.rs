//! Heartbeat monitor
//!
//! While the connection is open, sends a `ping` every interval and expects
//! the matching `pong` within the watchdog window. A missing pong means the
//! connection is half-open and must be torn down.

use std::time::Duration;

use tracing::{debug, trace};

/// Work the monitor wants done at the current time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Send a ping stamped with this time
    SendPing(u64),
    /// No pong arrived in time
    Dead { waited_ms: u64 },
}

#[derive(Debug)]
pub struct HeartbeatMonitor {
    interval_ms: u64,
    timeout_ms: u64,
    next_ping: Option<u64>,
    outstanding: Option<u64>,
    watchdog: Option<u64>,
}

impl HeartbeatMonitor {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval_ms: interval.as_millis() as u64,
            timeout_ms: timeout.as_millis() as u64,
            next_ping: None,
            outstanding: None,
            watchdog: None,
        }
    }

    /// Arm the first ping one interval from `now`, replacing any prior timers
    pub fn start(&mut self, now: u64) {
        self.outstanding = None;
        self.watchdog = None;
        self.next_ping = Some(now.saturating_add(self.interval_ms));
        debug!(interval_ms = self.interval_ms, "Heartbeat started");
    }

    /// Cancel every timer
    pub fn stop(&mut self) {
        self.next_ping = None;
        self.outstanding = None;
        self.watchdog = None;
    }

    pub fn is_running(&self) -> bool {
        self.next_ping.is_some() || self.watchdog.is_some()
    }

    /// Earliest time the monitor needs attention
    pub fn next_deadline(&self) -> Option<u64> {
        match (self.next_ping, self.watchdog) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Advance to `now`; the watchdog takes precedence over a due ping
    pub fn poll(&mut self, now: u64) -> Option<HeartbeatAction> {
        if let Some(deadline) = self.watchdog {
            if deadline <= now {
                let waited_ms = self.outstanding.map_or(self.timeout_ms, |sent| now - sent);
                self.stop();
                return Some(HeartbeatAction::Dead { waited_ms });
            }
        }

        match self.next_ping {
            Some(due) if due <= now => {
                self.next_ping = None;
                self.outstanding = Some(now);
                self.watchdog = Some(now.saturating_add(self.timeout_ms));
                trace!(sent_at = now, "Ping due");
                Some(HeartbeatAction::SendPing(now))
            }
            _ => None,
        }
    }

    /// Record a pong; returns the measured latency if it matches the ping
    /// in flight. A pong that echoes a different timestamp is ignored.
    pub fn on_pong(&mut self, echoed: Option<u64>, now: u64) -> Option<u64> {
        let sent = self.outstanding?;
        if echoed.is_some_and(|ts| ts != sent) {
            debug!(expected = sent, echoed = ?echoed, "Ignoring stale pong");
            return None;
        }

        let latency = now.saturating_sub(sent);
        self.outstanding = None;
        self.watchdog = None;
        self.next_ping = Some(sent.saturating_add(self.interval_ms).max(now));
        Some(latency)
    }

    pub fn outstanding_ping(&self) -> Option<u64> {
        self.outstanding
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> HeartbeatMonitor {
        HeartbeatMonitor::new(Duration::from_millis(1000), Duration::from_millis(1000))
    }

    #[test]
    fn test_ping_then_latency() {
        let mut hb = monitor();
        hb.start(0);
        assert_eq!(hb.poll(999), None);
        assert_eq!(hb.poll(1000), Some(HeartbeatAction::SendPing(1000)));
        assert_eq!(hb.on_pong(Some(1000), 1120), Some(120));
        assert_eq!(hb.next_deadline(), Some(2000));
    }

    #[test]
    fn test_pong_without_echo_matches_outstanding() {
        let mut hb = monitor();
        hb.start(0);
        hb.poll(1000);
        assert_eq!(hb.on_pong(None, 1045), Some(45));
    }

    #[test]
    fn test_unsolicited_and_stale_pongs_ignored() {
        let mut hb = monitor();
        hb.start(0);
        assert_eq!(hb.on_pong(None, 10), None);
        hb.poll(1000);
        assert_eq!(hb.on_pong(Some(7), 1010), None);
        assert_eq!(hb.outstanding_ping(), Some(1000));
    }

    #[test]
    fn test_watchdog_declares_dead() {
        let mut hb = monitor();
        hb.start(0);
        hb.poll(1000);
        assert_eq!(hb.next_deadline(), Some(2000));
        assert_eq!(hb.poll(1999), None);
        assert_eq!(hb.poll(2000), Some(HeartbeatAction::Dead { waited_ms: 1000 }));
        assert!(!hb.is_running());
        assert_eq!(hb.next_deadline(), None);
    }

    #[test]
    fn test_stop_cancels_everything() {
        let mut hb = monitor();
        hb.start(0);
        hb.stop();
        assert_eq!(hb.poll(10_000), None);
        assert_eq!(hb.next_deadline(), None);
    }

    #[test]
    fn test_restart_replaces_timers() {
        let mut hb = monitor();
        hb.start(0);
        hb.poll(1000);
        hb.start(1500);
        assert_eq!(hb.outstanding_ping(), None);
        assert_eq!(hb.next_deadline(), Some(2500));
    }
}
