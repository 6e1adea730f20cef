//! Reconnect scheduler
//!
//! Exponential backoff keyed by attempt number: attempt `n` waits
//! `base * 2^(n-1)`, capped at the configured maximum. At most one attempt
//! is pending at a time.

use std::time::Duration;

use tracing::{debug, info};

/// What the scheduler decided after an unclean close
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Attempt `attempt` will fire at `due`
    Retry { attempt: u32, delay_ms: u64, due: u64 },
    /// The attempt budget is spent
    Exhausted { attempts: u32 },
}

#[derive(Debug)]
pub struct ReconnectScheduler {
    base_ms: u64,
    max_ms: u64,
    max_attempts: u32,
    due: Option<u64>,
}

impl ReconnectScheduler {
    pub fn new(base: Duration, max: Duration, max_attempts: u32) -> Self {
        Self {
            base_ms: base.as_millis() as u64,
            max_ms: max.as_millis() as u64,
            max_attempts,
            due: None,
        }
    }

    /// Delay before attempt `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> u64 {
        let exponent = attempt.saturating_sub(1).min(63);
        let factor = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
        self.base_ms.saturating_mul(factor).min(self.max_ms)
    }

    /// Schedule the attempt following `retry_count` completed ones.
    ///
    /// Replaces any attempt already pending.
    pub fn schedule(&mut self, retry_count: u32, now: u64) -> Schedule {
        let attempt = retry_count.saturating_add(1);
        if attempt > self.max_attempts {
            self.due = None;
            info!(attempts = retry_count, "Reconnect attempts exhausted");
            return Schedule::Exhausted {
                attempts: retry_count,
            };
        }

        let delay_ms = self.delay_for(attempt);
        let due = now.saturating_add(delay_ms);
        self.due = Some(due);
        info!(attempt, max = self.max_attempts, delay_ms, "Reconnect scheduled");
        Schedule::Retry {
            attempt,
            delay_ms,
            due,
        }
    }

    /// Drop the pending attempt, if any
    pub fn cancel(&mut self) {
        if self.due.take().is_some() {
            debug!("Pending reconnect cancelled");
        }
    }

    pub fn due(&self) -> Option<u64> {
        self.due
    }

    pub fn is_pending(&self) -> bool {
        self.due.is_some()
    }

    /// Consume the pending attempt if it is due at `now`
    pub fn fire(&mut self, now: u64) -> bool {
        match self.due {
            Some(due) if due <= now => {
                self.due = None;
                true
            }
            _ => false,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler(attempts: u32) -> ReconnectScheduler {
        ReconnectScheduler::new(
            Duration::from_millis(3000),
            Duration::from_millis(60000),
            attempts,
        )
    }

    #[test]
    fn test_doubling_sequence() {
        let s = scheduler(5);
        let delays: Vec<u64> = (1..=5).map(|n| s.delay_for(n)).collect();
        assert_eq!(delays, vec![3000, 6000, 12000, 24000, 48000]);
    }

    #[test]
    fn test_delay_is_capped() {
        let s = ReconnectScheduler::new(Duration::from_millis(3000), Duration::from_millis(30000), 10);
        assert_eq!(s.delay_for(4), 24000);
        assert_eq!(s.delay_for(5), 30000);
        assert_eq!(s.delay_for(200), 30000);
    }

    #[test]
    fn test_schedule_then_exhaust() {
        let mut s = scheduler(2);
        assert_eq!(
            s.schedule(0, 100),
            Schedule::Retry { attempt: 1, delay_ms: 3000, due: 3100 }
        );
        assert_eq!(
            s.schedule(1, 200),
            Schedule::Retry { attempt: 2, delay_ms: 6000, due: 6200 }
        );
        assert_eq!(s.schedule(2, 300), Schedule::Exhausted { attempts: 2 });
        assert!(!s.is_pending());
    }

    #[test]
    fn test_zero_attempts_never_retries() {
        let mut s = scheduler(0);
        assert_eq!(s.schedule(0, 0), Schedule::Exhausted { attempts: 0 });
    }

    #[test]
    fn test_fire_only_when_due() {
        let mut s = scheduler(5);
        s.schedule(0, 0);
        assert!(!s.fire(2999));
        assert!(s.fire(3000));
        assert!(!s.fire(3001));
    }

    #[test]
    fn test_cancel() {
        let mut s = scheduler(5);
        s.schedule(0, 0);
        s.cancel();
        assert_eq!(s.due(), None);
        assert!(!s.fire(10_000));
    }
}
