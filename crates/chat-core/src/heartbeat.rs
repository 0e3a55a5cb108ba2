use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Delay before re-checking after a non-fatal error left the transport open.
pub const DEGRADED_RETRY_MS: u64 = 10_000;
/// Interval following the degraded re-check.
pub const DEGRADED_FOLLOW_UP_MS: u64 = 20_000;
/// Delay before re-checking when a close was reported but the transport is not closed.
pub const UNCONFIRMED_CLOSE_RETRY_MS: u64 = 10_000;

/// Heartbeat interval schedule.
///
/// The interval starts at `base_ms` and grows by `step_ms` after every check
/// until it reaches `max_ms`. A `step_ms` of zero gives a fixed interval.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct HeartbeatPolicy {
    pub base_ms: u64,
    pub step_ms: u64,
    pub max_ms: u64,
}

impl HeartbeatPolicy {
    pub fn fixed(interval_ms: u64) -> Self {
        Self {
            base_ms: interval_ms,
            step_ms: 0,
            max_ms: interval_ms,
        }
    }

    pub fn growing(base_ms: u64, max_ms: u64) -> Self {
        Self {
            base_ms,
            step_ms: base_ms,
            max_ms: max_ms.max(base_ms),
        }
    }

    fn grow(&self, current_ms: u64) -> u64 {
        current_ms.saturating_add(self.step_ms).min(self.max_ms.max(current_ms))
    }
}

impl Default for HeartbeatPolicy {
    fn default() -> Self {
        Self::growing(30_000, 120_000)
    }
}

/// Outcome of one liveness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatVerdict {
    /// Inbound traffic was seen since the last check.
    Alive {
        /// `false` right after a degraded error; sending stays disabled.
        restore_sending: bool,
    },
    /// Nothing arrived since the last check.
    Stalled,
}

/// Liveness flag plus the interval schedule for the next check.
///
/// The monitor never owns a timer; the caller arms one with `next_delay` and
/// must cancel the previous one first.
#[derive(Debug, Clone)]
pub struct HeartbeatMonitor {
    policy: HeartbeatPolicy,
    alive: bool,
    interval_ms: u64,
    degraded: bool,
}

impl HeartbeatMonitor {
    pub fn new(policy: HeartbeatPolicy) -> Self {
        Self {
            policy,
            alive: false,
            interval_ms: policy.base_ms,
            degraded: false,
        }
    }

    pub fn base(&self) -> Duration {
        Duration::from_millis(self.policy.base_ms)
    }

    pub fn mark_alive(&mut self) {
        self.alive = true;
    }

    /// Restart the interval schedule at the base value.
    pub fn reset(&mut self) {
        self.interval_ms = self.policy.base_ms;
        self.degraded = false;
    }

    /// Use `interval` for the check after the next one.
    pub fn set_interval(&mut self, interval: Duration) {
        self.interval_ms = interval.as_millis().min(u128::from(u64::MAX)) as u64;
    }

    /// Enter degraded mode: the next successful check keeps sending disabled.
    pub fn degrade(&mut self) {
        self.degraded = true;
        self.interval_ms = DEGRADED_FOLLOW_UP_MS;
    }

    /// Consume the liveness flag.
    pub fn check(&mut self) -> HeartbeatVerdict {
        let restore_sending = !std::mem::take(&mut self.degraded);
        if std::mem::take(&mut self.alive) {
            HeartbeatVerdict::Alive { restore_sending }
        } else {
            HeartbeatVerdict::Stalled
        }
    }

    /// Delay until the next check; grows the schedule for the one after.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.interval_ms;
        self.interval_ms = self.policy.grow(delay);
        Duration::from_millis(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule(monitor: &mut HeartbeatMonitor, count: usize) -> Vec<u64> {
        (0..count)
            .map(|_| monitor.next_delay().as_millis() as u64)
            .collect()
    }

    #[test]
    fn interval_grows_to_two_minutes() {
        let mut monitor = HeartbeatMonitor::new(HeartbeatPolicy::default());
        assert_eq!(
            schedule(&mut monitor, 6),
            vec![30_000, 60_000, 90_000, 120_000, 120_000, 120_000]
        );
    }

    #[test]
    fn fixed_policy_never_grows() {
        let mut monitor = HeartbeatMonitor::new(HeartbeatPolicy::fixed(45_000));
        assert_eq!(schedule(&mut monitor, 3), vec![45_000, 45_000, 45_000]);
    }

    #[test]
    fn reset_returns_to_base() {
        let mut monitor = HeartbeatMonitor::new(HeartbeatPolicy::default());
        schedule(&mut monitor, 4);
        monitor.reset();
        assert_eq!(monitor.next_delay(), Duration::from_secs(30));
    }

    #[test]
    fn check_consumes_alive_flag() {
        let mut monitor = HeartbeatMonitor::new(HeartbeatPolicy::default());
        monitor.mark_alive();
        assert_eq!(
            monitor.check(),
            HeartbeatVerdict::Alive {
                restore_sending: true
            }
        );
        assert_eq!(monitor.check(), HeartbeatVerdict::Stalled);
    }

    #[test]
    fn degraded_check_keeps_sending_disabled_once() {
        let mut monitor = HeartbeatMonitor::new(HeartbeatPolicy::default());
        monitor.degrade();
        assert_eq!(monitor.next_delay(), Duration::from_millis(DEGRADED_FOLLOW_UP_MS));
        monitor.mark_alive();
        assert_eq!(
            monitor.check(),
            HeartbeatVerdict::Alive {
                restore_sending: false
            }
        );
        monitor.mark_alive();
        assert_eq!(
            monitor.check(),
            HeartbeatVerdict::Alive {
                restore_sending: true
            }
        );
    }

    #[test]
    fn short_intervals_climb_back_up() {
        let mut monitor = HeartbeatMonitor::new(HeartbeatPolicy::default());
        monitor.set_interval(Duration::from_millis(UNCONFIRMED_CLOSE_RETRY_MS));
        assert_eq!(
            schedule(&mut monitor, 5),
            vec![10_000, 40_000, 70_000, 100_000, 120_000]
        );
    }
}
