use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default first reconnect delay.
pub const DEFAULT_FLOOR_MS: u64 = 5_000;
/// Ceiling for the plain doubling variant.
pub const DOUBLING_CEILING_MS: u64 = 120_000;
/// Delay above which the stepped variant stops doubling.
pub const STEP_THRESHOLD_MS: u64 = 60_000;
/// Linear increment used by the stepped variant above the threshold.
pub const STEP_MS: u64 = 30_000;
/// Ceiling for the stepped variant.
pub const STEPPED_CEILING_MS: u64 = 300_000;

/// Reconnect delay policy.
///
/// The delay is a pure function of the number of consecutive failures since
/// the last successful open, so it can be exercised without timers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum BackoffPolicy {
    /// Double on every failure, capped at `ceiling_ms`.
    Doubling { floor_ms: u64, ceiling_ms: u64 },
    /// Double up to `step_threshold_ms`, then grow by `step_ms`, capped at `ceiling_ms`.
    Stepped {
        floor_ms: u64,
        step_threshold_ms: u64,
        step_ms: u64,
        ceiling_ms: u64,
    },
}

impl BackoffPolicy {
    pub fn doubling(floor_ms: u64) -> Self {
        Self::Doubling {
            floor_ms,
            ceiling_ms: DOUBLING_CEILING_MS.max(floor_ms),
        }
    }

    pub fn stepped(floor_ms: u64) -> Self {
        Self::Stepped {
            floor_ms,
            step_threshold_ms: STEP_THRESHOLD_MS,
            step_ms: STEP_MS,
            ceiling_ms: STEPPED_CEILING_MS.max(floor_ms),
        }
    }

    pub fn floor_ms(&self) -> u64 {
        match *self {
            Self::Doubling { floor_ms, .. } | Self::Stepped { floor_ms, .. } => floor_ms,
        }
    }

    pub fn ceiling_ms(&self) -> u64 {
        match *self {
            Self::Doubling { ceiling_ms, .. } | Self::Stepped { ceiling_ms, .. } => ceiling_ms,
        }
    }

    /// Delay before the retry that follows failure number `attempt` (0-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let mut delay = self.floor_ms().min(self.ceiling_ms());
        for _ in 0..attempt {
            let next = self.next_delay_ms(delay);
            if next == delay {
                break;
            }
            delay = next;
        }
        Duration::from_millis(delay)
    }

    fn next_delay_ms(&self, current: u64) -> u64 {
        match *self {
            Self::Doubling { ceiling_ms, .. } => current.saturating_mul(2).min(ceiling_ms),
            Self::Stepped {
                step_threshold_ms,
                step_ms,
                ceiling_ms,
                ..
            } => {
                let grown = if current > step_threshold_ms {
                    current.saturating_add(step_ms)
                } else {
                    current.saturating_mul(2)
                };
                grown.min(ceiling_ms)
            }
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::stepped(DEFAULT_FLOOR_MS)
    }
}
