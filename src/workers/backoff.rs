use std::time::Duration;

/// How long the poller waits after `consecutive_failures` loop-level errors in a row (0-based).
pub trait BackoffPolicy: Send + Sync {
    fn delay(&self, consecutive_failures: u32) -> Duration;
}

/// Doubles from `base` on every consecutive failure, capped at `max`.
pub struct ExponentialBackoff {
    pub base: Duration,
    pub max: Duration,
}

impl ExponentialBackoff {
    const MAX_FACTOR: u32 = 10;

    /// Caps at ten times the base delay.
    pub fn from_base(base: Duration) -> Self {
        Self {
            base,
            max: base.saturating_mul(Self::MAX_FACTOR),
        }
    }
}

impl BackoffPolicy for ExponentialBackoff {
    fn delay(&self, consecutive_failures: u32) -> Duration {
        let factor = 2u32.saturating_pow(consecutive_failures);
        self.base.saturating_mul(factor).min(self.max)
    }
}
