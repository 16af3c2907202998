//! Exponential backoff schedule shared by the retrying invoker and the job
//! poller.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_BASE_DELAY_MS: u64 = 1_000;
pub const DEFAULT_MULTIPLIER: f64 = 2.0;
pub const DEFAULT_MAX_DELAY_MS: u64 = 60_000;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Immutable backoff configuration.
///
/// `delay_for(n)` is `min(base * multiplier^(n-1), max_delay)`. With jitter
/// enabled the delay is drawn uniformly from `[0, that value]`, so the cap
/// holds either way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffSchedule {
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
    pub jitter: bool,
}

impl Default for BackoffSchedule {
    fn default() -> Self {
        Self {
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            multiplier: DEFAULT_MULTIPLIER,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            jitter: true,
        }
    }
}

impl BackoffSchedule {
    pub fn new(base: Duration, multiplier: f64, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay_ms: duration_ms(base),
            multiplier,
            max_delay_ms: duration_ms(max_delay),
            max_attempts,
            jitter: false,
        }
    }

    /// Zero-delay schedule, handy when the remote side is a local fake.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(Duration::ZERO, 1.0, Duration::ZERO, max_attempts)
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// At least one attempt is always made.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay before the retry that follows attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.delay_with_rng(attempt, &mut rand::thread_rng())
    }

    pub fn delay_with_rng<R: Rng>(&self, attempt: u32, rng: &mut R) -> Duration {
        let capped = self.capped_delay(attempt);
        if !self.jitter || capped.is_zero() {
            return capped;
        }
        let ms = rng.gen_range(0..=duration_ms(capped));
        Duration::from_millis(ms)
    }

    /// The exponential delay without jitter.
    pub fn capped_delay(&self, attempt: u32) -> Duration {
        if self.base_delay_ms == 0 {
            return Duration::ZERO;
        }
        let exponent = attempt.max(1) - 1;
        let multiplier = if self.multiplier.is_finite() {
            self.multiplier.max(1.0)
        } else {
            1.0
        };
        let raw = self.base_delay_ms as f64 * multiplier.powi(exponent.min(i32::MAX as u32) as i32);
        let max = self.max_delay_ms as f64;
        // powi saturates to +inf, which min() folds into the cap
        let ms = if raw.is_nan() { max } else { raw.min(max) };
        Duration::from_millis(ms as u64)
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
