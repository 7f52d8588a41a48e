use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Exponential backoff with equal jitter.
///
/// The ceiling for retry `n` (1-based) is `min(max_delay, base * multiplier^(n-1))`.
/// `jitter` of that ceiling is drawn uniformly at random, the rest is fixed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(8),
            jitter: 0.5,
        }
    }
}

impl BackoffPolicy {
    pub fn ceiling(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(63) as i32;
        let scaled = self.base.as_secs_f64() * self.multiplier.max(1.0).powi(exponent);
        let capped = scaled.min(self.max_delay.as_secs_f64());
        if capped.is_finite() && capped > 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            Duration::ZERO
        }
    }

    pub fn delay_for(&self, retry: u32) -> Duration {
        self.delay_with(retry, &mut rand::rng())
    }

    fn delay_with(&self, retry: u32, rng: &mut impl Rng) -> Duration {
        let ceiling = self.ceiling(retry).as_secs_f64();
        let jitter = self.jitter.clamp(0.0, 1.0);
        let fixed = ceiling * (1.0 - jitter);
        let random = if jitter > 0.0 {
            rng.random_range(0.0..=ceiling * jitter)
        } else {
            0.0
        };
        Duration::from_secs_f64(fixed + random)
    }
}
