use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// Caps how fast new requests start across every worker sharing the limiter.
///
/// Each caller reserves the next free slot and sleeps until it arrives, so
/// waiting callers are spaced `1 / requests_per_second` apart.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Option<Duration>,
    next_slot: Mutex<Instant>,
}

impl RateLimiter {
    /// A rate of zero or less disables limiting.
    pub fn new(requests_per_second: f64) -> Self {
        let interval = (requests_per_second.is_finite() && requests_per_second > 0.0)
            .then(|| Duration::from_secs_f64(1.0 / requests_per_second));
        Self {
            interval,
            next_slot: Mutex::new(Instant::now()),
        }
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    pub async fn acquire(&self) {
        let Some(wait_until) = self.reserve() else {
            return;
        };
        tokio::time::sleep_until(wait_until).await;
    }

    fn reserve(&self) -> Option<Instant> {
        let interval = self.interval?;
        let now = Instant::now();
        let mut next = self.next_slot.lock();
        let slot = (*next).max(now);
        *next = slot + interval;
        (slot > now).then_some(slot)
    }
}
