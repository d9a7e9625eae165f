use std::time::Duration;

use tokio::time::Instant;

use crate::cancel::CancelToken;

/// Token bucket with a burst of one: admissions are spaced at least
/// `1 / rate_per_second` apart across all workers. Slot assignment happens
/// under a short lock; the wait itself is uncontended and cancellable.
pub struct RateLimiter {
    interval: Duration,
    next_slot: tokio::sync::Mutex<Instant>,
}

impl RateLimiter {
    pub fn new(rate_per_second: f64) -> Self {
        Self {
            interval: Duration::from_secs_f64(1.0 / rate_per_second.max(f64::MIN_POSITIVE)),
            next_slot: tokio::sync::Mutex::new(Instant::now()),
        }
    }

    /// Waits for the next admission slot. Returns `false` when the run was
    /// cancelled before the slot arrived.
    pub async fn acquire(&self, cancel: &CancelToken) -> bool {
        let slot = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = (*next).max(now);
            *next = slot + self.interval;
            slot
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep_until(slot) => true,
        }
    }
}
