//! Minimum-interval limiter for one provider.
//!
//! `acquire()` serializes callers: the returned guard must be held for the
//! whole request, and a caller that arrives sooner than `min_interval` after
//! the previous request started sleeps out the remainder first.

use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::Instant;

pub struct IntervalLimiter {
    min_interval: Duration,
    last_start: Mutex<Option<Instant>>,
}

pub struct Permit<'a> {
    _guard: MutexGuard<'a, Option<Instant>>,
}

impl IntervalLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_start: Mutex::new(None),
        }
    }

    pub async fn acquire(&self) -> Permit<'_> {
        let mut guard = self.last_start.lock().await;
        if let Some(last) = *guard {
            let elapsed = last.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *guard = Some(Instant::now());
        Permit { _guard: guard }
    }
}
