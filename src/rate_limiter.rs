// Minimum-spacing rate limiter, one schedule per remote service.
//
// Callers reserve the next permitted start time under a short-lived map
// lock and then sleep outside of it, so concurrent callers for the same
// service queue up `min_interval` apart while other services never wait.

use std::time::Duration;

use dashmap::{mapref::entry::Entry, DashMap};
use tokio::time::Instant;
use tracing::trace;

use crate::cache::deadline_after;

#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    // last permitted (possibly future) call start per service
    last_call: DashMap<String, Instant>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_call: DashMap::new(),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Waits until `service` may be called again and records the call.
    ///
    /// The new call time is written before this future suspends, so a
    /// second caller arriving meanwhile is scheduled after it.
    pub async fn wait_for_slot(&self, service: &str) {
        let now = Instant::now();

        let scheduled = match self.last_call.entry(service.to_string()) {
            Entry::Occupied(mut entry) => {
                let at = deadline_after(*entry.get(), self.min_interval).max(now);
                entry.insert(at);
                at
            }
            Entry::Vacant(entry) => {
                entry.insert(now);
                now
            }
        };

        if scheduled > now {
            trace!(
                service,
                wait_ms = (scheduled - now).as_millis() as u64,
                "waiting for rate limit slot"
            );
            tokio::time::sleep_until(scheduled).await;
        }
    }

    // When the next call to `service` may start, if it has been called before
    pub fn next_permitted(&self, service: &str) -> Option<Instant> {
        self.last_call
            .get(service)
            .map(|last| deadline_after(*last, self.min_interval))
    }
}
