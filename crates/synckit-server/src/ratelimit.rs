//! The rate-limit counting contract.
//!
//! Policy is out of scope; the server only counts operations per connection
//! per window and reports a breach with `RATE_LIMIT_EXCEEDED` — without
//! closing the connection.

use dashmap::DashMap;
use tokio::time::Instant;

use crate::connection::ConnectionId;

/// Decides whether one more operation from a connection is admitted.
pub trait RateLimiter: Send + Sync {
    /// Count one operation; false means over the limit.
    fn admit(&self, connection: &ConnectionId) -> bool;

    /// Forget a closed connection's counters.
    fn forget(&self, connection: &ConnectionId);
}

/// Admits everything.
#[derive(Default)]
pub struct NoLimit;

impl RateLimiter for NoLimit {
    fn admit(&self, _connection: &ConnectionId) -> bool {
        true
    }

    fn forget(&self, _connection: &ConnectionId) {}
}

/// Fixed-window counter: at most `limit` operations per `window`.
pub struct WindowedRateLimiter {
    limit: u32,
    window: std::time::Duration,
    counters: DashMap<ConnectionId, (Instant, u32)>,
}

impl WindowedRateLimiter {
    pub fn new(limit: u32, window: std::time::Duration) -> Self {
        Self {
            limit,
            window,
            counters: DashMap::new(),
        }
    }
}

impl RateLimiter for WindowedRateLimiter {
    fn admit(&self, connection: &ConnectionId) -> bool {
        let now = Instant::now();
        let mut entry = self
            .counters
            .entry(connection.clone())
            .or_insert((now, 0));
        let (window_start, count) = *entry;
        if now.duration_since(window_start) >= self.window {
            *entry = (now, 1);
            return true;
        }
        if count >= self.limit {
            return false;
        }
        *entry = (window_start, count + 1);
        true
    }

    fn forget(&self, connection: &ConnectionId) {
        self.counters.remove(connection);
    }
}
