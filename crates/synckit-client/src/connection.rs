//! Connection state machine and reconnect policy.
//!
//! The transport is abstract: a browser WebSocket binding, a native socket,
//! or an in-process pair for tests all implement the same two traits.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use synckit_core::config::ReconnectConfig;
use synckit_core::SyncResult;

/// Lifecycle of one client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

/// The client side of the shared framed-link surface.
pub use synckit_protocol::FramedLink as TransportLink;

/// Something that can open links to the server.
#[async_trait]
pub trait ClientTransport: Send + Sync {
    async fn connect(&self) -> SyncResult<Box<dyn TransportLink>>;
}

/// Jittered exponential reconnect schedule.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempt: u32,
}

impl ReconnectPolicy {
    pub fn new(config: ReconnectConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Delay before the next attempt, or `None` when the attempt budget is
    /// exhausted and the connection should transition to `Failed`.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.config.max_attempts > 0 && self.attempt >= self.config.max_attempts {
            return None;
        }
        let factor = self.config.multiplier.max(1.0).powi(self.attempt as i32);
        let base = (self.config.initial_delay_ms as f64 * factor)
            .min(self.config.max_delay_ms as f64) as u64;
        let jitter = if self.config.jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=self.config.jitter_ms)
        } else {
            0
        };
        self.attempt = self.attempt.saturating_add(1);
        Some(Duration::from_millis(base + jitter))
    }

    /// A successful connection resets the schedule.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_grow_and_cap() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig {
            initial_delay_ms: 100,
            multiplier: 2.0,
            max_delay_ms: 500,
            jitter_ms: 0,
            max_attempts: 0,
        });
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(100)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(200)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(400)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(500)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(500)));
    }

    #[test]
    fn attempt_budget_exhausts_to_failed() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig {
            max_attempts: 2,
            jitter_ms: 0,
            ..ReconnectConfig::default()
        });
        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_some());
        assert_eq!(policy.next_delay(), None);

        policy.reset();
        assert!(policy.next_delay().is_some());
    }

    #[test]
    fn jitter_stays_within_bound() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig {
            initial_delay_ms: 100,
            multiplier: 1.0,
            max_delay_ms: 100,
            jitter_ms: 50,
            max_attempts: 0,
        });
        for _ in 0..20 {
            let delay = policy.next_delay().unwrap();
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(150));
        }
    }
}
