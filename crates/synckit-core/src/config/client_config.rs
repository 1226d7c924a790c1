//! Client runtime configuration.
//!
//! # Examples
//!
//! ```
//! use synckit_core::config::ClientConfig;
//!
//! let config = ClientConfig::default();
//! assert_eq!(config.queue.max_size, 1000);
//! assert_eq!(config.heartbeat.interval_ms, 15_000);
//! ```

use serde::{Deserialize, Serialize};

/// Reconnection backoff policy. Delay grows by `multiplier` per failed
/// attempt, capped at `max_delay_ms`, with up to `jitter_ms` of random slack
/// so a fleet of clients does not reconnect in lockstep.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Delay before the first retry. Default: 500 ms.
    pub initial_delay_ms: u64,
    /// Growth factor per consecutive failure. Default: 2.0.
    pub multiplier: f64,
    /// Upper bound on the delay. Default: 30 s.
    pub max_delay_ms: u64,
    /// Random slack added to each delay. Default: 250 ms.
    pub jitter_ms: u64,
    /// Give up and transition to `Failed` after this many attempts.
    /// 0 = retry forever. Default: 0.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 500,
            multiplier: 2.0,
            max_delay_ms: 30_000,
            jitter_ms: 250,
            max_attempts: 0,
        }
    }
}

/// Heartbeat timing. A PING goes out every `interval_ms`; a missing PONG
/// within `timeout_ms` closes the connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Interval between PINGs. Default: 15 s.
    pub interval_ms: u64,
    /// PONG deadline after a PING. Default: 10 s.
    pub timeout_ms: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: 15_000,
            timeout_ms: 10_000,
        }
    }
}

/// Offline operation queue limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum queued operations before the oldest is dropped. Default: 1000.
    pub max_size: usize,
    /// Initial delivery retry delay. Default: 1 s.
    pub retry_initial_delay_ms: u64,
    /// Upper bound on the delivery retry delay. Default: 60 s.
    pub retry_max_delay_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            retry_initial_delay_ms: 1_000,
            retry_max_delay_ms: 60_000,
        }
    }
}

/// Cross-tab leader election timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TabsConfig {
    /// How long a starting tab waits for an existing leader to announce
    /// before claiming leadership. Default: 750 ms.
    pub claim_window_ms: u64,
    /// Leader heartbeat interval. Default: 2 s.
    pub heartbeat_interval_ms: u64,
    /// Consecutive missed leader heartbeats that trigger re-election.
    /// Default: 3.
    pub missed_heartbeats: u32,
}

impl Default for TabsConfig {
    fn default() -> Self {
        Self {
            claim_window_ms: 750,
            heartbeat_interval_ms: 2_000,
            missed_heartbeats: 3,
        }
    }
}

/// Undo/redo stack limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UndoConfig {
    /// Window within which consecutive same-kind, same-user entries merge.
    /// Default: 1 s.
    pub merge_window_ms: u64,
    /// Maximum entries per document stack. Default: 100.
    pub max_depth: usize,
}

impl Default for UndoConfig {
    fn default() -> Self {
        Self {
            merge_window_ms: 1_000,
            max_depth: 100,
        }
    }
}

/// Aggregate client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub reconnect: ReconnectConfig,
    pub heartbeat: HeartbeatConfig,
    pub queue: QueueConfig,
    pub tabs: TabsConfig,
    pub undo: UndoConfig,
}
