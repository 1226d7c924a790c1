//! Server coordinator configuration.
//!
//! # Examples
//!
//! ```
//! use synckit_core::config::ServerConfig;
//!
//! let config = ServerConfig::default();
//! assert!(config.auth_required);
//! assert_eq!(config.awareness_ttl_ms, 30_000);
//! ```

use serde::{Deserialize, Serialize};

/// Snapshot scheduler triggers and retention. Triggers are OR-composed: any
/// one firing schedules a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Serialized-state size that triggers a snapshot. Default: 256 KiB.
    pub max_bytes: usize,
    /// Wall-clock elapsed since the last snapshot. Default: 5 min.
    pub max_age_ms: u64,
    /// Operations applied since the last snapshot. Default: 500.
    pub max_ops: u64,
    /// Snapshots retained per document; older ones are deleted. Default: 5.
    pub max_snapshots: usize,
    /// Key prefix for retained snapshots. Default: "snapshot".
    pub snapshot_prefix: String,
    /// Whether snapshot blobs are zstd-compressed. Default: true.
    pub compress: bool,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            max_bytes: 256 * 1024,
            max_age_ms: 5 * 60 * 1000,
            max_ops: 500,
            max_snapshots: 5,
            snapshot_prefix: "snapshot".to_string(),
            compress: true,
        }
    }
}

/// Aggregate server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Reject anonymous connections with `AUTH_REQUIRED`. Default: true.
    pub auth_required: bool,
    /// Deadline for a client ACK before an outbound delta is resent.
    /// Default: 5 s.
    pub ack_timeout_ms: u64,
    /// Resend attempts before a pending ack is abandoned. Default: 3.
    pub max_ack_retries: u32,
    /// Delta coalescing window per document. Default: 25 ms.
    pub batch_window_ms: u64,
    /// Awareness entry TTL; entries idle longer are evicted. Default: 30 s.
    pub awareness_ttl_ms: u64,
    /// Awareness sweep interval. Default: 5 s.
    pub awareness_sweep_ms: u64,
    /// Grace period for in-flight flushes during shutdown. Default: 10 s.
    pub shutdown_grace_ms: u64,
    /// Operations per connection per window before `RATE_LIMIT_EXCEEDED`.
    /// 0 = unlimited. Default: 0.
    pub rate_limit_ops: u32,
    /// Rate-limit counting window. Default: 10 s.
    pub rate_limit_window_ms: u64,
    pub snapshots: SnapshotConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            auth_required: true,
            ack_timeout_ms: 5_000,
            max_ack_retries: 3,
            batch_window_ms: 25,
            awareness_ttl_ms: 30_000,
            awareness_sweep_ms: 5_000,
            shutdown_grace_ms: 10_000,
            rate_limit_ops: 0,
            rate_limit_window_ms: 10_000,
            snapshots: SnapshotConfig::default(),
        }
    }
}
