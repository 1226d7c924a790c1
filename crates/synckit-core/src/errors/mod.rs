//! Error taxonomy for the sync engine.
//!
//! Each subsystem has its own `thiserror` enum; [`SyncError`] aggregates them.
//! Errors that surface on the wire carry a stable [`code`](SyncError::code)
//! string so that clients can dispatch without parsing messages.

mod auth_error;
mod protocol_error;
mod queue_error;
mod storage_error;

pub use auth_error::AuthError;
pub use protocol_error::ProtocolError;
pub use queue_error::QueueError;
pub use storage_error::StorageError;

/// Result alias used throughout the workspace.
pub type SyncResult<T> = Result<T, SyncError>;

/// Top-level error for the sync engine.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("rate limit exceeded for connection {connection_id}")]
    RateLimitExceeded { connection_id: String },

    #[error("malformed operation: {0}")]
    MalformedOperation(String),

    #[error("connection closed")]
    ConnectionClosed,
}

impl SyncError {
    /// Stable code string carried by wire `ERROR` / `AUTH_ERROR` payloads.
    pub fn code(&self) -> &'static str {
        match self {
            SyncError::Protocol(e) => e.code(),
            SyncError::Auth(e) => e.code(),
            SyncError::Storage(_) => "STORAGE_FAILURE",
            SyncError::Queue(QueueError::Overflow { .. }) => "QUEUE_OVERFLOW",
            SyncError::Queue(_) => "QUEUE_FAILURE",
            SyncError::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            SyncError::MalformedOperation(_) => "MALFORMED_OPERATION",
            SyncError::ConnectionClosed => "CONNECTION_CLOSED",
        }
    }

    /// Whether the server should close the connection after reporting.
    ///
    /// Protocol violations and heartbeat timeouts close; auth, rate-limit,
    /// and storage errors keep the connection alive.
    pub fn closes_connection(&self) -> bool {
        matches!(self, SyncError::Protocol(_))
    }
}
