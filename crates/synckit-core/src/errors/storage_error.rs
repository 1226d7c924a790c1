/// Persistence adapter errors. Transient failures are retried once by the
/// caller before being reported; failures never cross document boundaries.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("adapter write failed for key {key}: {reason}")]
    WriteFailed { key: String, reason: String },

    #[error("adapter read failed for key {key}: {reason}")]
    ReadFailed { key: String, reason: String },

    #[error("adapter delete failed for key {key}: {reason}")]
    DeleteFailed { key: String, reason: String },

    #[error("stored blob at {key} is corrupt: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("serialization failed: {0}")]
    Serialization(String),
}
