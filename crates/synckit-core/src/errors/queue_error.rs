/// Offline operation queue errors.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue full ({size} entries): dropped oldest operation for document {doc_id}")]
    Overflow { doc_id: String, size: usize },

    #[error("queue entry {seq} is corrupt: {reason}")]
    CorruptEntry { seq: u64, reason: String },
}
