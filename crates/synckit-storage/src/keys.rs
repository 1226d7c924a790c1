//! Adapter-neutral key layout.
//!
//! Documents persist at their bare id. Snapshots either overwrite a single
//! `documentId:snapshot` key, or accumulate under
//! `{prefix}:{documentId}:{timestamp}` for retention sweeps.

use synckit_core::constants::SNAPSHOT_SUFFIX;
use synckit_core::DocumentId;

/// Key holding a document's persisted state.
pub fn document_key(doc_id: &DocumentId) -> String {
    doc_id.as_str().to_string()
}

/// The single, overwritten snapshot key for a document.
pub fn default_snapshot_key(doc_id: &DocumentId) -> String {
    format!("{}:{}", doc_id.as_str(), SNAPSHOT_SUFFIX)
}

/// A retained snapshot key: `{prefix}:{documentId}:{timestamp_ms}`.
pub fn retained_snapshot_key(prefix: &str, doc_id: &DocumentId, timestamp_ms: i64) -> String {
    format!("{}:{}:{}", prefix, doc_id.as_str(), timestamp_ms)
}

/// The listing prefix for one document's retained snapshots.
pub fn retained_snapshot_prefix(prefix: &str, doc_id: &DocumentId) -> String {
    format!("{}:{}:", prefix, doc_id.as_str())
}

/// Parse the timestamp out of a retained snapshot key. The document id may
/// itself contain colons, so the timestamp is everything after the last one.
pub fn snapshot_key_timestamp(key: &str) -> Option<i64> {
    key.rsplit(':').next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retained_keys_round_trip_their_timestamp() {
        let doc = DocumentId::from("playground:text:b1");
        let key = retained_snapshot_key("snapshot", &doc, 1_700_000_000_123);
        assert_eq!(key, "snapshot:playground:text:b1:1700000000123");
        assert!(key.starts_with(&retained_snapshot_prefix("snapshot", &doc)));
        assert_eq!(snapshot_key_timestamp(&key), Some(1_700_000_000_123));
    }

    #[test]
    fn default_snapshot_key_is_overwritten_layout() {
        let doc = DocumentId::from("profile");
        assert_eq!(default_snapshot_key(&doc), "profile:snapshot");
    }
}
