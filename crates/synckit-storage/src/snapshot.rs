//! Snapshot blob codec.
//!
//! A snapshot captures one document's state and vector clock; applying any
//! operations causally after `vector_clock` to it yields the same state as
//! replaying from origin. Blobs are JSON, optionally zstd-compressed;
//! compression is detected on read by the zstd magic, so mixed stores read
//! fine.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::instrument;

use synckit_core::errors::StorageError;
use synckit_core::{DocumentId, SyncResult};
use synckit_crdt::doc::DocState;
use synckit_crdt::{ReplicatedDoc, VectorClock};

const ZSTD_MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];
const ZSTD_LEVEL: i32 = 3;

/// One serialized snapshot.
///
/// `data` is the rendered user view and `spans` the format spans of text
/// documents — the interchange shape. `state` carries the full CRDT state
/// for exact restore; a reader without it can still seed from `data`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotBlob {
    pub document_id: DocumentId,
    pub vector_clock: VectorClock,
    /// Milliseconds since the epoch.
    pub timestamp: i64,
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spans: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<Value>,
}

impl SnapshotBlob {
    /// Capture a document right now.
    pub fn capture(doc: &ReplicatedDoc) -> SyncResult<Self> {
        let spans = match &doc.state {
            DocState::Text(text) => Some(
                serde_json::to_value(text.formats.spans())
                    .map_err(|e| StorageError::Serialization(e.to_string()))?,
            ),
            _ => None,
        };
        Ok(Self {
            document_id: doc.id.clone(),
            vector_clock: doc.clock.clone(),
            timestamp: Utc::now().timestamp_millis(),
            data: doc.render(),
            spans,
            state: Some(
                serde_json::to_value(doc)
                    .map_err(|e| StorageError::Serialization(e.to_string()))?,
            ),
        })
    }

    /// Restore the full document. Requires the `state` field.
    pub fn restore(&self) -> SyncResult<ReplicatedDoc> {
        let state = self.state.clone().ok_or_else(|| {
            StorageError::Corrupt {
                key: self.document_id.to_string(),
                reason: "snapshot has no full state".to_string(),
            }
        })?;
        let doc: ReplicatedDoc = serde_json::from_value(state).map_err(|e| {
            StorageError::Corrupt {
                key: self.document_id.to_string(),
                reason: e.to_string(),
            }
        })?;
        Ok(doc)
    }

    /// Serialize, compressing when asked. Size accounting uses the returned
    /// byte length.
    #[instrument(skip(self), fields(doc_id = %self.document_id))]
    pub fn encode(&self, compress: bool) -> SyncResult<Vec<u8>> {
        let json = serde_json::to_vec(self)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        if !compress {
            return Ok(json);
        }
        zstd::encode_all(json.as_slice(), ZSTD_LEVEL)
            .map_err(|e| StorageError::Serialization(e.to_string()).into())
    }

    /// Deserialize a blob, transparently decompressing zstd payloads.
    pub fn decode(key: &str, bytes: &[u8]) -> SyncResult<Self> {
        let corrupt = |reason: String| StorageError::Corrupt {
            key: key.to_string(),
            reason,
        };
        let json = if bytes.starts_with(&ZSTD_MAGIC) {
            zstd::decode_all(bytes).map_err(|e| corrupt(e.to_string()))?
        } else {
            bytes.to_vec()
        };
        serde_json::from_slice(&json).map_err(|e| corrupt(e.to_string()).into())
    }

    /// Whether encoded bytes hold a compressed blob.
    pub fn is_compressed(bytes: &[u8]) -> bool {
        bytes.starts_with(&ZSTD_MAGIC)
    }
}
