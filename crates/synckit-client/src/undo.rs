//! Per-document undo/redo stacks.
//!
//! Entries carry the forward operations and their inverses; the editor
//! binding computes inverses, the stack only manages history. Consecutive
//! entries merge when they share a kind and user inside the merge window, a
//! new entry clears the redo stack, and depth is bounded. Stacks persist
//! through the storage adapter so follower tabs stay current via the change
//! signal; only the leader tab adopts remote state into memory.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use synckit_core::config::UndoConfig;
use synckit_core::errors::StorageError;
use synckit_core::{DocumentId, SyncResult};
use synckit_crdt::OperationEnvelope;
use synckit_storage::StorageAdapter;

/// One undoable step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UndoEntry {
    /// Merge key: entries of the same kind may coalesce (e.g. "typing").
    pub kind: String,
    pub user_id: String,
    /// Scalar payloads concatenate on merge; non-scalars keep the later one.
    pub payload: Value,
    pub forward: Vec<OperationEnvelope>,
    pub inverse: Vec<OperationEnvelope>,
    /// Creation time, milliseconds since epoch.
    pub at_ms: i64,
}

impl UndoEntry {
    pub fn new(
        kind: impl Into<String>,
        user_id: impl Into<String>,
        payload: Value,
        forward: Vec<OperationEnvelope>,
        inverse: Vec<OperationEnvelope>,
    ) -> Self {
        Self {
            kind: kind.into(),
            user_id: user_id.into(),
            payload,
            forward,
            inverse,
            at_ms: Utc::now().timestamp_millis(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Stacks {
    undo: Vec<UndoEntry>,
    redo: Vec<UndoEntry>,
}

/// The undo/redo state of one document.
#[derive(Debug)]
pub struct UndoRedo {
    doc_id: DocumentId,
    stacks: Stacks,
    config: UndoConfig,
}

impl UndoRedo {
    pub fn new(doc_id: DocumentId, config: UndoConfig) -> Self {
        Self {
            doc_id,
            stacks: Stacks::default(),
            config,
        }
    }

    /// Push a step. May merge into the top entry; always clears redo.
    pub fn add(&mut self, entry: UndoEntry) {
        self.stacks.redo.clear();

        let merged = match self.stacks.undo.last_mut() {
            Some(top)
                if top.kind == entry.kind
                    && top.user_id == entry.user_id
                    && entry.at_ms.saturating_sub(top.at_ms)
                        <= self.config.merge_window_ms as i64 =>
            {
                top.payload = merge_payloads(&top.payload, &entry.payload);
                top.forward.extend(entry.forward.iter().cloned());
                // Undoing the merged entry must unwind the later ops first.
                let mut inverse = entry.inverse.clone();
                inverse.extend(top.inverse.drain(..));
                top.inverse = inverse;
                top.at_ms = entry.at_ms;
                true
            }
            _ => false,
        };
        if !merged {
            self.stacks.undo.push(entry);
            if self.stacks.undo.len() > self.config.max_depth {
                self.stacks.undo.remove(0);
            }
        }
    }

    /// Pop the latest step for undoing; the caller applies its `inverse`.
    pub fn undo(&mut self) -> Option<UndoEntry> {
        let entry = self.stacks.undo.pop()?;
        self.stacks.redo.push(entry.clone());
        Some(entry)
    }

    /// Re-apply the latest undone step; the caller applies its `forward`.
    pub fn redo(&mut self) -> Option<UndoEntry> {
        let entry = self.stacks.redo.pop()?;
        self.stacks.undo.push(entry.clone());
        Some(entry)
    }

    pub fn undo_depth(&self) -> usize {
        self.stacks.undo.len()
    }

    pub fn redo_depth(&self) -> usize {
        self.stacks.redo.len()
    }

    /// Persistence key for this document's stacks.
    pub fn storage_key(doc_id: &DocumentId) -> String {
        format!("undo:{doc_id}")
    }

    /// Persist both stacks.
    pub async fn persist(&self, adapter: &Arc<dyn StorageAdapter>) -> SyncResult<()> {
        let bytes = serde_json::to_vec(&self.stacks)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        adapter.save(&Self::storage_key(&self.doc_id), &bytes).await
    }

    /// Replace in-memory stacks with persisted state. Called on the change
    /// signal — and only by the leader tab.
    pub async fn adopt_persisted(&mut self, adapter: &Arc<dyn StorageAdapter>) -> SyncResult<()> {
        let key = Self::storage_key(&self.doc_id);
        if let Some(bytes) = adapter.load(&key).await? {
            self.stacks = serde_json::from_slice(&bytes).map_err(|e| StorageError::Corrupt {
                key,
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }
}

/// Scalar payloads concatenate; anything else keeps the later payload.
fn merge_payloads(earlier: &Value, later: &Value) -> Value {
    match (earlier, later) {
        (Value::String(a), Value::String(b)) => Value::String(format!("{a}{b}")),
        _ => later.clone(),
    }
}
