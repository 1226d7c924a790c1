//! Character identifiers and sequence nodes.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use synckit_core::ReplicaId;

/// Unique identifier of one character position. Never reused; survives
/// deletion.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CharId {
    pub counter: u64,
    pub replica: ReplicaId,
}

impl CharId {
    pub fn new(counter: u64, replica: ReplicaId) -> Self {
        Self { counter, replica }
    }

    /// The pinned sibling tie-break: replica id ascending, then counter
    /// ascending. Every replica must order concurrent same-origin nodes with
    /// exactly this function.
    pub fn sibling_cmp(&self, other: &Self) -> Ordering {
        (&self.replica, self.counter).cmp(&(&other.replica, other.counter))
    }
}

/// One node of the sequence. The identifier and origins are stable for the
/// node's whole life; deletion only tombstones the value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FugueNode {
    pub id: CharId,
    /// Visible left neighbor at insertion time; `None` at document start.
    pub left_origin: Option<CharId>,
    /// Visible right neighbor at insertion time; `None` at document end.
    pub right_origin: Option<CharId>,
    pub ch: char,
    /// Tombstone flag; a deleted node keeps its place in the total order.
    pub deleted: bool,
}
