//! The Fugue sequence CRDT.
//!
//! Every replica holds the same ordered set of nodes; the order is computed
//! from node identifiers and origins alone, so replicas that received the
//! same operations in any order render byte-identical text.
//!
//! Integration walks the window between a node's left and right origins.
//! Concurrent nodes sharing both origins are ordered by the pinned sibling
//! tie-break (replica id ascending, then counter ascending); a node whose
//! origin lies inside a locally contiguous run is positioned as if the run
//! were split at the origin point, which yields one insertion point
//! regardless of arrival order.
//!
//! # Examples
//!
//! ```
//! use synckit_crdt::FugueText;
//! use synckit_core::ReplicaId;
//!
//! let mut text = FugueText::new(ReplicaId::from("a"));
//! text.insert(0, "HELO");
//! text.insert(2, "L");
//! assert_eq!(text.to_string(), "HELLO");
//! ```

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt;

use tracing::debug;

use super::node::{CharId, FugueNode};
use crate::op::Operation;
use synckit_core::ReplicaId;

/// A replicated character sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "FugueTextState", into = "FugueTextState")]
pub struct FugueText {
    replica: ReplicaId,
    /// Lamport counter for minting [`CharId`]s; raised past every remote
    /// counter observed.
    counter: u64,
    /// Total document order, tombstones included.
    nodes: Vec<FugueNode>,
    /// Id → position in `nodes`.
    index: HashMap<CharId, usize>,
    /// Remote operations waiting for their origins to arrive.
    pending: Vec<Operation>,
    /// Deferred-emission buffer between `begin_batch` and `end_batch`.
    /// Not part of the serialized state.
    batch: Option<Vec<Operation>>,
}

/// Serialized form; the id index is rebuilt on load.
#[derive(Clone, Serialize, Deserialize)]
struct FugueTextState {
    replica: ReplicaId,
    counter: u64,
    nodes: Vec<FugueNode>,
    pending: Vec<Operation>,
}

impl From<FugueTextState> for FugueText {
    fn from(state: FugueTextState) -> Self {
        let index = state
            .nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (node.id.clone(), i))
            .collect();
        Self {
            replica: state.replica,
            counter: state.counter,
            nodes: state.nodes,
            index,
            pending: state.pending,
            batch: None,
        }
    }
}

impl From<FugueText> for FugueTextState {
    fn from(text: FugueText) -> Self {
        Self {
            replica: text.replica,
            counter: text.counter,
            nodes: text.nodes,
            pending: text.pending,
        }
    }
}

impl FugueText {
    pub fn new(replica: ReplicaId) -> Self {
        Self {
            replica,
            counter: 0,
            nodes: Vec::new(),
            index: HashMap::new(),
            pending: Vec::new(),
            batch: None,
        }
    }

    pub fn replica(&self) -> &ReplicaId {
        &self.replica
    }

    /// Insert a string at a visible position, emitting one `InsertChar` per
    /// codepoint. Positions past the end clamp to the end.
    pub fn insert(&mut self, pos: usize, text: &str) -> Vec<Operation> {
        let mut pos = pos.min(self.visible_len());
        let mut ops = Vec::with_capacity(text.chars().count());
        for ch in text.chars() {
            let left = if pos == 0 {
                None
            } else {
                self.visible_id(pos - 1)
            };
            let right = self.visible_id(pos);
            self.counter += 1;
            let id = CharId::new(self.counter, self.replica.clone());
            let node = FugueNode {
                id: id.clone(),
                left_origin: left.clone(),
                right_origin: right.clone(),
                ch,
                deleted: false,
            };
            self.integrate(node);
            ops.push(Operation::InsertChar {
                id,
                left,
                right,
                ch,
            });
            pos += 1;
        }
        self.emit(ops)
    }

    /// Tombstone `len` visible characters starting at `pos`, emitting one
    /// `DeleteChar` per character. Ranges past the end clamp.
    pub fn delete(&mut self, pos: usize, len: usize) -> Vec<Operation> {
        let ids: Vec<CharId> = self
            .nodes
            .iter()
            .filter(|n| !n.deleted)
            .skip(pos)
            .take(len)
            .map(|n| n.id.clone())
            .collect();
        let mut ops = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(&idx) = self.index.get(&id) {
                self.nodes[idx].deleted = true;
            }
            ops.push(Operation::DeleteChar { id });
        }
        self.emit(ops)
    }

    /// Apply a remote text operation. Duplicate applies are no-ops (by
    /// character id); operations whose origins have not arrived yet are
    /// buffered and retried after each successful integration.
    ///
    /// Returns whether the operation changed state now.
    pub fn apply_remote(&mut self, op: &Operation) -> bool {
        let applied = self.try_apply(op);
        if applied {
            self.drain_pending();
        }
        applied
    }

    fn try_apply(&mut self, op: &Operation) -> bool {
        match op {
            Operation::InsertChar {
                id,
                left,
                right,
                ch,
            } => {
                if self.index.contains_key(id) {
                    return false;
                }
                if !self.origin_present(left) || !self.origin_present(right) {
                    debug!(counter = id.counter, replica = %id.replica, "buffering insert until origins arrive");
                    self.pending.push(op.clone());
                    return false;
                }
                self.integrate(FugueNode {
                    id: id.clone(),
                    left_origin: left.clone(),
                    right_origin: right.clone(),
                    ch: *ch,
                    deleted: false,
                });
                true
            }
            Operation::DeleteChar { id } => match self.index.get(id) {
                Some(&idx) => {
                    if self.nodes[idx].deleted {
                        false
                    } else {
                        self.nodes[idx].deleted = true;
                        true
                    }
                }
                None => {
                    debug!(counter = id.counter, replica = %id.replica, "buffering delete until node arrives");
                    self.pending.push(op.clone());
                    false
                }
            },
            _ => false,
        }
    }

    fn drain_pending(&mut self) {
        let mut progressed = true;
        while progressed {
            progressed = false;
            for op in std::mem::take(&mut self.pending) {
                if self.try_apply(&op) {
                    progressed = true;
                }
            }
        }
    }

    fn origin_present(&self, origin: &Option<CharId>) -> bool {
        match origin {
            Some(id) => self.index.contains_key(id),
            None => true,
        }
    }

    /// Place a node in the total order. The scan window runs from the left
    /// origin to the right origin; within it, same-origin siblings order by
    /// [`CharId::sibling_cmp`] and nested runs are skipped as a unit.
    fn integrate(&mut self, node: FugueNode) {
        if self.index.contains_key(&node.id) {
            return;
        }
        self.counter = self.counter.max(node.id.counter);

        let left_idx = node
            .left_origin
            .as_ref()
            .and_then(|id| self.index.get(id).copied());
        let right_idx = node
            .right_origin
            .as_ref()
            .and_then(|id| self.index.get(id).copied())
            .unwrap_or(self.nodes.len());

        let mut dest = left_idx.map_or(0, |l| l + 1);
        let mut scan = dest;
        let mut seen_in_window: HashSet<usize> = HashSet::new();
        let mut conflicting: HashSet<usize> = HashSet::new();

        while scan < right_idx {
            let other = &self.nodes[scan];
            seen_in_window.insert(scan);
            conflicting.insert(scan);

            if other.left_origin == node.left_origin {
                match other.id.sibling_cmp(&node.id) {
                    Ordering::Less => {
                        dest = scan + 1;
                        conflicting.clear();
                    }
                    _ => {
                        if other.right_origin == node.right_origin {
                            break;
                        }
                    }
                }
            } else if let Some(origin_idx) = other
                .left_origin
                .as_ref()
                .and_then(|id| self.index.get(id).copied())
            {
                if seen_in_window.contains(&origin_idx) {
                    if !conflicting.contains(&origin_idx) {
                        dest = scan + 1;
                        conflicting.clear();
                    }
                } else {
                    // Origin precedes the window: the run we are scanning
                    // ended.
                    break;
                }
            } else {
                break;
            }
            scan += 1;
        }

        self.nodes.insert(dest, node);
        for idx in dest..self.nodes.len() {
            self.index.insert(self.nodes[idx].id.clone(), idx);
        }
    }

    /// Defer emission: subsequent `insert`/`delete` calls return no
    /// operations until `end_batch` releases them in order. Lets a
    /// delete-range-plus-insert edit travel as one unit.
    pub fn begin_batch(&mut self) {
        if self.batch.is_none() {
            self.batch = Some(Vec::new());
        }
    }

    /// Release all operations deferred since `begin_batch`.
    pub fn end_batch(&mut self) -> Vec<Operation> {
        self.batch.take().unwrap_or_default()
    }

    fn emit(&mut self, ops: Vec<Operation>) -> Vec<Operation> {
        match self.batch.as_mut() {
            Some(buffer) => {
                buffer.extend(ops);
                Vec::new()
            }
            None => ops,
        }
    }

    /// Number of visible (non-tombstoned) characters.
    pub fn visible_len(&self) -> usize {
        self.nodes.iter().filter(|n| !n.deleted).count()
    }

    /// Character id at a visible index.
    pub fn char_id_at_index(&self, pos: usize) -> Option<&CharId> {
        self.nodes
            .iter()
            .filter(|n| !n.deleted)
            .nth(pos)
            .map(|n| &n.id)
    }

    /// Visible index of a character id; `None` when unknown or tombstoned.
    pub fn index_of_char_id(&self, id: &CharId) -> Option<usize> {
        let &pos = self.index.get(id)?;
        if self.nodes[pos].deleted {
            return None;
        }
        Some(self.nodes[..pos].iter().filter(|n| !n.deleted).count())
    }

    /// Position of an id in the total order (tombstones included). Anchors
    /// resolve through this, so spans survive deletion of their endpoints.
    pub fn position(&self, id: &CharId) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// The full node sequence in total order.
    pub fn nodes(&self) -> &[FugueNode] {
        &self.nodes
    }

    /// Number of remote operations buffered for missing origins.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn visible_id(&self, pos: usize) -> Option<CharId> {
        self.nodes
            .iter()
            .filter(|n| !n.deleted)
            .nth(pos)
            .map(|n| n.id.clone())
    }
}

impl fmt::Display for FugueText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for node in self.nodes.iter().filter(|n| !n.deleted) {
            f.write_fmt(format_args!("{}", node.ch))?;
        }
        Ok(())
    }
}
