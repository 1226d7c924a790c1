//! Observed-Remove Set with add-wins semantics.
//!
//! Each add produces a unique tag; remove tombstones only the tags observed
//! at removal time. A concurrent add carries a fresh tag the remove never
//! saw, so the element survives — add wins.
//!
//! # Examples
//!
//! ```
//! use synckit_crdt::OrSet;
//! use synckit_core::ReplicaId;
//! use serde_json::json;
//!
//! let replica = ReplicaId::from("a");
//! let mut set = OrSet::new();
//! set.add(json!("blue"), &replica, 1);
//! assert!(set.contains(&json!("blue")));
//!
//! let removed = set.observed_tags(&json!("blue"));
//! set.remove_tags(&removed);
//! assert!(!set.contains(&json!("blue")));
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

use synckit_core::ReplicaId;

/// A unique tag identifying one add operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AddTag {
    pub replica: ReplicaId,
    /// Monotonically increasing per replica.
    pub seq: u64,
}

/// An observed-remove set over JSON elements.
///
/// Elements are keyed by their canonical JSON serialization so arbitrary
/// values can be set members.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrSet {
    /// Canonical element key → (element, live add tags).
    adds: HashMap<String, (Value, HashSet<AddTag>)>,
    /// Tombstoned tags from remove operations.
    removed: HashSet<AddTag>,
}

fn element_key(element: &Value) -> String {
    element.to_string()
}

impl OrSet {
    pub fn new() -> Self {
        Self {
            adds: HashMap::new(),
            removed: HashSet::new(),
        }
    }

    /// Add an element under a fresh tag; returns the tag so the caller can
    /// embed it in the broadcast operation.
    pub fn add(&mut self, element: Value, replica: &ReplicaId, seq: u64) -> AddTag {
        let tag = AddTag {
            replica: replica.clone(),
            seq,
        };
        self.add_with_tag(element, tag.clone());
        tag
    }

    /// Add an element under a tag minted elsewhere (remote apply).
    pub fn add_with_tag(&mut self, element: Value, tag: AddTag) {
        let key = element_key(&element);
        self.adds
            .entry(key)
            .or_insert_with(|| (element, HashSet::new()))
            .1
            .insert(tag);
    }

    /// All currently observed (non-tombstoned) tags for an element. A remove
    /// records exactly this set.
    pub fn observed_tags(&self, element: &Value) -> HashSet<AddTag> {
        self.adds
            .get(&element_key(element))
            .map(|(_, tags)| {
                tags.iter()
                    .filter(|tag| !self.removed.contains(*tag))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Tombstone a set of tags (local remove or remote apply).
    pub fn remove_tags(&mut self, tags: &HashSet<AddTag>) {
        for tag in tags {
            self.removed.insert(tag.clone());
        }
    }

    /// Present iff at least one add tag is not tombstoned.
    pub fn contains(&self, element: &Value) -> bool {
        self.adds
            .get(&element_key(element))
            .is_some_and(|(_, tags)| tags.iter().any(|tag| !self.removed.contains(tag)))
    }

    /// All present elements, in unspecified order.
    pub fn elements(&self) -> Vec<&Value> {
        self.adds
            .values()
            .filter(|(_, tags)| tags.iter().any(|tag| !self.removed.contains(tag)))
            .map(|(element, _)| element)
            .collect()
    }

    /// Number of present elements.
    pub fn len(&self) -> usize {
        self.adds
            .values()
            .filter(|(_, tags)| tags.iter().any(|tag| !self.removed.contains(tag)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Merge: union of add tags, union of tombstones.
    pub fn merge(&mut self, other: &Self) {
        for (key, (element, other_tags)) in &other.adds {
            let entry = self
                .adds
                .entry(key.clone())
                .or_insert_with(|| (element.clone(), HashSet::new()));
            for tag in other_tags {
                entry.1.insert(tag.clone());
            }
        }
        for tag in &other.removed {
            self.removed.insert(tag.clone());
        }
    }
}
