//! Vector clock for causal ordering.
//!
//! Each replica maintains its own logical clock entry. The sync runtime uses
//! it for causal delivery; the server uses it to advertise authoritative
//! document versions.
//!
//! # Examples
//!
//! ```
//! use synckit_crdt::{ClockOrdering, VectorClock};
//! use synckit_core::ReplicaId;
//!
//! let a_id = ReplicaId::from("replica-a");
//! let b_id = ReplicaId::from("replica-b");
//!
//! let mut a = VectorClock::new();
//! a.increment(&a_id);
//! a.increment(&a_id);
//!
//! let mut b = VectorClock::new();
//! b.increment(&b_id);
//!
//! assert_eq!(a.compare(&b), ClockOrdering::Concurrent);
//!
//! a.merge(&b);
//! assert_eq!(a.get(&a_id), 2);
//! assert_eq!(a.get(&b_id), 1);
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use synckit_core::ReplicaId;

/// Outcome of comparing two vector clocks under the happens-before partial
/// order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockOrdering {
    Equal,
    /// `self` happens-before `other`.
    Less,
    /// `other` happens-before `self`.
    Greater,
    /// Neither dominates.
    Concurrent,
}

/// A vector clock mapping replica ids to logical counters.
///
/// Absent keys read as 0. Merge is pointwise max, which is commutative,
/// associative, and idempotent; increment touches exactly one key and never
/// decreases a value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorClock {
    /// Replica id → logical clock value.
    clocks: HashMap<ReplicaId, u64>,
}

impl VectorClock {
    /// Create an empty vector clock.
    pub fn new() -> Self {
        Self {
            clocks: HashMap::new(),
        }
    }

    /// Increment the entry for the given replica by 1, inserting at 1 when
    /// absent. Returns the new value.
    pub fn increment(&mut self, replica: &ReplicaId) -> u64 {
        let entry = self.clocks.entry(replica.clone()).or_insert(0);
        *entry += 1;
        *entry
    }

    /// Current clock value for a replica (0 if absent).
    pub fn get(&self, replica: &ReplicaId) -> u64 {
        self.clocks.get(replica).copied().unwrap_or(0)
    }

    /// Raise a single entry to `value` if it is higher than the current one.
    pub fn observe(&mut self, replica: &ReplicaId, value: u64) {
        let entry = self.clocks.entry(replica.clone()).or_insert(0);
        *entry = (*entry).max(value);
    }

    /// Merge with another clock: pointwise max across the union of replicas.
    pub fn merge(&mut self, other: &Self) {
        for (replica, &other_val) in &other.clocks {
            let entry = self.clocks.entry(replica.clone()).or_insert(0);
            *entry = (*entry).max(other_val);
        }
    }

    /// Compare two clocks under happens-before.
    ///
    /// `Less` iff every entry of `self` is ≤ the corresponding entry of
    /// `other` and at least one is strictly less; symmetrically for
    /// `Greater`; `Concurrent` when neither dominates.
    pub fn compare(&self, other: &Self) -> ClockOrdering {
        let mut self_ahead = false;
        let mut other_ahead = false;

        for (replica, &self_val) in &self.clocks {
            let other_val = other.get(replica);
            if self_val > other_val {
                self_ahead = true;
            } else if self_val < other_val {
                other_ahead = true;
            }
        }
        for (replica, &other_val) in &other.clocks {
            if !self.clocks.contains_key(replica) && other_val > 0 {
                other_ahead = true;
            }
        }

        match (self_ahead, other_ahead) {
            (false, false) => ClockOrdering::Equal,
            (false, true) => ClockOrdering::Less,
            (true, false) => ClockOrdering::Greater,
            (true, true) => ClockOrdering::Concurrent,
        }
    }

    /// Returns true if `self` happens-before `other`.
    pub fn happens_before(&self, other: &Self) -> bool {
        self.compare(other) == ClockOrdering::Less
    }

    /// Returns true if neither clock happens-before the other and they are
    /// not equal.
    pub fn concurrent_with(&self, other: &Self) -> bool {
        self.compare(other) == ClockOrdering::Concurrent
    }

    /// Returns true if `self` dominates `other`.
    pub fn dominates(&self, other: &Self) -> bool {
        self.compare(other) == ClockOrdering::Greater
    }

    /// All replica ids present in this clock.
    pub fn replicas(&self) -> impl Iterator<Item = &ReplicaId> {
        self.clocks.keys()
    }

    /// The largest counter across all entries. Used to seed a Lamport clock
    /// that must stay ahead of everything already observed.
    pub fn max_counter(&self) -> u64 {
        self.clocks.values().copied().max().unwrap_or(0)
    }

    /// Number of replicas tracked by this clock.
    pub fn len(&self) -> usize {
        self.clocks.len()
    }

    /// Returns true if the clock has no entries.
    pub fn is_empty(&self) -> bool {
        self.clocks.is_empty()
    }
}
