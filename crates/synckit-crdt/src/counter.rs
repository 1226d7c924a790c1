//! PN-Counter CRDT.
//!
//! Each replica keeps a pair of grow-only halves: total increments and total
//! decrements. Value is the difference of the sums; merge is the pointwise
//! max of each half, so no increment or decrement is ever lost.
//!
//! # Examples
//!
//! ```
//! use synckit_crdt::PnCounter;
//! use synckit_core::ReplicaId;
//!
//! let a_id = ReplicaId::from("a");
//! let mut a = PnCounter::new();
//! a.increment(&a_id, 5);
//! a.decrement(&a_id, 2);
//!
//! let b_id = ReplicaId::from("b");
//! let mut b = PnCounter::new();
//! b.increment(&b_id, 10);
//!
//! a.merge(&b);
//! assert_eq!(a.value(), 13);
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use synckit_core::ReplicaId;

/// A replica's grow-only halves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterHalves {
    pub increments: u64,
    pub decrements: u64,
}

/// An increment/decrement counter over replica-tagged halves.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PnCounter {
    counts: HashMap<ReplicaId, CounterHalves>,
}

impl PnCounter {
    pub fn new() -> Self {
        Self {
            counts: HashMap::new(),
        }
    }

    /// Add `n` (≥ 0) to this replica's increment half.
    pub fn increment(&mut self, replica: &ReplicaId, n: u64) {
        self.counts.entry(replica.clone()).or_default().increments += n;
    }

    /// Add `n` (≥ 0) to this replica's decrement half.
    pub fn decrement(&mut self, replica: &ReplicaId, n: u64) {
        self.counts.entry(replica.clone()).or_default().decrements += n;
    }

    /// Σ increments − Σ decrements across all replicas.
    pub fn value(&self) -> i64 {
        let inc: u64 = self.counts.values().map(|h| h.increments).sum();
        let dec: u64 = self.counts.values().map(|h| h.decrements).sum();
        inc as i64 - dec as i64
    }

    /// This replica's halves (zeros if absent).
    pub fn halves(&self, replica: &ReplicaId) -> CounterHalves {
        self.counts.get(replica).copied().unwrap_or_default()
    }

    /// Merge: pointwise max of each half, per replica. Halves only grow, so
    /// max never discards a locally observed count.
    pub fn merge(&mut self, other: &Self) {
        for (replica, other_halves) in &other.counts {
            let entry = self.counts.entry(replica.clone()).or_default();
            entry.increments = entry.increments.max(other_halves.increments);
            entry.decrements = entry.decrements.max(other_halves.decrements);
        }
    }
}
