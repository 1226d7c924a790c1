//! Last-writer-wins register map.
//!
//! Each field of a document holds one register; the register with the
//! greatest `(logical_clock, writer)` pair wins everywhere, with the
//! lexicographically greater writer id breaking ties. A tombstone behaves
//! exactly like any other register for ordering, so deletes commute with
//! concurrent writes and a later write resurrects the field.
//!
//! # Examples
//!
//! ```
//! use synckit_crdt::LwwDocument;
//! use synckit_core::{FieldPath, ReplicaId};
//! use serde_json::json;
//!
//! let field = FieldPath::from("name");
//! let mut doc = LwwDocument::new();
//! doc.set(field.clone(), json!("A"), ReplicaId::from("clientA"), 1);
//! doc.set(field.clone(), json!("B"), ReplicaId::from("clientB"), 1);
//!
//! // Equal clocks: the lexicographically greater replica id wins.
//! assert_eq!(doc.get(&field), Some(&json!("B")));
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::VectorClock;
use crate::value::{is_tombstone, tombstone};
use synckit_core::{FieldPath, ReplicaId};

/// One last-write-wins register: a value (possibly the tombstone sentinel)
/// stamped with the writer's logical clock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LwwRegister {
    pub value: Value,
    pub clock: u64,
    pub writer: ReplicaId,
}

impl LwwRegister {
    pub fn new(value: Value, clock: u64, writer: ReplicaId) -> Self {
        Self {
            value,
            clock,
            writer,
        }
    }

    /// Whether this register strictly exceeds `other` in `(clock, writer)`
    /// lexicographic order. Identical pairs are ties, not wins.
    pub fn beats(&self, other: &Self) -> bool {
        (self.clock, &self.writer) > (other.clock, &other.writer)
    }

    /// Whether the register currently holds the tombstone sentinel.
    pub fn is_deleted(&self) -> bool {
        is_tombstone(&self.value)
    }
}

/// A keyed collection of LWW registers plus the document's vector clock.
///
/// Merge keeps, per field, the register with the greater `(clock, writer)`
/// pair; this makes merge commutative and idempotent regardless of delivery
/// order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LwwDocument {
    fields: HashMap<FieldPath, LwwRegister>,
    pub clock: VectorClock,
}

impl LwwDocument {
    pub fn new() -> Self {
        Self {
            fields: HashMap::new(),
            clock: VectorClock::new(),
        }
    }

    /// Install `value` at `field` if `(clock, writer)` strictly exceeds the
    /// existing register; otherwise a silent no-op — this is the convergence
    /// guarantee, not an error. Returns whether the register was installed.
    pub fn set(&mut self, field: FieldPath, value: Value, writer: ReplicaId, clock: u64) -> bool {
        let incoming = LwwRegister::new(value, clock, writer.clone());
        let installed = match self.fields.get(&field) {
            Some(existing) => {
                if incoming.beats(existing) {
                    self.fields.insert(field, incoming);
                    true
                } else {
                    false
                }
            }
            None => {
                self.fields.insert(field, incoming);
                true
            }
        };
        self.clock.observe(&writer, clock);
        installed
    }

    /// Delete is a set of the tombstone sentinel; it participates in the
    /// same ordering and a later tombstone finalizes deletion.
    pub fn delete(&mut self, field: FieldPath, writer: ReplicaId, clock: u64) -> bool {
        self.set(field, tombstone(), writer, clock)
    }

    /// Current value, or `None` when the field is absent or tombstoned.
    pub fn get(&self, field: &FieldPath) -> Option<&Value> {
        self.fields
            .get(field)
            .filter(|reg| !reg.is_deleted())
            .map(|reg| &reg.value)
    }

    /// The raw register for a field, tombstoned or not.
    pub fn register(&self, field: &FieldPath) -> Option<&LwwRegister> {
        self.fields.get(field)
    }

    /// Authoritative overwrite: installs the register regardless of the LWW
    /// comparison. Used by clients superseding local state with a server
    /// broadcast.
    pub fn supersede(&mut self, field: FieldPath, register: LwwRegister) {
        self.clock.observe(&register.writer, register.clock);
        self.fields.insert(field, register);
    }

    /// Merge with another document: per field in the union, keep the register
    /// with the greater `(clock, writer)` pair; clocks merge pointwise.
    pub fn merge(&mut self, other: &Self) {
        for (field, other_reg) in &other.fields {
            match self.fields.get(field) {
                Some(existing) if !other_reg.beats(existing) => {}
                _ => {
                    self.fields.insert(field.clone(), other_reg.clone());
                }
            }
        }
        self.clock.merge(&other.clock);
    }

    /// Rendered state: every live field's value, tombstones omitted.
    pub fn render(&self) -> serde_json::Map<String, Value> {
        let mut map = serde_json::Map::new();
        for (field, reg) in &self.fields {
            if !reg.is_deleted() {
                map.insert(field.as_str().to_string(), reg.value.clone());
            }
        }
        map
    }

    /// All fields with their registers, tombstoned included. Iteration order
    /// is unspecified.
    pub fn registers(&self) -> impl Iterator<Item = (&FieldPath, &LwwRegister)> {
        self.fields.iter()
    }

    /// Number of fields, tombstoned included.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
