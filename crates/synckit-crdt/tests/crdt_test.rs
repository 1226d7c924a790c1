//! Unit tests for the CRDT primitives.
//!
//! Covers: VectorClock, LwwDocument, PnCounter, OrSet, tombstone sentinel.

use serde_json::json;

use synckit_core::{FieldPath, ReplicaId};
use synckit_crdt::{
    is_tombstone, tombstone, ClockOrdering, LwwDocument, OrSet, PnCounter, VectorClock,
};

fn replica(name: &str) -> ReplicaId {
    ReplicaId::from(name)
}

// =============================================================================
// VectorClock
// =============================================================================

#[test]
fn vector_clock_increment_touches_one_key() {
    let mut clock = VectorClock::new();
    assert_eq!(clock.get(&replica("a")), 0);

    clock.increment(&replica("a"));
    clock.increment(&replica("a"));
    clock.increment(&replica("b"));

    assert_eq!(clock.get(&replica("a")), 2);
    assert_eq!(clock.get(&replica("b")), 1);
    assert_eq!(clock.get(&replica("c")), 0);
}

#[test]
fn vector_clock_merge_is_pointwise_max() {
    let mut a = VectorClock::new();
    a.increment(&replica("a"));
    a.increment(&replica("a"));
    a.increment(&replica("b"));

    let mut b = VectorClock::new();
    b.increment(&replica("a"));
    b.increment(&replica("b"));
    b.increment(&replica("b"));
    b.increment(&replica("c"));

    a.merge(&b);
    assert_eq!(a.get(&replica("a")), 2);
    assert_eq!(a.get(&replica("b")), 2);
    assert_eq!(a.get(&replica("c")), 1);
}

#[test]
fn vector_clock_compare_covers_all_orderings() {
    let mut a = VectorClock::new();
    a.increment(&replica("a"));

    let mut b = a.clone();
    b.increment(&replica("a"));

    assert_eq!(a.compare(&b), ClockOrdering::Less);
    assert_eq!(b.compare(&a), ClockOrdering::Greater);
    assert_eq!(a.compare(&a.clone()), ClockOrdering::Equal);

    let mut c = VectorClock::new();
    c.increment(&replica("c"));
    assert_eq!(a.compare(&c), ClockOrdering::Concurrent);
    assert!(a.concurrent_with(&c));
}

#[test]
fn vector_clock_merge_is_idempotent_and_commutative() {
    let mut a = VectorClock::new();
    a.increment(&replica("a"));
    a.increment(&replica("a"));

    let mut b = VectorClock::new();
    b.increment(&replica("b"));

    let mut ab = a.clone();
    ab.merge(&b);
    let mut ba = b.clone();
    ba.merge(&a);
    assert_eq!(ab, ba);

    let before = ab.clone();
    ab.merge(&before.clone());
    assert_eq!(ab, before);
}

// =============================================================================
// LwwDocument
// =============================================================================

#[test]
fn lww_equal_clocks_break_ties_by_greater_writer() {
    let field = FieldPath::from("name");

    let mut doc = LwwDocument::new();
    doc.set(field.clone(), json!("A"), replica("clientA"), 1);
    doc.set(field.clone(), json!("B"), replica("clientB"), 1);
    assert_eq!(doc.get(&field), Some(&json!("B")));

    // Reversed arrival converges to the same winner.
    let mut doc2 = LwwDocument::new();
    doc2.set(field.clone(), json!("B"), replica("clientB"), 1);
    doc2.set(field.clone(), json!("A"), replica("clientA"), 1);
    assert_eq!(doc2.get(&field), Some(&json!("B")));
}

#[test]
fn lww_lower_clock_write_is_silently_ignored() {
    let field = FieldPath::from("status");
    let mut doc = LwwDocument::new();

    assert!(doc.set(field.clone(), json!("new"), replica("a"), 5));
    assert!(!doc.set(field.clone(), json!("stale"), replica("b"), 3));
    assert_eq!(doc.get(&field), Some(&json!("new")));
}

#[test]
fn lww_delete_vs_concurrent_write_both_orders() {
    let field = FieldPath::from("status");

    // Delete carries the higher clock: field ends up absent.
    let mut doc = LwwDocument::new();
    doc.set(field.clone(), json!("active"), replica("replicaA"), 1000);
    doc.delete(field.clone(), replica("replicaB"), 2000);
    assert_eq!(doc.get(&field), None);

    // Swap the clocks: the write wins and the field stays live.
    let mut doc = LwwDocument::new();
    doc.set(field.clone(), json!("active"), replica("replicaA"), 2000);
    doc.delete(field.clone(), replica("replicaB"), 1000);
    assert_eq!(doc.get(&field), Some(&json!("active")));
}

#[test]
fn lww_tombstone_resurrection_order() {
    let field = FieldPath::from("f");
    let mut doc = LwwDocument::new();

    doc.set(field.clone(), json!("v1"), replica("a"), 1);
    doc.delete(field.clone(), replica("a"), 2);
    doc.set(field.clone(), json!("v2"), replica("a"), 3);
    assert_eq!(doc.get(&field), Some(&json!("v2")));

    // Reverse the last two: the tombstone finalizes.
    let mut doc = LwwDocument::new();
    doc.set(field.clone(), json!("v1"), replica("a"), 1);
    doc.set(field.clone(), json!("v2"), replica("a"), 2);
    doc.delete(field.clone(), replica("a"), 3);
    assert_eq!(doc.get(&field), None);
    assert!(doc.register(&field).unwrap().is_deleted());
}

#[test]
fn lww_merge_is_commutative_and_idempotent() {
    let field = FieldPath::from("x");
    let other = FieldPath::from("y");

    let mut a = LwwDocument::new();
    a.set(field.clone(), json!(1), replica("a"), 1);
    a.set(other.clone(), json!("left"), replica("a"), 2);

    let mut b = LwwDocument::new();
    b.set(field.clone(), json!(2), replica("b"), 3);

    let mut ab = a.clone();
    ab.merge(&b);
    let mut ba = b.clone();
    ba.merge(&a);

    assert_eq!(ab.get(&field), ba.get(&field));
    assert_eq!(ab.get(&other), ba.get(&other));
    assert_eq!(ab.get(&field), Some(&json!(2)));

    let before = ab.clone();
    ab.merge(&b);
    assert_eq!(ab.render(), before.render());
}

#[test]
fn lww_render_omits_tombstones() {
    let mut doc = LwwDocument::new();
    doc.set(FieldPath::from("live"), json!(1), replica("a"), 1);
    doc.delete(FieldPath::from("dead"), replica("a"), 2);

    let rendered = doc.render();
    assert_eq!(rendered.len(), 1);
    assert!(rendered.contains_key("live"));
}

#[test]
fn tombstone_sentinel_round_trips_through_a_register() {
    let field = FieldPath::from("f");
    let mut doc = LwwDocument::new();
    doc.set(field.clone(), tombstone(), replica("a"), 1);
    assert_eq!(doc.get(&field), None);
    assert!(is_tombstone(&doc.register(&field).unwrap().value));
}

// =============================================================================
// PnCounter
// =============================================================================

#[test]
fn pn_counter_value_is_inc_minus_dec() {
    let mut counter = PnCounter::new();
    counter.increment(&replica("a"), 10);
    counter.decrement(&replica("a"), 3);
    counter.increment(&replica("b"), 1);
    assert_eq!(counter.value(), 8);
}

#[test]
fn pn_counter_merge_keeps_every_replica_half() {
    let mut a = PnCounter::new();
    a.increment(&replica("a"), 5);
    a.decrement(&replica("a"), 1);

    let mut b = PnCounter::new();
    b.increment(&replica("b"), 7);

    let mut ab = a.clone();
    ab.merge(&b);
    let mut ba = b.clone();
    ba.merge(&a);

    assert_eq!(ab.value(), 11);
    assert_eq!(ab, ba);

    // Merging a stale copy of a replica's own state changes nothing.
    let before = ab.clone();
    ab.merge(&a);
    assert_eq!(ab, before);
}

// =============================================================================
// OrSet
// =============================================================================

#[test]
fn or_set_add_then_remove() {
    let mut set = OrSet::new();
    set.add(json!("x"), &replica("a"), 1);
    assert!(set.contains(&json!("x")));

    let observed = set.observed_tags(&json!("x"));
    set.remove_tags(&observed);
    assert!(!set.contains(&json!("x")));
    assert_eq!(set.len(), 0);
}

#[test]
fn or_set_concurrent_add_wins_over_remove() {
    // Replica A adds, replica B observes and removes, replica A concurrently
    // re-adds under a fresh tag the remove never saw.
    let mut a = OrSet::new();
    a.add(json!("x"), &replica("a"), 1);

    let mut b = a.clone();
    let observed = b.observed_tags(&json!("x"));
    b.remove_tags(&observed);

    a.add(json!("x"), &replica("a"), 2);

    let mut merged_ab = a.clone();
    merged_ab.merge(&b);
    let mut merged_ba = b.clone();
    merged_ba.merge(&a);

    assert!(merged_ab.contains(&json!("x")));
    assert!(merged_ba.contains(&json!("x")));
}

#[test]
fn or_set_supports_arbitrary_json_elements() {
    let mut set = OrSet::new();
    set.add(json!({"id": 1, "tag": "rust"}), &replica("a"), 1);
    set.add(json!([1, 2, 3]), &replica("a"), 2);
    assert_eq!(set.len(), 2);
    assert!(set.contains(&json!({"id": 1, "tag": "rust"})));
    assert!(set.contains(&json!([1, 2, 3])));
}
