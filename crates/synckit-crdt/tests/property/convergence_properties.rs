//! Convergence properties: delivery order never changes rendered state.

use proptest::prelude::*;
use serde_json::json;

use synckit_core::{FieldPath, ReplicaId};
use synckit_crdt::{FugueText, LwwDocument, Operation, PnCounter, VectorClock};

const REPLICAS: [&str; 3] = ["replica-a", "replica-b", "replica-c"];
const FIELDS: [&str; 4] = ["title", "status", "owner", "body"];

/// One randomly generated LWW write: (field, value, replica, clock).
fn lww_op_strategy() -> impl Strategy<Value = (usize, i64, usize, u64)> {
    (0..FIELDS.len(), -100i64..100, 0..REPLICAS.len(), 1u64..50)
}

fn apply_lww(doc: &mut LwwDocument, ops: &[(usize, i64, usize, u64)]) {
    for &(field, value, writer, clock) in ops {
        doc.set(
            FieldPath::from(FIELDS[field]),
            json!(value),
            ReplicaId::from(REPLICAS[writer]),
            clock,
        );
    }
}

proptest! {
    /// Any two delivery orders of the same LWW op multiset render equal
    /// state.
    #[test]
    fn lww_delivery_order_is_irrelevant(
        ops in prop::collection::vec(lww_op_strategy(), 1..40),
        seed in any::<u64>(),
    ) {
        let mut shuffled = ops.clone();
        // Deterministic Fisher-Yates driven by the seed.
        let mut state = seed.wrapping_add(1);
        for i in (1..shuffled.len()).rev() {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let j = (state >> 33) as usize % (i + 1);
            shuffled.swap(i, j);
        }

        let mut forward = LwwDocument::new();
        apply_lww(&mut forward, &ops);
        let mut permuted = LwwDocument::new();
        apply_lww(&mut permuted, &shuffled);

        prop_assert_eq!(forward.render(), permuted.render());
    }

    /// merge(A, B) == merge(B, A) over rendered state, and merging twice
    /// changes nothing.
    #[test]
    fn lww_merge_commutes_and_is_idempotent(
        ops_a in prop::collection::vec(lww_op_strategy(), 0..25),
        ops_b in prop::collection::vec(lww_op_strategy(), 0..25),
    ) {
        let mut a = LwwDocument::new();
        apply_lww(&mut a, &ops_a);
        let mut b = LwwDocument::new();
        apply_lww(&mut b, &ops_b);

        let mut ab = a.clone();
        ab.merge(&b);
        let mut ba = b.clone();
        ba.merge(&a);
        prop_assert_eq!(ab.render(), ba.render());

        let before = ab.render();
        ab.merge(&b);
        prop_assert_eq!(ab.render(), before);
    }

    /// Two replicas receiving the same text op multiset in different orders
    /// render byte-identical strings.
    #[test]
    fn fugue_delivery_order_is_irrelevant(
        edits in prop::collection::vec((0usize..20, 0usize..3), 1..15),
        seed in any::<u64>(),
    ) {
        // Three writers generate ops against their own converging copies.
        let mut writers: Vec<FugueText> = REPLICAS
            .iter()
            .map(|r| FugueText::new(ReplicaId::from(*r)))
            .collect();
        let mut all_ops: Vec<Operation> = Vec::new();

        for (pos, writer_idx) in edits {
            let ops = {
                let writer = &mut writers[writer_idx];
                if pos % 3 == 0 && writer.visible_len() > 0 {
                    writer.delete(pos % writer.visible_len(), 1)
                } else {
                    writer.insert(pos, "ab")
                }
            };
            // Everyone else sees the ops immediately (sequential history,
            // the permutation below supplies the disorder).
            for (i, other) in writers.iter_mut().enumerate() {
                if i != writer_idx {
                    for op in &ops {
                        other.apply_remote(op);
                    }
                }
            }
            all_ops.extend(ops);
        }

        let mut shuffled = all_ops.clone();
        let mut state = seed.wrapping_add(1);
        for i in (1..shuffled.len()).rev() {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let j = (state >> 33) as usize % (i + 1);
            shuffled.swap(i, j);
        }

        let mut forward = FugueText::new(ReplicaId::from("reader-1"));
        for op in &all_ops {
            forward.apply_remote(op);
        }
        let mut permuted = FugueText::new(ReplicaId::from("reader-2"));
        for op in &shuffled {
            permuted.apply_remote(op);
        }

        prop_assert_eq!(forward.pending_len(), 0);
        prop_assert_eq!(permuted.pending_len(), 0);
        prop_assert_eq!(forward.to_string(), permuted.to_string());
    }

    /// Counter merges never lose increments or decrements.
    #[test]
    fn pn_counter_merge_is_exact(
        incs in prop::collection::vec((0..REPLICAS.len(), 0u64..50), 0..20),
        decs in prop::collection::vec((0..REPLICAS.len(), 0u64..50), 0..20),
    ) {
        // Each replica applies its own ops; merging all copies must equal
        // the global sum.
        let mut counters: Vec<PnCounter> = (0..REPLICAS.len()).map(|_| PnCounter::new()).collect();
        let mut expected: i64 = 0;
        for (idx, n) in &incs {
            counters[*idx].increment(&ReplicaId::from(REPLICAS[*idx]), *n);
            expected += *n as i64;
        }
        for (idx, n) in &decs {
            counters[*idx].decrement(&ReplicaId::from(REPLICAS[*idx]), *n);
            expected -= *n as i64;
        }

        let mut merged = PnCounter::new();
        for counter in &counters {
            merged.merge(counter);
        }
        prop_assert_eq!(merged.value(), expected);
    }

    /// Clock merge is associative, commutative, idempotent.
    #[test]
    fn vector_clock_merge_laws(
        a in prop::collection::vec((0..REPLICAS.len(), 1u64..20), 0..6),
        b in prop::collection::vec((0..REPLICAS.len(), 1u64..20), 0..6),
        c in prop::collection::vec((0..REPLICAS.len(), 1u64..20), 0..6),
    ) {
        let build = |entries: &[(usize, u64)]| {
            let mut clock = VectorClock::new();
            for (idx, value) in entries {
                clock.observe(&ReplicaId::from(REPLICAS[*idx]), *value);
            }
            clock
        };
        let (a, b, c) = (build(&a), build(&b), build(&c));

        let mut ab_c = a.clone();
        ab_c.merge(&b);
        ab_c.merge(&c);
        let mut a_bc = b.clone();
        a_bc.merge(&c);
        let mut left = a.clone();
        left.merge(&a_bc);
        prop_assert_eq!(&ab_c, &left);

        let mut ab = a.clone();
        ab.merge(&b);
        let mut ba = b.clone();
        ba.merge(&a);
        prop_assert_eq!(&ab, &ba);

        let mut aa = a.clone();
        aa.merge(&a);
        prop_assert_eq!(&aa, &a);
    }
}
