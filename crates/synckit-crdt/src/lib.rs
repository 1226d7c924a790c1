//! # synckit-crdt
//!
//! The replicated data model of SyncKit. Provides the conflict-free data
//! types every replica (client session or server instance) holds, and the
//! operation envelope they exchange.
//!
//! ## Primitives
//!
//! - [`VectorClock`] — partial-order primitive over replica ids
//! - [`LwwRegister`] / [`LwwDocument`] — keyed last-write-wins registers with
//!   tombstones
//! - [`FugueText`] — character-identifier sequence with a deterministic total
//!   order
//! - [`RichTextLayer`] — Peritext format spans anchored to character ids
//! - [`PnCounter`] — increment/decrement counter
//! - [`OrSet`] — observed-remove set with add-wins semantics
//!
//! ## Composition
//!
//! - [`Operation`] / [`OperationEnvelope`] — the tagged mutation union
//! - [`ReplicatedDoc`] — one document behind a uniform
//!   apply-operation / merge / serialize surface
//!
//! All merge operations are commutative, associative, and idempotent; two
//! replicas that receive the same multiset of operations in any order render
//! identical state.

pub mod clock;
pub mod counter;
pub mod doc;
pub mod lww;
pub mod op;
pub mod orset;
pub mod richtext;
pub mod text;
pub mod value;

// Re-export public API
pub use clock::{ClockOrdering, VectorClock};
pub use counter::PnCounter;
pub use doc::{ApplyOutcome, DocState, ReplicatedDoc, TextDocument};
pub use lww::{LwwDocument, LwwRegister};
pub use op::{Operation, OperationEnvelope};
pub use orset::{AddTag, OrSet};
pub use richtext::{Anchor, AnchorSide, AttrValue, FormatSpan, RichTextLayer};
pub use text::{CharId, FugueNode, FugueText};
pub use value::{is_tombstone, tombstone};
