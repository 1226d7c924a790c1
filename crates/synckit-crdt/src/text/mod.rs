//! Sequence CRDT for collaborative text.
//!
//! Characters are identified by [`CharId`], never by index; each insertion
//! records the visible neighbors at the moment of insertion as left/right
//! origins, and the total order is a deterministic function of identifiers
//! and origins alone.

pub mod fugue;
pub mod node;

pub use fugue::FugueText;
pub use node::{CharId, FugueNode};
