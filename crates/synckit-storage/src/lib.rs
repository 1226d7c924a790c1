//! # synckit-storage
//!
//! The key→blob persistence contract the rest of the engine is written
//! against, the in-memory adapter that backs tests and single-process
//! deployments, and the snapshot blob codec with its key layout.
//!
//! Concrete browser and SQL adapters are external collaborators; they
//! implement [`StorageAdapter`] and inherit everything else.

pub mod adapter;
pub mod keys;
pub mod memory;
pub mod snapshot;

pub use adapter::{ChangeEvent, StorageAdapter};
pub use memory::MemoryAdapter;
pub use snapshot::SnapshotBlob;
