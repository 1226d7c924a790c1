//! # synckit-core
//!
//! Foundation crate for the SyncKit sync engine.
//! Defines identifiers, errors, configuration, and auth types.
//! Every other crate in the workspace depends on this.

pub mod auth;
pub mod config;
pub mod constants;
pub mod errors;
pub mod ids;

// Re-export the most commonly used types at the crate root.
pub use auth::{Permissions, TokenPayload};
pub use errors::{SyncError, SyncResult};
pub use ids::{ClientId, DocumentId, FieldPath, ReplicaId};
