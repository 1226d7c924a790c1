//! # synckit-client
//!
//! The per-client sync runtime: a durable offline operation queue,
//! single-leader cross-tab coordination, the connection state machine with
//! jittered reconnection, heartbeats, delivery tracking, awareness
//! publication, and per-document undo/redo.
//!
//! The transport is abstract ([`ClientTransport`]); browser and native
//! socket bindings live outside the core.

pub mod awareness;
pub mod connection;
pub mod queue;
pub mod runtime;
pub mod tabs;
pub mod undo;

pub use awareness::{AwarenessPeers, AwarenessPublisher};
pub use connection::{ClientTransport, ConnectionState, ReconnectPolicy, TransportLink};
pub use queue::{EnqueueOutcome, OfflineQueue, RetryBackoff};
pub use runtime::{Edit, SyncHandle, SyncRuntime};
pub use tabs::{LocalTabChannel, TabChannel, TabCoordinator, TabMessage, TabRole};
pub use undo::{UndoEntry, UndoRedo};
