//! # synckit-server
//!
//! The server sync coordinator: per-document conflict resolution with
//! authoritative broadcast, subscription fan-out, ACK/retry delivery
//! tracking, delta coalescing, ephemeral awareness with TTL eviction,
//! pub/sub bridging for horizontal scaling, and snapshot scheduling.
//!
//! All mutating work for one document is serialized behind that document's
//! lock; nothing holds a lock across another document's work.

pub mod acks;
pub mod auth;
pub mod awareness;
pub mod batch;
pub mod connection;
pub mod coordinator;
pub mod pubsub;
pub mod ratelimit;
pub mod server;
pub mod snapshots;
pub mod subscriptions;

pub use acks::AckTracker;
pub use auth::{StaticTokenVerifier, TokenVerifier};
pub use awareness::AwarenessStore;
pub use batch::DeltaCoalescer;
pub use connection::{ConnectionId, ConnectionRegistry};
pub use coordinator::SyncCoordinator;
pub use pubsub::{InProcessPubSub, PubSub, PubSubMessage};
pub use ratelimit::{NoLimit, RateLimiter, WindowedRateLimiter};
pub use server::SyncServer;
pub use snapshots::SnapshotScheduler;
pub use subscriptions::SubscriptionRegistry;
