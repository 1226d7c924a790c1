//! Configuration for client and server subsystems.
//!
//! Every struct is `serde(default)` so partial configs deserialize cleanly;
//! defaults match the reference deployment.

mod client_config;
mod server_config;

pub use client_config::{
    ClientConfig, HeartbeatConfig, QueueConfig, ReconnectConfig, TabsConfig, UndoConfig,
};
pub use server_config::{ServerConfig, SnapshotConfig};
