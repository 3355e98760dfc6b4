//! FerrumRing - a Redis compatible in-memory key/value store
//!
//! Runs standalone or as one node of a cluster where keys are spread over
//! the nodes by consistent hashing:
//! - `protocol` speaks RESP2 and depends on nothing else
//! - `database` executes commands locally and persists them through `aof`
//! - `cluster` routes commands to their owner over pooled `client` links
//! - `server` and `web` expose a [`Database`] over TCP and HTTP

pub mod aof;
pub mod client;
pub mod cluster;
pub mod config;
pub mod connection;
pub mod database;
pub mod protocol;
pub mod server;
pub mod store;
pub mod web;

/// Re-export commonly used types
pub use cluster::{ClusterConfig, ClusterDatabase};
pub use config::Config;
pub use connection::Connection;
pub use database::{Database, StandaloneDatabase};
pub use protocol::{Payload, Reply, RespError};
