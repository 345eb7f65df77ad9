//! Ligature client — replica, query cache, and optimistic mutation layer.
//!
//! This crate is the "client" half of the relationship-based authorization
//! protocol: it loads a tenant's snapshot, subscribes to the coordinator's
//! mutation stream, and answers `can()` queries against a local replica
//! without a network round trip.

pub mod backoff;
pub mod cache;
pub mod engine;
pub mod error;
pub mod optimistic;
pub mod replica;
pub mod transport;
pub mod wire;

pub use cache::{CacheKey, QueryCache};
pub use engine::{GraphEngine, InMemoryGraphEngine};
pub use error::{ClientError, Result};
pub use optimistic::OptimisticLayer;
pub use replica::{ClientReplica, FileSnapshotSource, SnapshotSource};
pub use transport::{Transport, TransportEvent};
pub use wire::{ClientMessage, IdempotencyKey, ServerMessage};
