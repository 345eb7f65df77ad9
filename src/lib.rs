//! Ligature — relationship-based authorization server.
//!
//! An authoritative edge store, a chain-connectivity path validator, and a
//! per-tenant coordinator that serializes mutations, maintains an
//! append-only log, refreshes tabular snapshots, and fans mutations out to
//! subscribed client replicas. See [`crate::tenant::TenantCoordinator`] for
//! the central state machine and [`crate::validation::validate`] for the
//! proof-checking algorithm clients' submitted paths are held to.

pub mod config;
pub mod error;
pub mod handlers;
pub mod interfaces;
pub mod storage;
pub mod tenant;
pub mod transport;
pub mod validation;

pub use config::Config;
pub use error::{CoordinatorError, Result, StorageError};
pub use tenant::{TenantCoordinator, TenantRegistry, TenantState, SCHEMA_VERSION};
