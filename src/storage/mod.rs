//! Storage backends implementing the traits in [`crate::interfaces`].
//!
//! `mock` is an in-memory backend used for tests and ephemeral tenants;
//! `sqlite` (behind the `sqlite` feature) is the durable backend; both
//! share the tabular [`csv_snapshot`] implementation of [`SnapshotStore`].

pub mod csv_snapshot;
pub mod mock;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use csv_snapshot::CsvSnapshotStore;
pub use mock::{MockEdgeStore, MockMutationLog};

#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteEdgeStore, SqliteMutationLog};
