//! Error types shared across the coordinator.
//!
//! Categorized per spec §7: proof errors (a rejected mutation proof),
//! transient errors (retry with backoff), consistency errors (lagged
//! subscriber, version skew), and fatal errors (schema mismatch, storage
//! failure) — one variant per failure mode, `#[from]` at adapter
//! boundaries, never a stringly-typed error.

use ligature_client::wire::{EdgeId, ErrorCode};

/// Result type for coordinator operations.
pub type Result<T> = std::result::Result<T, CoordinatorError>;

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    /// A submitted proof failed one of the seven ordered path-validator
    /// checks (spec §4.2). Never retried; the client must re-derive the
    /// proof from its local replica.
    #[error("proof rejected: {code}")]
    ProofRejected { code: ErrorCode, edge_id: Option<EdgeId>, index: Option<usize> },

    /// Referenced an edge id the store has never seen.
    #[error("unknown edge: {0}")]
    UnknownEdge(EdgeId),

    /// The tenant has no `READY` coordinator and none could be started.
    #[error("tenant not found: {0}")]
    TenantNotFound(String),

    /// Coordinator is still replaying its mutation log into memory.
    #[error("tenant initializing: {0}")]
    TenantInitializing(String),

    /// Coordinator is finishing in-flight work before eviction; retry.
    #[error("tenant draining: {0}")]
    TenantDraining(String),

    /// On-disk schema version doesn't match the running binary's.
    #[error("schema migration in progress for tenant {0}")]
    SchemaMigrationInProgress(String),

    /// Underlying persistent storage failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A subscriber fell far enough behind that replay is no longer
    /// economical; it must reload from a fresh snapshot.
    #[error("subscriber lagged past retained history")]
    Lagged,

    /// Local pending-mutation or subscriber queue exceeded its high-water
    /// mark.
    #[error("backpressure: {0}")]
    Backpressure(String),

    /// Caller-supplied argument was invalid independent of storage state.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl CoordinatorError {
    /// The stable wire error code for this error, if it has one, for
    /// serializing into an `ERROR`/`ACK{success:false}` message.
    pub fn code(&self) -> ErrorCode {
        match self {
            CoordinatorError::ProofRejected { code, .. } => *code,
            CoordinatorError::UnknownEdge(_) => ErrorCode::UnknownEdge,
            CoordinatorError::TenantNotFound(_) => ErrorCode::TenantNotFound,
            CoordinatorError::TenantInitializing(_) | CoordinatorError::TenantDraining(_) => {
                ErrorCode::TenantNotFound
            }
            CoordinatorError::SchemaMigrationInProgress(_) => ErrorCode::SchemaMigrationInProgress,
            CoordinatorError::Lagged => ErrorCode::Lagged,
            CoordinatorError::Backpressure(_) => ErrorCode::Backpressure,
            CoordinatorError::Storage(_) | CoordinatorError::InvalidArgument(_) => ErrorCode::InvalidProof,
        }
    }

    /// Whether this error is safe for a client to retry with backoff
    /// (spec §7's "transient" category), as opposed to a proof error the
    /// client must not blindly resubmit.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CoordinatorError::TenantInitializing(_)
                | CoordinatorError::TenantDraining(_)
                | CoordinatorError::Storage(_)
        )
    }
}

/// Errors from the edge store / mutation log / snapshot store backends.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("edge not found: {0}")]
    NotFound(EdgeId),

    #[error("mutation log version conflict: expected {expected}, got {actual}")]
    VersionConflict { expected: u64, actual: u64 },

    #[error("duplicate idempotency key, mutation already applied")]
    DuplicateMutation,

    #[error("sqlite error: {0}")]
    #[cfg(feature = "sqlite")]
    Sqlite(#[from] sqlx::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot directory missing or unreadable: {0}")]
    Snapshot(String),
}
