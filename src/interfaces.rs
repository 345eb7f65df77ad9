//! Storage interfaces the tenant coordinator is built against.
//!
//! Mirrors the teacher's `EventStore`/`SnapshotStore` trait-per-concern
//! split: each storage concern (edges, mutation log, snapshots, audit) is
//! a small async trait with a mock (in-memory) and a persistent (sqlite)
//! implementation behind it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use ligature_client::wire::{Edge, EdgeId, MutationKind, MutationLogEntry};

use crate::error::Result;

/// Authoritative store of live and revoked edges for one tenant (C1).
#[async_trait]
pub trait EdgeStore: Send + Sync {
    /// Insert a newly created edge. `id` is server-generated.
    async fn insert(&self, edge: Edge) -> Result<()>;

    /// Mark an edge revoked; a no-op if it's already revoked (spec §4.1
    /// idempotent revoke requirement).
    async fn revoke(&self, id: EdgeId, at: DateTime<Utc>) -> Result<()>;

    /// Fetch a single edge by id, live or revoked.
    async fn get(&self, id: EdgeId) -> Result<Option<Edge>>;

    /// All live edges with the given `source_id`, optionally filtered by
    /// `edge_type` — the lookup the path validator's step 1 needs.
    async fn edges_from(&self, source_id: &str, edge_type: Option<&str>) -> Result<Vec<Edge>>;

    /// Every edge currently stored, live and revoked, for snapshotting.
    async fn all(&self) -> Result<Vec<Edge>>;
}

/// Append-only record of mutations applied to a tenant, in strictly
/// increasing version order (C4).
#[async_trait]
pub trait MutationLog: Send + Sync {
    /// Append one entry. `entry.version` must equal `self.head() + 1`;
    /// implementations return `StorageError::VersionConflict` otherwise.
    async fn append(&self, kind: MutationKind, edge: Edge) -> Result<MutationLogEntry>;

    /// The highest version appended so far (0 if the log is empty).
    async fn head(&self) -> Result<u64>;

    /// Entries with `version > since`, oldest first — the catch-up read
    /// path (spec §4.7).
    async fn entries_since(&self, since: u64) -> Result<Vec<MutationLogEntry>>;

    /// Record an idempotency key as applied so replays of the same
    /// `(payload, key)` are detected and deduped (spec §4.4).
    async fn record_idempotency_key(&self, key: uuid::Uuid, version: u64) -> Result<()>;

    /// The version a previously applied idempotency key produced, if any.
    async fn idempotency_key_version(&self, key: uuid::Uuid) -> Result<Option<u64>>;

    /// The schema version previously persisted alongside this log, if any
    /// (spec §4.6 "persists a schema version integer alongside the log").
    /// `None` for a tenant that has never been initialized.
    async fn schema_version(&self) -> Result<Option<u32>>;

    /// Persist the schema version, overwriting any previously stamped
    /// value. Survives eviction; read back on the next `INITIALIZING`.
    async fn set_schema_version(&self, version: u32) -> Result<()>;
}

/// Point-in-time tabular snapshot of a tenant's edge set (C5).
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Write a new snapshot at `version`, one CSV file per edge type,
    /// returning the URI clients should fetch it from.
    async fn write(&self, version: u64, edges: &[Edge]) -> Result<String>;

    /// The most recent snapshot's version and URI, if one has been taken.
    async fn latest(&self) -> Result<Option<(u64, String)>>;

    /// Load a previously written snapshot's edges back, for the
    /// coordinator's own `COLD → INITIALIZING` rebuild (spec §4.6: "loads
    /// the latest snapshot from C5, replays mutation log entries ...").
    async fn load(&self, uri: &str) -> Result<Vec<Edge>>;

    /// Delete snapshots older than the retention window, keeping `keep`
    /// most recent versions hot (spec §4.5).
    async fn prune(&self, keep: usize) -> Result<()>;
}

/// Outcome of a permission check or mutation attempt, for the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditOutcome {
    Allowed,
    Denied,
    Attack,
}

/// Pluggable sink for audit events (C3). The default implementation
/// writes structured `tracing` events; a deployment wires those to its
/// log aggregator rather than this crate owning a bespoke storage engine.
pub trait AuditSink: Send + Sync {
    fn record(&self, tenant_id: &str, outcome: AuditOutcome, subject_id: &str, object_id: &str, detail: &str);
}

/// Default [`AuditSink`] backed by `tracing`.
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, tenant_id: &str, outcome: AuditOutcome, subject_id: &str, object_id: &str, detail: &str) {
        match outcome {
            AuditOutcome::Allowed => {
                tracing::info!(tenant_id, subject_id, object_id, detail, "ALLOWED")
            }
            AuditOutcome::Denied => {
                tracing::warn!(tenant_id, subject_id, object_id, detail, "DENIED")
            }
            AuditOutcome::Attack => {
                tracing::warn!(tenant_id, subject_id, object_id, detail, "ATTACK")
            }
        }
    }
}
