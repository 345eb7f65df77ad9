//! Tenant Coordinator (C6): the per-tenant state machine.
//!
//! One coordinator instance owns one tenant's edge store, mutation log, and
//! snapshot pointer. It is the single logical writer: mutations are
//! serialized through `write_lock`, while reads (snapshot fetch, catch-up,
//! validation against a resolved proof) proceed concurrently.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{info, warn};

use ligature_client::wire::{
    Edge, EdgeId, ErrorCode, MutationAck, MutationKind, MutationPayload, Proof, ServerMessage,
};

use crate::config::{StorageConfig, TenantConfig};
use crate::error::{CoordinatorError, Result};
use crate::interfaces::{AuditOutcome, AuditSink, EdgeStore, MutationLog, SnapshotStore};
use crate::validation::{self, validate};

/// Lifecycle state of a tenant coordinator (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TenantState {
    Cold,
    Initializing,
    Ready,
    Draining,
    Evicted,
}

/// Schema version this binary requires. Bumped when the mutation log or
/// snapshot format changes in an incompatible way.
pub const SCHEMA_VERSION: u32 = 1;

/// Single-writer actor owning one tenant's authoritative state.
pub struct TenantCoordinator {
    tenant_id: String,
    state: RwLock<TenantState>,
    edge_store: Arc<dyn EdgeStore>,
    mutation_log: Arc<dyn MutationLog>,
    snapshot_store: Arc<dyn SnapshotStore>,
    audit: Arc<dyn AuditSink>,
    storage_config: StorageConfig,
    tenant_config: TenantConfig,
    write_lock: Mutex<()>,
    mutations_since_snapshot: AtomicU64,
    last_activity: RwLock<Instant>,
    broadcast: broadcast::Sender<ServerMessage>,
}

impl TenantCoordinator {
    pub fn new(
        tenant_id: impl Into<String>,
        edge_store: Arc<dyn EdgeStore>,
        mutation_log: Arc<dyn MutationLog>,
        snapshot_store: Arc<dyn SnapshotStore>,
        audit: Arc<dyn AuditSink>,
        storage_config: StorageConfig,
        tenant_config: TenantConfig,
    ) -> Self {
        let (tx, _rx) = broadcast::channel(tenant_config.backpressure_high_water_mark);
        Self {
            tenant_id: tenant_id.into(),
            state: RwLock::new(TenantState::Cold),
            edge_store,
            mutation_log,
            snapshot_store,
            audit,
            storage_config,
            tenant_config,
            write_lock: Mutex::new(()),
            mutations_since_snapshot: AtomicU64::new(0),
            last_activity: RwLock::new(Instant::now()),
            broadcast: tx,
        }
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub async fn state(&self) -> TenantState {
        *self.state.read().await
    }

    /// A fresh receiver for the subscriber fan-out broadcast (C7 reads this
    /// to stream `MUTATION` messages to one subscriber).
    pub fn subscribe(&self) -> broadcast::Receiver<ServerMessage> {
        self.broadcast.subscribe()
    }

    /// `COLD → INITIALIZING → READY`: load the latest snapshot, replay the
    /// mutation log tail past it, and register the coordinator as ready to
    /// serve reads and writes. A no-op once already `READY`.
    pub async fn ensure_ready(&self) -> Result<()> {
        {
            let state = self.state.read().await;
            if *state == TenantState::Ready {
                return Ok(());
            }
            if *state == TenantState::Draining {
                return Err(CoordinatorError::TenantDraining(self.tenant_id.clone()));
            }
        }

        *self.state.write().await = TenantState::Initializing;
        self.touch().await;

        match self.mutation_log.schema_version().await? {
            None => self.mutation_log.set_schema_version(SCHEMA_VERSION).await?,
            Some(v) if v == SCHEMA_VERSION => {}
            Some(_) => return Err(CoordinatorError::SchemaMigrationInProgress(self.tenant_id.clone())),
        }

        let snapshot_version = match self.snapshot_store.latest().await? {
            Some((version, uri)) => {
                for edge in self.snapshot_store.load(&uri).await? {
                    self.edge_store.insert(edge).await?;
                }
                version
            }
            None => 0,
        };

        let tail = self.mutation_log.entries_since(snapshot_version).await?;
        for entry in &tail {
            match entry.kind {
                MutationKind::Create => self.edge_store.insert(entry.edge.clone()).await?,
                MutationKind::Revoke => self.edge_store.revoke(entry.edge_id, entry.at).await?,
            }
        }
        self.mutations_since_snapshot
            .store(tail.len() as u64, Ordering::SeqCst);

        *self.state.write().await = TenantState::Ready;
        info!(tenant_id = %self.tenant_id, snapshot_version, replayed = tail.len(), "tenant ready");
        Ok(())
    }

    async fn touch(&self) {
        *self.last_activity.write().await = Instant::now();
    }

    /// Whether this coordinator has been idle longer than its configured
    /// bound and is eligible to move `READY → DRAINING → EVICTED`.
    pub async fn is_idle(&self) -> bool {
        let idle_for = self.last_activity.read().await.elapsed();
        idle_for.as_secs() >= self.tenant_config.idle_eviction_secs
    }

    /// `READY → DRAINING → EVICTED`. In-memory state is discarded; durable
    /// state is untouched. A future request restarts the cycle from `COLD`.
    pub async fn evict(&self) {
        *self.state.write().await = TenantState::Draining;
        *self.state.write().await = TenantState::Evicted;
        info!(tenant_id = %self.tenant_id, "tenant evicted");
    }

    /// Resolve a proof's edge IDs against the store for [`validate`], which
    /// itself stays synchronous per spec §5.
    async fn resolve_proof(&self, proof: &Proof) -> Result<Vec<(EdgeId, Option<Edge>)>> {
        let mut resolved = Vec::with_capacity(proof.edge_ids.len());
        for id in &proof.edge_ids {
            resolved.push((*id, self.edge_store.get(*id).await?));
        }
        Ok(resolved)
    }

    /// The full mutation protocol (spec §4.6 steps 1-8): validate, apply,
    /// append, audit, maybe-snapshot, broadcast, ack. Serialized by
    /// `write_lock` so only one mutation is in flight per tenant at a time.
    pub async fn mutate(
        &self,
        payload: MutationPayload,
        proof: Option<Proof>,
        idempotency_key: uuid::Uuid,
    ) -> Result<MutationAck> {
        self.ensure_ready().await?;
        let _guard = self.write_lock.lock().await;
        self.touch().await;

        if let Some(version) = self.mutation_log.idempotency_key_version(idempotency_key).await? {
            return Ok(MutationAck::Success { version });
        }

        if let Some(proof) = &proof {
            let resolved = self.resolve_proof(proof).await?;
            let capability = proof.capability.as_deref();
            let result = validate(&resolved, &proof.subject_id, &proof.object_id, capability);
            if !result.is_valid() {
                let code = result.code().unwrap_or(ErrorCode::InvalidProof);
                let outcome = if validation::is_attack(code) {
                    AuditOutcome::Attack
                } else {
                    AuditOutcome::Denied
                };
                self.audit.record(
                    &self.tenant_id,
                    outcome,
                    &proof.subject_id,
                    &proof.object_id,
                    &format!("{code}"),
                );
                return Ok(MutationAck::Failure {
                    code,
                    msg: format!("proof rejected: {code}"),
                });
            }
            self.audit.record(
                &self.tenant_id,
                AuditOutcome::Allowed,
                &proof.subject_id,
                &proof.object_id,
                "mutation authorized",
            );
        }

        let (kind, edge) = match payload {
            MutationPayload::Create {
                edge_type,
                source_id,
                target_id,
                properties,
            } => {
                let edge = Edge {
                    id: EdgeId::new(),
                    edge_type,
                    source_id,
                    target_id,
                    properties,
                    created_at: Utc::now(),
                    revoked_at: None,
                };
                self.edge_store.insert(edge.clone()).await?;
                (MutationKind::Create, edge)
            }
            MutationPayload::Revoke { edge_id } => {
                let at = Utc::now();
                self.edge_store.revoke(edge_id, at).await?;
                let edge = self
                    .edge_store
                    .get(edge_id)
                    .await?
                    .ok_or(CoordinatorError::UnknownEdge(edge_id))?;
                (MutationKind::Revoke, edge)
            }
        };

        if proof.is_none() {
            self.audit.record(
                &self.tenant_id,
                AuditOutcome::Allowed,
                &edge.source_id,
                &edge.target_id,
                "mutation applied without proof",
            );
        }

        let entry = self.mutation_log.append(kind, edge.clone()).await?;
        self.mutation_log
            .record_idempotency_key(idempotency_key, entry.version)
            .await?;

        self.mutations_since_snapshot.fetch_add(1, Ordering::SeqCst);
        if self.mutations_since_snapshot.load(Ordering::SeqCst) >= self.storage_config.snapshot_mutation_batch {
            self.refresh_snapshot().await;
        }

        let _ = self.broadcast.send(ServerMessage::Mutation {
            version: entry.version,
            kind,
            edge,
        });

        Ok(MutationAck::Success { version: entry.version })
    }

    /// Snapshot refresh policy trigger (spec §4.4/§4.6 step 6). Failures are
    /// logged, not propagated: a missed snapshot only delays catch-up
    /// shrinkage, it never loses durable mutations.
    async fn refresh_snapshot(&self) {
        let edges = match self.edge_store.all().await {
            Ok(edges) => edges,
            Err(e) => {
                warn!(tenant_id = %self.tenant_id, error = %e, "snapshot refresh: failed to read edge store");
                return;
            }
        };
        let version = match self.mutation_log.head().await {
            Ok(v) => v,
            Err(e) => {
                warn!(tenant_id = %self.tenant_id, error = %e, "snapshot refresh: failed to read log head");
                return;
            }
        };
        if let Err(e) = self.snapshot_store.write(version, &edges).await {
            warn!(tenant_id = %self.tenant_id, error = %e, "snapshot refresh: write failed");
            return;
        }
        if let Err(e) = self.snapshot_store.prune(self.storage_config.snapshot_retention).await {
            warn!(tenant_id = %self.tenant_id, error = %e, "snapshot prune failed");
        }
        self.mutations_since_snapshot.store(0, Ordering::SeqCst);
    }

    /// Entries with `version > since`, for a reconnecting subscriber's
    /// catch-up (spec §4.7 `HELLO`).
    pub async fn entries_since(&self, since: u64) -> Result<Vec<ligature_client::wire::MutationLogEntry>> {
        self.ensure_ready().await?;
        self.touch().await;
        self.mutation_log.entries_since(since).await
    }

    pub async fn latest_snapshot(&self) -> Result<Option<(u64, String)>> {
        self.ensure_ready().await?;
        self.snapshot_store.latest().await
    }

    pub async fn get_edge(&self, id: EdgeId) -> Result<Option<Edge>> {
        self.ensure_ready().await?;
        self.edge_store.get(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{CsvSnapshotStore, MockEdgeStore, MockMutationLog};
    use crate::interfaces::TracingAuditSink;
    use ligature_client::wire::Properties;

    /// Records every call instead of logging it, so tests can assert on
    /// whether an audit record was emitted.
    #[derive(Default)]
    struct SpyAuditSink {
        records: std::sync::Mutex<Vec<(AuditOutcome, String, String)>>,
    }

    impl AuditSink for SpyAuditSink {
        fn record(&self, _tenant_id: &str, outcome: AuditOutcome, subject_id: &str, object_id: &str, _detail: &str) {
            self.records
                .lock()
                .unwrap()
                .push((outcome, subject_id.to_string(), object_id.to_string()));
        }
    }

    fn coordinator(dir: &std::path::Path) -> TenantCoordinator {
        TenantCoordinator::new(
            "t1",
            Arc::new(MockEdgeStore::new()),
            Arc::new(MockMutationLog::new()),
            Arc::new(CsvSnapshotStore::new(dir)),
            Arc::new(TracingAuditSink),
            StorageConfig::default(),
            TenantConfig::default(),
        )
    }

    fn coordinator_with_audit(dir: &std::path::Path, audit: Arc<dyn AuditSink>) -> TenantCoordinator {
        TenantCoordinator::new(
            "t1",
            Arc::new(MockEdgeStore::new()),
            Arc::new(MockMutationLog::new()),
            Arc::new(CsvSnapshotStore::new(dir)),
            audit,
            StorageConfig::default(),
            TenantConfig::default(),
        )
    }

    #[tokio::test]
    async fn ensure_ready_transitions_from_cold() {
        let dir = tempfile::tempdir().unwrap();
        let coord = coordinator(dir.path());
        assert_eq!(coord.state().await, TenantState::Cold);
        coord.ensure_ready().await.unwrap();
        assert_eq!(coord.state().await, TenantState::Ready);
    }

    #[tokio::test]
    async fn create_mutation_assigns_version_one() {
        let dir = tempfile::tempdir().unwrap();
        let coord = coordinator(dir.path());
        let ack = coord
            .mutate(
                MutationPayload::Create {
                    edge_type: "MEMBER_OF".into(),
                    source_id: "u:alice".into(),
                    target_id: "g:eng".into(),
                    properties: Properties::new(),
                },
                None,
                uuid::Uuid::new_v4(),
            )
            .await
            .unwrap();
        assert!(matches!(ack, MutationAck::Success { version: 1 }));
    }

    #[tokio::test]
    async fn duplicate_idempotency_key_returns_same_version() {
        let dir = tempfile::tempdir().unwrap();
        let coord = coordinator(dir.path());
        let key = uuid::Uuid::new_v4();
        let payload = || MutationPayload::Create {
            edge_type: "MEMBER_OF".into(),
            source_id: "u:alice".into(),
            target_id: "g:eng".into(),
            properties: Properties::new(),
        };
        let first = coord.mutate(payload(), None, key).await.unwrap();
        let second = coord.mutate(payload(), None, key).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn invalid_proof_is_rejected_without_mutating_store() {
        let dir = tempfile::tempdir().unwrap();
        let coord = coordinator(dir.path());
        let proof = Proof {
            edge_ids: vec![],
            subject_id: "u:alice".into(),
            object_id: "r:doc1".into(),
            capability: None,
        };
        let ack = coord
            .mutate(
                MutationPayload::Revoke { edge_id: EdgeId::new() },
                Some(proof),
                uuid::Uuid::new_v4(),
            )
            .await
            .unwrap();
        assert!(matches!(ack, MutationAck::Failure { code: ErrorCode::InvalidProof, .. }));
        assert_eq!(coord.mutation_log.head().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn schema_version_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(MockMutationLog::new());
        log.set_schema_version(SCHEMA_VERSION + 1).await.unwrap();
        let coord = TenantCoordinator::new(
            "t1",
            Arc::new(MockEdgeStore::new()),
            log,
            Arc::new(CsvSnapshotStore::new(dir.path())),
            Arc::new(TracingAuditSink),
            StorageConfig::default(),
            TenantConfig::default(),
        );
        let err = coord.ensure_ready().await.unwrap_err();
        assert!(matches!(err, CoordinatorError::SchemaMigrationInProgress(_)));
    }

    #[tokio::test]
    async fn ensure_ready_stamps_schema_version_on_first_init() {
        let dir = tempfile::tempdir().unwrap();
        let coord = coordinator(dir.path());
        coord.ensure_ready().await.unwrap();
        assert_eq!(coord.mutation_log.schema_version().await.unwrap(), Some(SCHEMA_VERSION));
    }

    #[tokio::test]
    async fn snapshot_plus_log_tail_rebuilds_full_edge_set() {
        // Models a durable deployment: the mutation log and snapshot store
        // outlive a coordinator instance; only the in-memory edge store is
        // lost on eviction. A rebuilt coordinator over the same log/snapshot
        // must recover both the snapshotted edge and the log tail past it.
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(MockMutationLog::new());
        let snapshot_store = Arc::new(CsvSnapshotStore::new(dir.path()));
        let coord = TenantCoordinator::new(
            "t1",
            Arc::new(MockEdgeStore::new()),
            log.clone(),
            snapshot_store.clone(),
            Arc::new(TracingAuditSink),
            StorageConfig::default(),
            TenantConfig::default(),
        );
        let snapshotted = coord
            .mutate(
                MutationPayload::Create {
                    edge_type: "MEMBER_OF".into(),
                    source_id: "u:alice".into(),
                    target_id: "g:eng".into(),
                    properties: Properties::new(),
                },
                None,
                uuid::Uuid::new_v4(),
            )
            .await
            .unwrap();
        assert!(matches!(snapshotted, MutationAck::Success { .. }));
        coord.refresh_snapshot().await;

        let tail_entry = coord
            .mutate(
                MutationPayload::Create {
                    edge_type: "MEMBER_OF".into(),
                    source_id: "u:bob".into(),
                    target_id: "g:eng".into(),
                    properties: Properties::new(),
                },
                None,
                uuid::Uuid::new_v4(),
            )
            .await
            .unwrap();
        assert!(matches!(tail_entry, MutationAck::Success { .. }));

        let rebuilt = TenantCoordinator::new(
            "t1",
            Arc::new(MockEdgeStore::new()),
            log,
            snapshot_store,
            Arc::new(TracingAuditSink),
            StorageConfig::default(),
            TenantConfig::default(),
        );
        rebuilt.ensure_ready().await.unwrap();
        let alice_edges = rebuilt.edge_store.edges_from("u:alice", None).await.unwrap();
        let bob_edges = rebuilt.edge_store.edges_from("u:bob", None).await.unwrap();
        assert_eq!(alice_edges.len(), 1);
        assert_eq!(bob_edges.len(), 1);
    }

    #[tokio::test]
    async fn proofless_mutation_still_emits_audit_record() {
        let dir = tempfile::tempdir().unwrap();
        let audit = Arc::new(SpyAuditSink::default());
        let coord = coordinator_with_audit(dir.path(), audit.clone());
        coord
            .mutate(
                MutationPayload::Create {
                    edge_type: "MEMBER_OF".into(),
                    source_id: "u:alice".into(),
                    target_id: "g:eng".into(),
                    properties: Properties::new(),
                },
                None,
                uuid::Uuid::new_v4(),
            )
            .await
            .unwrap();
        let records = audit.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0], (AuditOutcome::Allowed, "u:alice".to_string(), "g:eng".to_string()));
    }
}
