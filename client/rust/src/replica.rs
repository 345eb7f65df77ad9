//! Client replica (C8): loads a tenant's snapshot, applies the live
//! mutation stream on top of it, and answers `can()` /
//! `findAllObjectsWhereSubjectCan()` queries against the local copy —
//! no network round trip per query (spec §4.8).

use std::collections::{HashSet, VecDeque};
use std::path::Path;
use std::sync::Arc;

use crate::cache::{CacheKey, QueryCache};
use crate::engine::GraphEngine;
use crate::error::{ClientError, Result};
use crate::optimistic::OptimisticLayer;
use crate::wire::{Edge, MutationKind, MutationPayload, NodeId, HAS_PERMISSION};

/// A path-finding search never walks more hops than this, mirroring the
/// server-side proof length the coordinator is willing to validate.
const MAX_SEARCH_DEPTH: usize = 32;

/// Loads edge tables from a snapshot location into a [`GraphEngine`].
///
/// A snapshot is "one tabular file per edge type" (spec §6); `uri` names
/// the directory holding them. Kept as a trait so tests and alternative
/// transports (an HTTP fetch, object storage) can substitute their own
/// loader without pulling a networking dependency into this crate.
pub trait SnapshotSource: Send + Sync {
    fn load(&self, uri: &str) -> Result<Vec<Edge>>;
}

/// Reads CSV files named `<type>.csv` out of a local directory.
pub struct FileSnapshotSource;

impl SnapshotSource for FileSnapshotSource {
    fn load(&self, uri: &str) -> Result<Vec<Edge>> {
        let dir = Path::new(uri);
        let mut edges = Vec::new();
        let entries = std::fs::read_dir(dir).map_err(|e| ClientError::Snapshot(e.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|e| ClientError::Snapshot(e.to_string()))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("csv") {
                continue;
            }
            let edge_type = path
                .file_stem()
                .and_then(|s| s.to_str())
                .ok_or_else(|| ClientError::Snapshot(format!("unreadable snapshot file name: {path:?}")))?
                .to_string();
            let mut reader = csv::Reader::from_path(&path).map_err(|e| ClientError::Snapshot(e.to_string()))?;
            for record in reader.deserialize() {
                let row: crate::wire::CsvEdgeRow = record.map_err(|e| ClientError::Snapshot(e.to_string()))?;
                let edge = row
                    .into_edge(edge_type.clone())
                    .map_err(|e| ClientError::Snapshot(e.to_string()))?;
                edges.push(edge);
            }
        }
        Ok(edges)
    }
}

/// Combines the local graph engine, query cache, and optimistic layer
/// into the replica a caller interacts with.
pub struct ClientReplica {
    engine: Arc<dyn GraphEngine>,
    cache: Arc<QueryCache>,
    optimistic: OptimisticLayer,
    known_version: std::sync::atomic::AtomicU64,
}

impl ClientReplica {
    pub fn new(engine: Arc<dyn GraphEngine>, cache: Arc<QueryCache>) -> Self {
        let optimistic = OptimisticLayer::new(engine.clone(), cache.clone());
        Self {
            engine,
            cache,
            optimistic,
            known_version: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Load the full edge set from a snapshot and adopt its version as
    /// the replica's baseline. Used on first connect and whenever the
    /// coordinator sends a fresh `SNAPSHOT_REF` (e.g. after `LAGGED`).
    pub fn load_snapshot(&self, source: &dyn SnapshotSource, uri: &str, version: u64) -> Result<()> {
        let edges = source.load(uri)?;
        self.engine
            .bulk_load(edges)
            .map_err(|e| ClientError::Snapshot(e.to_string()))?;
        self.cache.clear();
        self.known_version.store(version, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }

    pub fn known_version(&self) -> u64 {
        self.known_version.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Apply a confirmed mutation from the live stream, in strictly
    /// increasing version order (spec §4.7).
    pub fn apply_mutation(&self, version: u64, kind: MutationKind, edge: Edge) -> Result<()> {
        let expected = self.known_version() + 1;
        if version != expected {
            return Err(ClientError::Snapshot(format!(
                "out-of-order mutation: expected version {expected}, got {version}"
            )));
        }
        self.cache.invalidate_node(&edge.source_id);
        self.cache.invalidate_node(&edge.target_id);
        match kind {
            MutationKind::Create => self.engine.insert(edge).map_err(|e| ClientError::Engine(e.to_string()))?,
            MutationKind::Revoke => self.engine.delete(edge.id).map_err(|e| ClientError::Engine(e.to_string()))?,
        }
        self.known_version.store(version, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }

    /// Apply a `grant`/`revoke` optimistically and return the idempotency
    /// key to submit alongside the `MUTATE` message.
    pub fn submit(&self, payload: MutationPayload) -> Result<crate::wire::IdempotencyKey> {
        self.optimistic.apply_optimistic(payload)
    }

    pub fn confirm(&self, key: crate::wire::IdempotencyKey, result: &crate::wire::MutationAck) -> Result<()> {
        self.optimistic.confirm(key, result)
    }

    pub fn pending_mutations(&self) -> Vec<(crate::wire::IdempotencyKey, MutationPayload)> {
        self.optimistic.pending_mutations()
    }

    /// Whether `subject_id` can exercise `capability` on `object_id`,
    /// walking group membership and inheritance edges breadth-first until
    /// a `HAS_PERMISSION` edge to `object_id` with a matching capability
    /// is found, or the search space is exhausted.
    pub fn can(&self, subject_id: &str, object_id: &str, capability: &str) -> bool {
        let key = CacheKey::new(subject_id, object_id, Some(capability.to_string()));
        if let Some(cached) = self.cache.get(&key) {
            return cached;
        }

        let result = self.search(subject_id, object_id, capability);
        self.cache.put(key, result);
        result
    }

    fn search(&self, subject_id: &str, object_id: &str, capability: &str) -> bool {
        let mut visited: HashSet<NodeId> = HashSet::new();
        let mut frontier: VecDeque<NodeId> = VecDeque::new();
        frontier.push_back(subject_id.to_string());
        visited.insert(subject_id.to_string());

        for _ in 0..MAX_SEARCH_DEPTH {
            if frontier.is_empty() {
                break;
            }
            let mut next = VecDeque::new();
            while let Some(node) = frontier.pop_front() {
                for edge in self.engine.edges_from(&node, None) {
                    if edge.edge_type == HAS_PERMISSION
                        && edge.target_id == object_id
                        && edge.capability() == Some(capability)
                    {
                        return true;
                    }
                    if visited.insert(edge.target_id.clone()) {
                        next.push_back(edge.target_id);
                    }
                }
            }
            frontier = next;
        }
        false
    }

    /// All object ids `subject_id` can exercise `capability` on, by
    /// searching outward from the subject rather than checking a single
    /// target (the symmetric direction of [`Self::can`]).
    pub fn find_all_objects_where_subject_can(&self, subject_id: &str, capability: &str) -> Vec<NodeId> {
        let mut visited: HashSet<NodeId> = HashSet::new();
        let mut frontier: VecDeque<NodeId> = VecDeque::new();
        let mut objects = Vec::new();
        frontier.push_back(subject_id.to_string());
        visited.insert(subject_id.to_string());

        for _ in 0..MAX_SEARCH_DEPTH {
            if frontier.is_empty() {
                break;
            }
            let mut next = VecDeque::new();
            while let Some(node) = frontier.pop_front() {
                for edge in self.engine.edges_from(&node, None) {
                    if edge.edge_type == HAS_PERMISSION && edge.capability() == Some(capability) {
                        objects.push(edge.target_id.clone());
                        continue;
                    }
                    if visited.insert(edge.target_id.clone()) {
                        next.push_back(edge.target_id);
                    }
                }
            }
            frontier = next;
        }
        objects
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::InMemoryGraphEngine;
    use crate::wire::{Properties, PropertyValue, CAPABILITY_KEY, MEMBER_OF};
    use std::time::Duration;

    fn edge(edge_type: &str, source: &str, target: &str, capability: Option<&str>) -> Edge {
        let mut properties = Properties::new();
        if let Some(cap) = capability {
            properties.insert(CAPABILITY_KEY.to_string(), PropertyValue::from(cap));
        }
        Edge {
            id: crate::wire::EdgeId::new(),
            edge_type: edge_type.to_string(),
            source_id: source.to_string(),
            target_id: target.to_string(),
            properties,
            created_at: chrono::Utc::now(),
            revoked_at: None,
        }
    }

    fn replica() -> ClientReplica {
        ClientReplica::new(
            Arc::new(InMemoryGraphEngine::new()),
            Arc::new(QueryCache::new(64, Duration::from_secs(60))),
        )
    }

    #[test]
    fn direct_permission_allowed() {
        let replica = replica();
        replica
            .engine
            .insert(edge(HAS_PERMISSION, "u:alice", "r:doc1", Some("read")))
            .unwrap();
        assert!(replica.can("u:alice", "r:doc1", "read"));
    }

    #[test]
    fn two_hop_via_group_allowed() {
        let replica = replica();
        replica.engine.insert(edge(MEMBER_OF, "u:alice", "g:eng", None)).unwrap();
        replica
            .engine
            .insert(edge(HAS_PERMISSION, "g:eng", "r:doc1", Some("read")))
            .unwrap();
        assert!(replica.can("u:alice", "r:doc1", "read"));
    }

    #[test]
    fn disconnected_chain_denies() {
        let replica = replica();
        replica.engine.insert(edge(MEMBER_OF, "u:alice", "g:eng", None)).unwrap();
        replica
            .engine
            .insert(edge(HAS_PERMISSION, "g:sales", "r:doc1", Some("read")))
            .unwrap();
        assert!(!replica.can("u:alice", "r:doc1", "read"));
    }

    #[test]
    fn revoked_edge_denies() {
        let replica = replica();
        let e = edge(HAS_PERMISSION, "u:alice", "r:doc1", Some("read"));
        let id = e.id;
        replica.engine.insert(e).unwrap();
        assert!(replica.can("u:alice", "r:doc1", "read"));
        replica.engine.delete(id).unwrap();
        replica.cache.invalidate_node("u:alice");
        assert!(!replica.can("u:alice", "r:doc1", "read"));
    }

    #[test]
    fn apply_mutation_rejects_out_of_order() {
        let replica = replica();
        let e = edge(HAS_PERMISSION, "u:alice", "r:doc1", Some("read"));
        let err = replica.apply_mutation(2, MutationKind::Create, e).unwrap_err();
        assert!(matches!(err, ClientError::Snapshot(_)));
    }

    #[test]
    fn find_all_objects_collects_matches() {
        let replica = replica();
        replica.engine.insert(edge(MEMBER_OF, "u:alice", "g:eng", None)).unwrap();
        replica
            .engine
            .insert(edge(HAS_PERMISSION, "g:eng", "r:doc1", Some("read")))
            .unwrap();
        replica
            .engine
            .insert(edge(HAS_PERMISSION, "u:alice", "r:doc2", Some("read")))
            .unwrap();
        let mut found = replica.find_all_objects_where_subject_can("u:alice", "read");
        found.sort();
        assert_eq!(found, vec!["r:doc1".to_string(), "r:doc2".to_string()]);
    }
}
