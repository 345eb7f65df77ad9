//! In-memory `EdgeStore`/`MutationLog`, grounded on the teacher's
//! `RwLock<HashMap<...>>`-backed mock store. Used for tests and for
//! tenants configured without a durable backend.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use ligature_client::wire::{Edge, EdgeId, MutationKind, MutationLogEntry};

use crate::error::{CoordinatorError, Result};
use crate::interfaces::{EdgeStore, MutationLog};

/// In-memory edge store with a `source_id` secondary index.
#[derive(Default)]
pub struct MockEdgeStore {
    edges: RwLock<HashMap<EdgeId, Edge>>,
    by_source: RwLock<HashMap<String, HashSet<EdgeId>>>,
}

impl MockEdgeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EdgeStore for MockEdgeStore {
    /// Upsert on `id`: a `HashMap` insert of the same key twice is already
    /// a no-op-on-conflict, which the coordinator's rebuild-from-snapshot
    /// relies on (spec §4.6).
    async fn insert(&self, edge: Edge) -> Result<()> {
        self.by_source
            .write()
            .unwrap()
            .entry(edge.source_id.clone())
            .or_default()
            .insert(edge.id);
        self.edges.write().unwrap().insert(edge.id, edge);
        Ok(())
    }

    async fn revoke(&self, id: EdgeId, at: DateTime<Utc>) -> Result<()> {
        let mut edges = self.edges.write().unwrap();
        let edge = edges.get_mut(&id).ok_or(CoordinatorError::UnknownEdge(id))?;
        if edge.revoked_at.is_none() {
            edge.revoked_at = Some(at);
        }
        Ok(())
    }

    async fn get(&self, id: EdgeId) -> Result<Option<Edge>> {
        Ok(self.edges.read().unwrap().get(&id).cloned())
    }

    async fn edges_from(&self, source_id: &str, edge_type: Option<&str>) -> Result<Vec<Edge>> {
        let index = self.by_source.read().unwrap();
        let edges = self.edges.read().unwrap();
        let Some(ids) = index.get(source_id) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| edges.get(id))
            .filter(|e| e.is_live())
            .filter(|e| edge_type.is_none_or(|t| e.edge_type == t))
            .cloned()
            .collect())
    }

    async fn all(&self) -> Result<Vec<Edge>> {
        Ok(self.edges.read().unwrap().values().cloned().collect())
    }
}

/// In-memory, append-only mutation log.
#[derive(Default)]
pub struct MockMutationLog {
    entries: RwLock<Vec<MutationLogEntry>>,
    idempotency_keys: RwLock<HashMap<Uuid, u64>>,
    schema_version: RwLock<Option<u32>>,
}

impl MockMutationLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MutationLog for MockMutationLog {
    async fn append(&self, kind: MutationKind, edge: Edge) -> Result<MutationLogEntry> {
        let mut entries = self.entries.write().unwrap();
        let version = entries.last().map(|e| e.version).unwrap_or(0) + 1;
        let entry = MutationLogEntry {
            version,
            kind,
            edge_id: edge.id,
            edge,
            at: Utc::now(),
        };
        entries.push(entry.clone());
        Ok(entry)
    }

    async fn head(&self) -> Result<u64> {
        Ok(self.entries.read().unwrap().last().map(|e| e.version).unwrap_or(0))
    }

    async fn entries_since(&self, since: u64) -> Result<Vec<MutationLogEntry>> {
        Ok(self
            .entries
            .read()
            .unwrap()
            .iter()
            .filter(|e| e.version > since)
            .cloned()
            .collect())
    }

    async fn record_idempotency_key(&self, key: Uuid, version: u64) -> Result<()> {
        self.idempotency_keys.write().unwrap().insert(key, version);
        Ok(())
    }

    async fn idempotency_key_version(&self, key: Uuid) -> Result<Option<u64>> {
        Ok(self.idempotency_keys.read().unwrap().get(&key).copied())
    }

    async fn schema_version(&self) -> Result<Option<u32>> {
        Ok(*self.schema_version.read().unwrap())
    }

    async fn set_schema_version(&self, version: u32) -> Result<()> {
        *self.schema_version.write().unwrap() = Some(version);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ligature_client::wire::Properties;

    fn edge(source: &str, target: &str) -> Edge {
        Edge {
            id: EdgeId::new(),
            edge_type: "MEMBER_OF".into(),
            source_id: source.into(),
            target_id: target.into(),
            properties: Properties::new(),
            created_at: Utc::now(),
            revoked_at: None,
        }
    }

    #[tokio::test]
    async fn insert_then_lookup_by_source() {
        let store = MockEdgeStore::new();
        store.insert(edge("u:alice", "g:eng")).await.unwrap();
        let found = store.edges_from("u:alice", None).await.unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn revoke_is_idempotent() {
        let store = MockEdgeStore::new();
        let e = edge("u:alice", "g:eng");
        let id = e.id;
        store.insert(e).await.unwrap();
        let first_at = Utc::now();
        store.revoke(id, first_at).await.unwrap();
        store.revoke(id, Utc::now()).await.unwrap();
        let stored = store.get(id).await.unwrap().unwrap();
        assert_eq!(stored.revoked_at, Some(first_at));
    }

    #[tokio::test]
    async fn mutation_log_versions_increase_by_one() {
        let log = MockMutationLog::new();
        let v1 = log.append(MutationKind::Create, edge("u:alice", "g:eng")).await.unwrap();
        let v2 = log.append(MutationKind::Create, edge("u:bob", "g:eng")).await.unwrap();
        assert_eq!(v1.version, 1);
        assert_eq!(v2.version, 2);
        assert_eq!(log.head().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn entries_since_returns_tail_only() {
        let log = MockMutationLog::new();
        for i in 0..5 {
            log.append(MutationKind::Create, edge(&format!("u:{i}"), "g:eng"))
                .await
                .unwrap();
        }
        let tail = log.entries_since(3).await.unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].version, 4);
    }
}
