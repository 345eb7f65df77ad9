//! The embedded graph engine interface (spec §6).
//!
//! The core treats the client's local graph database as an opaque
//! subsystem exposing three operations: bulk-load a table, run a
//! parameterized pattern query, and apply a single-row insert/delete.
//! Any engine satisfying [`GraphEngine`] can back a [`crate::ClientReplica`];
//! [`InMemoryGraphEngine`] is the reference implementation shipped so the
//! client works out of the box without an external dependency.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use crate::wire::{Edge, EdgeId, NodeId};

/// Result type for graph engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("edge not found: {0}")]
    NotFound(EdgeId),
    #[error("bulk load failed: {0}")]
    BulkLoad(String),
}

/// Interface the client replica uses to drive its local graph store.
///
/// Implementations only need to support exact-match pattern queries over
/// `(source_id, edge_type, target_id)` with any field left unconstrained —
/// the replica and query cache never need a richer query language, since
/// connectivity checking walks one hop at a time (spec §4.8).
pub trait GraphEngine: Send + Sync {
    /// Bulk-load a table of edges, replacing anything previously loaded
    /// for this engine. Used for initial snapshot load (spec §6).
    fn bulk_load(&self, edges: Vec<Edge>) -> Result<()>;

    /// Insert a single edge (a `CREATE` mutation becoming live locally).
    fn insert(&self, edge: Edge) -> Result<()>;

    /// Mark a single edge deleted/revoked by id (a `REVOKE` mutation).
    fn delete(&self, id: EdgeId) -> Result<()>;

    /// All live edges whose `source_id` matches, optionally filtered by
    /// `edge_type`.
    fn edges_from(&self, source_id: &NodeId, edge_type: Option<&str>) -> Vec<Edge>;

    /// Look up a single edge by id, live or revoked.
    fn get(&self, id: EdgeId) -> Option<Edge>;

    /// Number of edges currently loaded (live and revoked).
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-process reference [`GraphEngine`] backed by a `HashMap` plus a
/// `source_id` index, in the spirit of the server's edge store (spec
/// §4.1) but read-mostly and single-tenant.
#[derive(Default)]
pub struct InMemoryGraphEngine {
    edges: RwLock<HashMap<EdgeId, Edge>>,
    by_source: RwLock<HashMap<NodeId, HashSet<EdgeId>>>,
}

impl InMemoryGraphEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn index_insert(&self, edge: &Edge) {
        self.by_source
            .write()
            .unwrap()
            .entry(edge.source_id.clone())
            .or_default()
            .insert(edge.id);
    }
}

impl GraphEngine for InMemoryGraphEngine {
    fn bulk_load(&self, edges: Vec<Edge>) -> Result<()> {
        let mut store = self.edges.write().unwrap();
        let mut index = self.by_source.write().unwrap();
        store.clear();
        index.clear();
        for edge in edges {
            index.entry(edge.source_id.clone()).or_default().insert(edge.id);
            store.insert(edge.id, edge);
        }
        Ok(())
    }

    fn insert(&self, edge: Edge) -> Result<()> {
        self.index_insert(&edge);
        self.edges.write().unwrap().insert(edge.id, edge);
        Ok(())
    }

    fn delete(&self, id: EdgeId) -> Result<()> {
        let mut store = self.edges.write().unwrap();
        let edge = store.get_mut(&id).ok_or(EngineError::NotFound(id))?;
        if edge.revoked_at.is_none() {
            edge.revoked_at = Some(chrono::Utc::now());
        }
        Ok(())
    }

    fn edges_from(&self, source_id: &NodeId, edge_type: Option<&str>) -> Vec<Edge> {
        let index = self.by_source.read().unwrap();
        let store = self.edges.read().unwrap();
        let Some(ids) = index.get(source_id) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| store.get(id))
            .filter(|e| e.is_live())
            .filter(|e| edge_type.is_none_or(|t| e.edge_type == t))
            .cloned()
            .collect()
    }

    fn get(&self, id: EdgeId) -> Option<Edge> {
        self.edges.read().unwrap().get(&id).cloned()
    }

    fn len(&self) -> usize {
        self.edges.read().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::Properties;
    use chrono::Utc;

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

    #[test]
    fn bulk_load_replaces_contents() {
        let engine = InMemoryGraphEngine::new();
        engine.bulk_load(vec![edge("u:alice", "g:eng")]).unwrap();
        assert_eq!(engine.len(), 1);
        engine.bulk_load(vec![]).unwrap();
        assert_eq!(engine.len(), 0);
    }

    #[test]
    fn delete_marks_revoked_not_removed() {
        let engine = InMemoryGraphEngine::new();
        let e = edge("u:alice", "g:eng");
        let id = e.id;
        engine.insert(e).unwrap();
        engine.delete(id).unwrap();
        assert_eq!(engine.len(), 1);
        assert!(engine.get(id).unwrap().revoked_at.is_some());
        assert!(engine.edges_from(&"u:alice".to_string(), None).is_empty());
    }

    #[test]
    fn edges_from_filters_by_type() {
        let engine = InMemoryGraphEngine::new();
        engine.insert(edge("u:alice", "g:eng")).unwrap();
        assert_eq!(engine.edges_from(&"u:alice".to_string(), Some("MEMBER_OF")).len(), 1);
        assert_eq!(engine.edges_from(&"u:alice".to_string(), Some("HAS_PERMISSION")).len(), 0);
    }
}
