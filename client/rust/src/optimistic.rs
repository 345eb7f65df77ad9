//! Optimistic mutation layer (C9): apply `grant`/`revoke` to the local
//! replica immediately, before the round trip to the coordinator confirms
//! them, then either let the confirmed mutation arrive over the normal
//! stream or roll back by applying the symmetric inverse.
//!
//! Pending mutations are keyed by [`IdempotencyKey`] so a dropped
//! connection can resubmit the same in-flight set after reconnect without
//! double-applying anything server-side (spec §4.9, §8 scenario S6).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::cache::QueryCache;
use crate::engine::GraphEngine;
use crate::error::{ClientError, Result};
use crate::wire::{Edge, EdgeId, IdempotencyKey, MutationAck, MutationPayload};

/// A mutation applied locally but not yet confirmed by the coordinator.
struct Pending {
    payload: MutationPayload,
    /// State needed to undo the optimistic local apply if the server
    /// rejects the mutation.
    inverse: Inverse,
}

enum Inverse {
    /// Undo a local `Create` by deleting the tentative edge.
    DeleteTentative(EdgeId),
    /// Undo a local `Revoke` by restoring the edge exactly as it was.
    Restore(Edge),
}

/// Coordinates optimistic local application and rollback of mutations
/// against a [`GraphEngine`] and the associated [`QueryCache`].
pub struct OptimisticLayer {
    engine: Arc<dyn GraphEngine>,
    cache: Arc<QueryCache>,
    pending: Mutex<HashMap<IdempotencyKey, Pending>>,
}

impl OptimisticLayer {
    pub fn new(engine: Arc<dyn GraphEngine>, cache: Arc<QueryCache>) -> Self {
        Self {
            engine,
            cache,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Apply `payload` to the local replica immediately and register it as
    /// pending under a freshly generated idempotency key. Returns the key
    /// to attach to the `MUTATE` message sent to the coordinator.
    pub fn apply_optimistic(&self, payload: MutationPayload) -> Result<IdempotencyKey> {
        let key = IdempotencyKey::new();
        let inverse = match &payload {
            MutationPayload::Create {
                edge_type,
                source_id,
                target_id,
                properties,
            } => {
                let tentative = Edge {
                    id: EdgeId::new(),
                    edge_type: edge_type.clone(),
                    source_id: source_id.clone(),
                    target_id: target_id.clone(),
                    properties: properties.clone(),
                    created_at: chrono::Utc::now(),
                    revoked_at: None,
                };
                let tentative_id = tentative.id;
                self.engine
                    .insert(tentative.clone())
                    .map_err(|e| ClientError::Engine(e.to_string()))?;
                self.cache.invalidate_node(source_id);
                self.cache.invalidate_node(target_id);
                Inverse::DeleteTentative(tentative_id)
            }
            MutationPayload::Revoke { edge_id } => {
                let original = self
                    .engine
                    .get(*edge_id)
                    .ok_or_else(|| ClientError::InvalidArgument(format!("unknown local edge {edge_id}")))?;
                self.engine
                    .delete(*edge_id)
                    .map_err(|e| ClientError::Engine(e.to_string()))?;
                self.cache.invalidate_node(&original.source_id);
                self.cache.invalidate_node(&original.target_id);
                Inverse::Restore(original)
            }
        };

        self.pending.lock().unwrap().insert(key, Pending { payload, inverse });
        Ok(key)
    }

    /// Resolve a pending mutation once the coordinator's `ACK` arrives.
    /// On success the optimistic apply stands (the confirmed `MUTATION`
    /// broadcast will reconcile any id mismatch); on failure the inverse
    /// is applied and the cache entries touched are invalidated again.
    pub fn confirm(&self, key: IdempotencyKey, result: &MutationAck) -> Result<()> {
        let pending = self.pending.lock().unwrap().remove(&key);
        let Some(pending) = pending else {
            return Ok(());
        };

        match result {
            MutationAck::Success { .. } => Ok(()),
            MutationAck::Failure { .. } => {
                match pending.inverse {
                    Inverse::DeleteTentative(id) => {
                        self.engine.delete(id).map_err(|e| ClientError::Engine(e.to_string()))?;
                        self.cache.clear();
                    }
                    Inverse::Restore(mut edge) => {
                        edge.revoked_at = None;
                        self.cache.invalidate_node(&edge.source_id);
                        self.cache.invalidate_node(&edge.target_id);
                        self.engine.insert(edge).map_err(|e| ClientError::Engine(e.to_string()))?;
                    }
                }
                Ok(())
            }
        }
    }

    /// Every still-pending mutation, for resubmission after a reconnect.
    /// Order is unspecified; the coordinator de-duplicates by idempotency
    /// key regardless of submission order.
    pub fn pending_mutations(&self) -> Vec<(IdempotencyKey, MutationPayload)> {
        self.pending
            .lock()
            .unwrap()
            .iter()
            .map(|(k, p)| (*k, p.payload.clone()))
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::InMemoryGraphEngine;
    use crate::wire::Properties;
    use std::time::Duration;

    fn layer() -> OptimisticLayer {
        OptimisticLayer::new(
            Arc::new(InMemoryGraphEngine::new()),
            Arc::new(QueryCache::new(64, Duration::from_secs(60))),
        )
    }

    #[test]
    fn create_applies_and_rolls_back_on_failure() {
        let layer = layer();
        let key = layer
            .apply_optimistic(MutationPayload::Create {
                edge_type: "MEMBER_OF".into(),
                source_id: "u:alice".into(),
                target_id: "g:eng".into(),
                properties: Properties::new(),
            })
            .unwrap();
        assert_eq!(layer.pending_count(), 1);
        assert_eq!(layer.engine.edges_from(&"u:alice".to_string(), None).len(), 1);

        layer
            .confirm(
                key,
                &MutationAck::Failure {
                    code: crate::wire::ErrorCode::InvalidProof,
                    msg: "no proof".into(),
                },
            )
            .unwrap();
        assert_eq!(layer.pending_count(), 0);
        assert_eq!(layer.engine.edges_from(&"u:alice".to_string(), None).len(), 0);
    }

    #[test]
    fn revoke_restores_on_failure() {
        let layer = layer();
        let edge = Edge {
            id: EdgeId::new(),
            edge_type: "MEMBER_OF".into(),
            source_id: "u:alice".into(),
            target_id: "g:eng".into(),
            properties: Properties::new(),
            created_at: chrono::Utc::now(),
            revoked_at: None,
        };
        let id = edge.id;
        layer.engine.insert(edge).unwrap();

        let key = layer.apply_optimistic(MutationPayload::Revoke { edge_id: id }).unwrap();
        assert!(layer.engine.get(id).unwrap().revoked_at.is_some());

        layer
            .confirm(
                key,
                &MutationAck::Failure {
                    code: crate::wire::ErrorCode::UnknownEdge,
                    msg: "gone".into(),
                },
            )
            .unwrap();
        assert!(layer.engine.get(id).unwrap().revoked_at.is_none());
    }

    #[test]
    fn success_clears_pending_without_rollback() {
        let layer = layer();
        let key = layer
            .apply_optimistic(MutationPayload::Create {
                edge_type: "MEMBER_OF".into(),
                source_id: "u:alice".into(),
                target_id: "g:eng".into(),
                properties: Properties::new(),
            })
            .unwrap();
        layer.confirm(key, &MutationAck::Success { version: 7 }).unwrap();
        assert_eq!(layer.pending_count(), 0);
        assert_eq!(layer.engine.edges_from(&"u:alice".to_string(), None).len(), 1);
    }
}
