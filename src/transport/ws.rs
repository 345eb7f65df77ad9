//! Subscriber Transport (C7): axum WebSocket upgrade implementing the
//! client/server message protocol of spec §4.7 — `HELLO`/`MUTATE`/`PING`
//! inbound, `SNAPSHOT_REF`/`MUTATION`/`ACK`/`PONG`/`ERROR` outbound.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use ligature_client::wire::{ClientMessage, ErrorCode, ServerMessage};

use crate::tenant::TenantRegistry;
use crate::transport::broadcast::fanout_to_subscriber;

/// Axum handler for `GET /tenant/{t}/events`.
pub async fn events_handler(
    Path(tenant_id): Path<String>,
    State(registry): State<Arc<TenantRegistry>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_session(socket, registry, tenant_id))
}

async fn handle_session(socket: WebSocket, registry: Arc<TenantRegistry>, tenant_id: String) {
    let coordinator = registry.get_or_create(&tenant_id).await;
    if let Err(e) = coordinator.ensure_ready().await {
        warn!(tenant_id, error = %e, "tenant failed to become ready for subscriber");
        return;
    }

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<ServerMessage>(256);

    let writer = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let Ok(text) = serde_json::to_string(&msg) else { continue };
            if ws_tx.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let mut fanout_handle: Option<tokio::task::JoinHandle<()>> = None;

    while let Some(frame) = ws_rx.next().await {
        let frame = match frame {
            Ok(f) => f,
            Err(_) => break,
        };
        let text = match frame {
            Message::Text(t) => t,
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) | Message::Binary(_) => continue,
        };

        let Ok(client_msg) = serde_json::from_str::<ClientMessage>(&text) else {
            let _ = out_tx
                .send(ServerMessage::Error {
                    code: ErrorCode::InvalidProof,
                    msg: "unparseable message".to_string(),
                })
                .await;
            continue;
        };

        match client_msg {
            ClientMessage::Hello { known_version } => {
                if let Some(handle) = fanout_handle.take() {
                    handle.abort();
                }
                let coordinator = coordinator.clone();
                let out_tx = out_tx.clone();
                fanout_handle = Some(tokio::spawn(async move {
                    fanout_to_subscriber(&coordinator, known_version, &out_tx).await;
                }));
            }
            ClientMessage::Mutate {
                payload,
                proof,
                idempotency_key,
            } => {
                let result = coordinator.mutate(payload, proof, idempotency_key.0).await;
                let ack = match result {
                    Ok(ack) => ack,
                    Err(e) => ligature_client::wire::MutationAck::Failure {
                        code: e.code(),
                        msg: e.to_string(),
                    },
                };
                let _ = out_tx
                    .send(ServerMessage::Ack {
                        idempotency_key,
                        result: ack,
                    })
                    .await;
            }
            ClientMessage::Ping => {
                let _ = out_tx.send(ServerMessage::Pong).await;
            }
        }
    }

    if let Some(handle) = fanout_handle.take() {
        handle.abort();
    }
    drop(out_tx);
    let _ = tokio::time::timeout(Duration::from_secs(1), writer).await;
    debug!(tenant_id, "subscriber session closed");
}
