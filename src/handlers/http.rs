//! Coordinator public HTTP surface (spec §6).

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use ligature_client::wire::{EdgeId, MutationAck, MutationPayload, Proof};

use crate::tenant::TenantRegistry;
use crate::transport::events_handler;

pub fn router(registry: Arc<TenantRegistry>) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);
    Router::new()
        .route("/tenant/:tenant_id/mutate", post(mutate_handler))
        .route("/tenant/:tenant_id/snapshot", get(snapshot_handler))
        .route("/tenant/:tenant_id/events", get(events_handler))
        .route("/tenant/:tenant_id/edge/:edge_id", get(edge_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(registry)
}

#[derive(Debug, Deserialize)]
pub struct MutateRequest {
    pub payload: MutationPayload,
    #[serde(default)]
    pub proof: Option<Proof>,
    pub idempotency_key: uuid::Uuid,
}

#[derive(Debug, Serialize)]
pub struct MutateResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<ligature_client::wire::ErrorCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
}

async fn mutate_handler(
    State(registry): State<Arc<TenantRegistry>>,
    Path(tenant_id): Path<String>,
    Json(request): Json<MutateRequest>,
) -> impl IntoResponse {
    let coordinator = registry.get_or_create(&tenant_id).await;
    match coordinator
        .mutate(request.payload, request.proof, request.idempotency_key)
        .await
    {
        Ok(MutationAck::Success { version }) => (
            StatusCode::OK,
            Json(MutateResponse {
                success: true,
                version: Some(version),
                code: None,
                msg: None,
            }),
        ),
        Ok(MutationAck::Failure { code, msg }) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(MutateResponse {
                success: false,
                version: None,
                code: Some(code),
                msg: Some(msg),
            }),
        ),
        Err(e) => (
            status_for(&e),
            Json(MutateResponse {
                success: false,
                version: None,
                code: Some(e.code()),
                msg: Some(e.to_string()),
            }),
        ),
    }
}

#[derive(Debug, Deserialize)]
pub struct SnapshotQuery {
    pub since: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct SnapshotResponse {
    pub version: u64,
    pub uri: String,
}

async fn snapshot_handler(
    State(registry): State<Arc<TenantRegistry>>,
    Path(tenant_id): Path<String>,
    Query(query): Query<SnapshotQuery>,
) -> impl IntoResponse {
    let coordinator = registry.get_or_create(&tenant_id).await;
    match coordinator.latest_snapshot().await {
        Ok(Some((version, uri))) => {
            if query.since.is_some_and(|since| since >= version) {
                StatusCode::NOT_MODIFIED.into_response()
            } else {
                Json(SnapshotResponse { version, uri }).into_response()
            }
        }
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => (status_for(&e), e.to_string()).into_response(),
    }
}

async fn edge_handler(
    State(registry): State<Arc<TenantRegistry>>,
    Path((tenant_id, edge_id)): Path<(String, uuid::Uuid)>,
) -> impl IntoResponse {
    let coordinator = registry.get_or_create(&tenant_id).await;
    match coordinator.get_edge(EdgeId(edge_id)).await {
        Ok(Some(edge)) => Json(edge).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => (status_for(&e), e.to_string()).into_response(),
    }
}

fn status_for(e: &crate::error::CoordinatorError) -> StatusCode {
    if e.is_transient() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::BAD_REQUEST
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use crate::config::Config;
    use crate::tenant::{InMemoryStorageFactory, TenantRegistry};

    use super::*;

    fn app(dir: &std::path::Path) -> Router {
        let registry = Arc::new(TenantRegistry::new(
            Arc::new(InMemoryStorageFactory {
                snapshot_root: dir.to_path_buf(),
            }),
            &Config::for_test(),
        ));
        router(registry)
    }

    #[tokio::test]
    async fn unknown_edge_returns_404() {
        let dir = tempfile::tempdir().unwrap();
        let req = Request::builder()
            .uri(format!("/tenant/t1/edge/{}", uuid::Uuid::new_v4()))
            .body(Body::empty())
            .unwrap();
        let resp = app(dir.path()).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn mutate_then_fetch_round_trips_through_router() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());

        let body = serde_json::json!({
            "payload": {
                "kind": "CREATE",
                "edge_type": "MEMBER_OF",
                "source_id": "u:a",
                "target_id": "g:eng",
                "properties": {}
            },
            "idempotency_key": uuid::Uuid::new_v4(),
        });
        let req = Request::builder()
            .method("POST")
            .uri("/tenant/t1/mutate")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
