//! HTTP API surface.
//!
//! Read endpoints serve straight from the ledger; the engine is only
//! consulted for health and for the manual sync trigger. Every response
//! carries a `{ success, data, count }` envelope.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::error;

use assetsync_core::{Ledger, OwnerActivity, SyncError};
use assetsync_evm::{ChainReader, SyncEngine};

pub struct AppState<C: ChainReader> {
    pub engine: Arc<SyncEngine<C>>,
    pub ledger: Arc<dyn Ledger>,
}

impl<C: ChainReader> Clone for AppState<C> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            ledger: self.ledger.clone(),
        }
    }
}

pub fn router<C: ChainReader + 'static>(state: AppState<C>) -> Router {
    Router::new()
        .route("/api/assets", get(list_assets))
        .route("/api/assets/:asset_id/transfers", get(asset_transfers))
        .route("/api/owners/:address/assets", get(assets_by_owner))
        .route("/api/analytics", get(analytics))
        .route("/api/sync", post(trigger_sync))
        .route("/api/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// A store or node failure surfaced through a handler.
struct ApiError(SyncError);

impl From<SyncError> for ApiError {
    fn from(e: SyncError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            SyncError::NodeUnavailable(_) | SyncError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        error!(error = %self.0, "request failed");
        let body = Json(json!({ "success": false, "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

fn listed<T: Serialize>(items: Vec<T>) -> Json<serde_json::Value> {
    Json(json!({ "success": true, "count": items.len(), "data": items }))
}

fn item<T: Serialize>(data: T) -> Json<serde_json::Value> {
    Json(json!({ "success": true, "data": data }))
}

async fn list_assets<C: ChainReader>(
    State(state): State<AppState<C>>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(listed(state.ledger.all_assets().await?))
}

async fn asset_transfers<C: ChainReader>(
    State(state): State<AppState<C>>,
    Path(asset_id): Path<u64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(listed(state.ledger.transfers_for_asset(asset_id).await?))
}

async fn assets_by_owner<C: ChainReader>(
    State(state): State<AppState<C>>,
    Path(address): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(listed(state.ledger.assets_by_owner(&address).await?))
}

#[derive(Serialize)]
struct Analytics {
    total_assets: u64,
    total_transfers: u64,
    most_active_owners: Vec<OwnerActivity>,
}

async fn analytics<C: ChainReader>(
    State(state): State<AppState<C>>,
) -> Result<impl IntoResponse, ApiError> {
    let stats = state.ledger.stats().await?;
    let most_active_owners = state.ledger.top_active_owners(5).await?;
    Ok(item(Analytics {
        total_assets: stats.total_assets,
        total_transfers: stats.total_transfers,
        most_active_owners,
    }))
}

async fn trigger_sync<C: ChainReader>(
    State(state): State<AppState<C>>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state.engine.sync_now().await?;
    Ok(item(outcome))
}

async fn health<C: ChainReader>(State(state): State<AppState<C>>) -> Response {
    let status = state.engine.health().await;
    let code = if status.store_connected {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, item(status)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assetsync_core::{Registration, SyncConfig, Transfer};
    use assetsync_evm::{EventKind, RawLog};
    use assetsync_storage::MemoryLedger;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    /// A reader pinned at a fixed height with no logs.
    struct StaticReader {
        height: u64,
    }

    #[async_trait]
    impl ChainReader for StaticReader {
        async fn current_height(&self) -> Result<u64, SyncError> {
            Ok(self.height)
        }

        async fn get_logs(
            &self,
            _kind: EventKind,
            _from: u64,
            _to: u64,
        ) -> Result<Vec<RawLog>, SyncError> {
            Ok(Vec::new())
        }

        async fn block_timestamp(&self, _block: u64) -> Result<i64, SyncError> {
            Ok(1_700_000_000)
        }
    }

    async fn app() -> (Router, Arc<MemoryLedger>) {
        let ledger = Arc::new(MemoryLedger::new());
        let engine = Arc::new(SyncEngine::new(
            SyncConfig::default(),
            StaticReader { height: 120 },
            ledger.clone() as Arc<dyn Ledger>,
        ));
        let state = AppState {
            engine,
            ledger: ledger.clone() as Arc<dyn Ledger>,
        };
        (router(state), ledger)
    }

    async fn get_json(router: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn reg(asset_id: u64, owner: &str) -> Registration {
        Registration {
            asset_id,
            owner: owner.into(),
            description: "deed".into(),
            event_timestamp: 100,
            block_number: 10,
            tx_hash: format!("0x{asset_id:x}"),
            log_index: 0,
            block_timestamp: 112,
        }
    }

    #[tokio::test]
    async fn assets_endpoint_lists_with_envelope() {
        let (app, ledger) = app().await;
        ledger.upsert_registration(&reg(1, "0xaa")).await.unwrap();
        ledger.upsert_registration(&reg(2, "0xbb")).await.unwrap();

        let (status, body) = get_json(app, "/api/assets").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["count"], 2);
        assert_eq!(body["data"][0]["asset_id"], 1);
        assert_eq!(body["data"][0]["current_owner"], "0xaa");
    }

    #[tokio::test]
    async fn transfers_endpoint_scopes_to_asset() {
        let (app, ledger) = app().await;
        let t = Transfer {
            asset_id: 7,
            previous_owner: "0xaa".into(),
            new_owner: "0xbb".into(),
            event_timestamp: 200,
            block_number: 11,
            tx_hash: "0xfeed".into(),
            log_index: 3,
            block_timestamp: 212,
        };
        ledger.upsert_transfer(&t).await.unwrap();

        let (status, body) = get_json(app.clone(), "/api/assets/7/transfers").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 1);
        assert_eq!(body["data"][0]["new_owner"], "0xbb");

        let (_, empty) = get_json(app, "/api/assets/8/transfers").await;
        assert_eq!(empty["count"], 0);
    }

    #[tokio::test]
    async fn owner_lookup_respects_current_owner() {
        let (app, ledger) = app().await;
        ledger.upsert_registration(&reg(1, "0xaa")).await.unwrap();

        let (_, body) = get_json(app.clone(), "/api/owners/0xAA/assets").await;
        assert_eq!(body["count"], 1);

        let (_, none) = get_json(app, "/api/owners/0xbb/assets").await;
        assert_eq!(none["count"], 0);
    }

    #[tokio::test]
    async fn analytics_reports_totals() {
        let (app, ledger) = app().await;
        ledger.upsert_registration(&reg(1, "0xaa")).await.unwrap();

        let (status, body) = get_json(app, "/api/analytics").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["total_assets"], 1);
        assert_eq!(body["data"]["total_transfers"], 0);
    }

    #[tokio::test]
    async fn manual_sync_runs_a_cycle() {
        let (app, ledger) = app().await;

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/sync")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["success"], true);

        // First cycle on an empty ledger pins the watermark at head.
        assert_eq!(ledger.watermark().await.unwrap(), Some(120));
    }

    #[tokio::test]
    async fn health_reports_height_and_watermark() {
        let (app, _ledger) = app().await;
        let (status, body) = get_json(app, "/api/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["chain_height"], 120);
        assert_eq!(body["data"]["store_connected"], true);
    }
}
