//! HTTP API layer.
//!
//! Thin axum handlers over the application services. Every response is a
//! machine-readable JSON envelope; failures carry {success:false, error} and
//! a status code mapped from the error kind. Handlers never panic across the
//! boundary.

pub mod brokers;
pub mod health;
pub mod import;
pub mod ingest;
pub mod sync;

use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::application::services::connection_registry::ConnectionRegistry;
use crate::application::services::reconciler::TradeReconciler;
use crate::application::services::sync_service::{SyncError, SyncService};
use crate::config::AppConfig;
use crate::persistence::DbPool;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub pool: DbPool,
    pub registry: Arc<ConnectionRegistry>,
    pub reconciler: Arc<TradeReconciler>,
    pub sync: Arc<SyncService>,
}

impl AppState {
    pub fn new(config: AppConfig, pool: DbPool) -> Self {
        let reconciler = Arc::new(TradeReconciler::new(pool.clone()));
        let sync = Arc::new(SyncService::new(
            config.clone(),
            pool.clone(),
            reconciler.clone(),
        ));
        Self {
            config,
            pool,
            registry: Arc::new(ConnectionRegistry::new()),
            reconciler,
            sync,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/api/ingest", post(ingest::ingest).get(ingest::status))
        .route("/api/sync", post(sync::credential_sync))
        .route("/api/import", post(import::import_file))
        .route("/api/brokers", post(brokers::create).get(brokers::list))
        .route(
            "/api/brokers/:id",
            get(brokers::fetch).put(brokers::update).delete(brokers::remove),
        )
        .route("/api/brokers/:id/reconnect", post(brokers::reconnect))
        .route("/api/brokers/:id/sync", post(brokers::sync_broker))
        .with_state(state)
}

pub(crate) type ApiError = (StatusCode, Json<Value>);

pub(crate) fn error_response(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(json!({ "success": false, "error": message.into() })),
    )
}

/// Status mapping shared by the sync and broker routes.
pub(crate) fn sync_error_status(e: &SyncError) -> StatusCode {
    match e {
        SyncError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        SyncError::Validation(_) => StatusCode::BAD_REQUEST,
        SyncError::BrokerNotFound(_) => StatusCode::NOT_FOUND,
        SyncError::Connector(e) if e.is_validation() => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
