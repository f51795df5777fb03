//! HTTP 服務：`POST /api/rusle` 與 `GET /health`

use crate::config::InsightConfig;
use crate::core::Orchestrator;
use crate::domain::model::AnalysisRequest;
use crate::utils::error::InsightError;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator<InsightConfig>>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator<InsightConfig>) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            started_at: Utc::now(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub uptime_seconds: i64,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/rusle", post(analyze))
        .with_state(state)
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let service = &state.orchestrator.config().service;
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: service.name.clone(),
        version: service.version.clone(),
        uptime_seconds: (Utc::now() - state.started_at).num_seconds(),
    })
}

/// 多邊形不合法回 400，其餘情況都回 200 與完整回應文件
pub async fn analyze(
    State(state): State<AppState>,
    Json(request): Json<AnalysisRequest>,
) -> Response {
    match state.orchestrator.run(request).await {
        Ok(document) => (StatusCode::OK, Json(document)).into_response(),
        Err(e @ InsightError::InvalidGeometry { .. }) => {
            tracing::warn!("🚫 Rejected polygon: {}", e);
            (
                StatusCode::BAD_REQUEST,
                Json(json!({ "success": false, "error": e.user_friendly_message() })),
            )
                .into_response()
        }
        Err(e) => {
            tracing::error!(
                "❌ Analysis failed: {} (Category: {:?}, Severity: {:?})",
                e,
                e.category(),
                e.severity()
            );
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "success": false, "error": e.user_friendly_message() })),
            )
                .into_response()
        }
    }
}
