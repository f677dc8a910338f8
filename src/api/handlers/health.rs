use axum::{extract::State, Json};
use tracing::debug;

use crate::api::types::{ApiResponse, ApiState, HealthResponse};

/// Health check handler
///
/// # Route
///
/// `GET /health`
///
/// # Example Response
///
/// ```json
/// {
///   "success": true,
///   "data": {
///     "status": "ok",
///     "version": "0.1.0",
///     "uptime": 3600,
///     "certificates": 12,
///     "agents_online": 3,
///     "adapters": ["local"]
///   }
/// }
/// ```
pub async fn health_check(State(state): State<ApiState>) -> Json<ApiResponse<HealthResponse>> {
    debug!("Health check requested");

    let health = HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime: state.started_at.elapsed().as_secs(),
        certificates: state.engine.store().len(),
        agents_online: state.registry.online_count(),
        adapters: state.engine.adapter_ids(),
    };

    Json(ApiResponse::success(health))
}
