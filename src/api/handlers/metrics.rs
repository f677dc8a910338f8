use axum::{
    extract::State,
    http::header,
    response::IntoResponse,
};

use crate::api::errors::ApiResult;
use crate::api::types::ApiState;

/// Prometheus text exposition
pub async fn get_metrics(State(state): State<ApiState>) -> ApiResult<impl IntoResponse> {
    state.metrics.set_agents_online(state.registry.online_count());
    let body = state.metrics.render()?;

    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body))
}
