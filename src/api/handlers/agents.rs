use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use tracing::info;

use crate::agent::{AgentRegistration, AgentView};
use crate::api::errors::ApiResult;
use crate::api::middlewares::CallerActor;
use crate::api::types::{ApiResponse, ApiState, DecommissionQuery, HeartbeatAck, HeartbeatBody, InstallBody};
use crate::store::InstallRecord;

/// `POST /agents`
pub async fn register_agent(
    State(state): State<ApiState>,
    Json(registration): Json<AgentRegistration>,
) -> ApiResult<(StatusCode, Json<ApiResponse<AgentView>>)> {
    let agent = state.registry.register(registration)?;
    let view = state.registry.view(&agent.id)?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(view))))
}

/// `GET /agents`
pub async fn list_agents(State(state): State<ApiState>) -> Json<ApiResponse<Vec<AgentView>>> {
    Json(ApiResponse::success(state.registry.list()))
}

/// `GET /agents/:id`
pub async fn get_agent(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ApiResponse<AgentView>>> {
    Ok(Json(ApiResponse::success(state.registry.view(&id)?)))
}

/// `POST /agents/:id/heartbeat`
pub async fn heartbeat(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    body: Option<Json<HeartbeatBody>>,
) -> ApiResult<Json<ApiResponse<HeartbeatAck>>> {
    let metrics = body.and_then(|Json(body)| body.metrics);
    let agent = state.registry.heartbeat(&id, metrics)?;

    Ok(Json(ApiResponse::success(HeartbeatAck {
        agent_id: agent.id,
        last_checkin: agent.last_checkin,
        heartbeat_timeout_secs: state.registry.heartbeat_timeout().as_secs(),
    })))
}

/// `POST /agents/:id/install`
pub async fn install(
    State(state): State<ApiState>,
    CallerActor(actor): CallerActor,
    Path(id): Path<String>,
    Json(body): Json<InstallBody>,
) -> ApiResult<Json<ApiResponse<InstallRecord>>> {
    let record = state
        .engine
        .install(&actor, &id, &body.certificate_id, &body.path, body.reload_cmd)
        .await?;
    Ok(Json(ApiResponse::success(record)))
}

/// `DELETE /agents/:id?force=`
pub async fn decommission_agent(
    State(state): State<ApiState>,
    CallerActor(actor): CallerActor,
    Path(id): Path<String>,
    Query(query): Query<DecommissionQuery>,
) -> ApiResult<Json<ApiResponse<AgentView>>> {
    let agent = state.registry.decommission(&id, query.force)?;
    info!("Agent {} decommissioned by {}", id, actor);

    Ok(Json(ApiResponse::success(AgentView { agent, online: false })))
}
