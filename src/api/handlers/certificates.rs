use std::str::FromStr;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use tracing::debug;

use crate::api::errors::ApiResult;
use crate::api::middlewares::CallerActor;
use crate::api::types::{ApiResponse, ApiState, DeployBody, ListQuery, RevokeBody};
use crate::ca::RevocationReason;
use crate::lifecycle::{CertificateFilter, CertificateRequest, CertificateView, InventorySummary, RequestReceipt};
use crate::store::{Certificate, InstallRecord, RequestRecord};
use crate::types::CertificateStatus;

/// `POST /certificates`
pub async fn request_certificate(
    State(state): State<ApiState>,
    CallerActor(actor): CallerActor,
    Json(request): Json<CertificateRequest>,
) -> ApiResult<(StatusCode, Json<ApiResponse<RequestReceipt>>)> {
    debug!("Certificate requested for {} by {}", request.common_name, actor);
    let receipt = state.engine.request_certificate(&actor, request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(receipt))))
}

/// `GET /certificates?status=&q=`
pub async fn list_certificates(
    State(state): State<ApiState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<ApiResponse<Vec<CertificateView>>>> {
    let status = match query.status.as_deref().map(str::trim) {
        Some(s) if !s.is_empty() => Some(CertificateStatus::from_str(s)?),
        _ => None,
    };

    let filter = CertificateFilter { status, q: query.q };
    Ok(Json(ApiResponse::success(state.engine.list_certificates(&filter).await?)))
}

/// `GET /certificates/:id`
pub async fn get_certificate(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ApiResponse<CertificateView>>> {
    Ok(Json(ApiResponse::success(state.engine.get_certificate(&id).await?)))
}

/// `POST /certificates/:id/revoke`
pub async fn revoke_certificate(
    State(state): State<ApiState>,
    CallerActor(actor): CallerActor,
    Path(id): Path<String>,
    Json(body): Json<RevokeBody>,
) -> ApiResult<Json<ApiResponse<Certificate>>> {
    let reason = RevocationReason::from_str(body.reason.as_deref().unwrap_or_default())?;
    let certificate = state.engine.revoke(&actor, &id, reason).await?;
    Ok(Json(ApiResponse::success(certificate)))
}

/// `POST /certificates/:id/renew`
pub async fn renew_certificate(
    State(state): State<ApiState>,
    CallerActor(actor): CallerActor,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Json<ApiResponse<RequestReceipt>>)> {
    let receipt = state.engine.renew(&actor, &id).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(receipt))))
}

/// `POST /certificates/:id/deploy`
pub async fn deploy_certificate(
    State(state): State<ApiState>,
    CallerActor(actor): CallerActor,
    Path(id): Path<String>,
    Json(body): Json<DeployBody>,
) -> ApiResult<Json<ApiResponse<Vec<InstallRecord>>>> {
    let records = state.engine.deploy(&actor, &id, body.targets).await?;
    Ok(Json(ApiResponse::success(records)))
}

/// `GET /requests/:id`
pub async fn get_request(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ApiResponse<RequestRecord>>> {
    Ok(Json(ApiResponse::success(state.engine.get_request(&id)?)))
}

/// `GET /inventory/summary`
pub async fn inventory_summary(State(state): State<ApiState>) -> Json<ApiResponse<InventorySummary>> {
    Json(ApiResponse::success(state.engine.inventory_summary()))
}
