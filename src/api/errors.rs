use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::error;

use crate::api::types::ApiResponse;
use crate::error::Error;

/// Handler error
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Authentication required: missing x-actor-id header")]
    Unauthorized,
    #[error(transparent)]
    Core(#[from] Error),
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Core(e) => match e {
                Error::Validation(_) => StatusCode::BAD_REQUEST,
                Error::NotFound(_) | Error::AdapterNotFound(_) => StatusCode::NOT_FOUND,
                Error::Conflict(_) | Error::InstallInProgress { .. } | Error::AgentOffline(_) => {
                    StatusCode::CONFLICT
                }
                Error::Adapter(_) => StatusCode::BAD_GATEWAY,
                Error::AdapterTimeout(_) | Error::AgentTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }

        (status, Json(ApiResponse::<()>::error(self.to_string()))).into_response()
    }
}
