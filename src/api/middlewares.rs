use std::time::Instant;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, Request},
    middleware::Next,
    response::Response,
};
use tracing::{debug, info};

use crate::api::errors::ApiError;
use crate::types::Actor;

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_ROLES_HEADER: &str = "x-actor-roles";

pub async fn logging_middleware<B>(req: Request<B>, next: Next<B>) -> Response {
    let path = req.uri().path().to_owned();
    let method = req.method().clone();

    let start = Instant::now();
    debug!("Request started: {} {}", method, path);

    let res = next.run(req).await;

    info!(
        "Request completed: {} {} {} - {:?}",
        method,
        path,
        res.status().as_u16(),
        start.elapsed()
    );

    res
}

/// Caller identity taken from the `x-actor-id` and `x-actor-roles` headers,
/// set by the authenticating proxy in front of the API
#[derive(Debug, Clone)]
pub struct CallerActor(pub Actor);

#[async_trait]
impl<S> FromRequestParts<S> for CallerActor
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get(ACTOR_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or(ApiError::Unauthorized)?;

        let roles: Vec<String> = parts
            .headers
            .get(ACTOR_ROLES_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(CallerActor(Actor::new(id).with_roles(roles)))
    }
}
