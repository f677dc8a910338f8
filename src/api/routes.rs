use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::handlers::{agents, certificates, health::health_check, metrics::get_metrics};
use crate::api::middlewares::logging_middleware;
use crate::api::types::ApiState;

/// Routes below the path prefix
fn api_routes() -> Router<ApiState> {
    let certificate_routes = Router::new()
        .route(
            "/",
            get(certificates::list_certificates).post(certificates::request_certificate),
        )
        .route("/:id", get(certificates::get_certificate))
        .route("/:id/revoke", post(certificates::revoke_certificate))
        .route("/:id/renew", post(certificates::renew_certificate))
        .route("/:id/deploy", post(certificates::deploy_certificate));

    let agent_routes = Router::new()
        .route("/", get(agents::list_agents).post(agents::register_agent))
        .route(
            "/:id",
            get(agents::get_agent).delete(agents::decommission_agent),
        )
        .route("/:id/heartbeat", post(agents::heartbeat))
        .route("/:id/install", post(agents::install));

    Router::new()
        .nest("/certificates", certificate_routes)
        .nest("/agents", agent_routes)
        .route("/requests/:id", get(certificates::get_request))
        .route("/inventory/summary", get(certificates::inventory_summary))
        .route("/health", get(health_check))
        .route("/metrics", get(get_metrics))
}

/// Create router with all API routes
pub fn create_router(state: ApiState) -> Router {
    let prefix = state.settings.api.path_prefix.clone();

    // Health checks also answer outside the prefix
    let public_routes = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(get_metrics));

    let middleware_stack = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(logging_middleware))
        .layer(CorsLayer::permissive())
        .layer(CompressionLayer::new());

    Router::new()
        .merge(public_routes)
        .nest(&prefix, api_routes())
        .layer(middleware_stack)
        .with_state(state)
}

/// Router without middleware, for handler tests
pub fn create_test_router(state: ApiState) -> Router {
    let prefix = state.settings.api.path_prefix.clone();

    Router::new().nest(&prefix, api_routes()).with_state(state)
}
