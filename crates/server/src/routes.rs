//! Route configuration.

use crate::auth::auth_middleware;
use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::middleware;
use axum::routing::{get, post, put};
use axum::Router;
use tower_http::trace::TraceLayer;

/// Build the full application router.
pub fn create_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/v1/uploads", post(handlers::uploads::create_upload))
        .route("/v1/uploads", get(handlers::uploads::list_uploads))
        .route(
            "/v1/uploads/{id}/chunks/{index}",
            put(handlers::uploads::write_chunk),
        )
        .route("/v1/uploads/{id}", get(handlers::uploads::upload_status))
        .route(
            "/v1/uploads/{id}/complete",
            post(handlers::uploads::complete_upload),
        )
        .route(
            "/v1/uploads/{id}/abort",
            post(handlers::uploads::abort_upload),
        )
        .route("/v1/quota", get(handlers::quota::get_quota))
        .route(
            "/v1/admin/quota/{user_id}/used",
            post(handlers::quota::adjust_used),
        )
        .route(
            "/v1/admin/quota/{user_id}/size",
            post(handlers::quota::adjust_size),
        )
        .route(
            "/v1/admin/quota/{user_id}/records",
            get(handlers::quota::list_records),
        )
        .route("/v1/admin/users", post(handlers::users::create_user))
        .route("/v1/auth/whoami", get(handlers::auth::whoami))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let mut public = Router::new().route("/v1/health", get(handlers::common::health_handler));
    if state.config.server.metrics_enabled {
        public = public.route("/metrics", get(metrics_handler));
    }

    protected
        .merge(public)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
