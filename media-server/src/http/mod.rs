//! HTTP surface: liveness, stats, metrics, and static serving of the
//! artifact directories `media-core`'s packagers write into (spec §6
//! ambient addition — not the production router the spec scopes out).

pub mod handlers;
pub mod middleware;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::limits::{connection_limit_middleware, rate_limit_middleware};
use crate::metrics::metrics_handler;
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let artifact_root = state.config.core.artifact_root.clone();
    let rate_limiter = crate::limits::create_rate_limiter(&state.config);
    let connection_limiter = crate::limits::create_connection_limiter(&state.config);

    Router::new()
        .route("/healthz", get(handlers::health_check))
        .route("/version", get(handlers::version_check))
        .route("/stats", get(handlers::stats))
        .route("/metrics", get(metrics_handler))
        .nest_service("/artifacts", ServeDir::new(artifact_root))
        .layer(axum::middleware::from_fn(middleware::request_logger))
        .layer(axum::middleware::from_fn_with_state(connection_limiter, connection_limit_middleware))
        .layer(axum::middleware::from_fn_with_state(rate_limiter, rate_limit_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;

    #[tokio::test]
    async fn router_builds_without_panicking() {
        let state = Arc::new(AppState::new(ServerConfig::default()));
        let _router = create_router(state);
    }
}
