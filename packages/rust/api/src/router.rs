use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::AppState;
use crate::handlers;
use crate::rate_limit::{self, ClientLimits};

/// Build the application router.
///
/// Per-client quotas key on the peer address, so serve it with
/// `into_make_service_with_connect_info::<SocketAddr>()`.
pub fn create_router(state: AppState) -> Router {
    let body_limit = DefaultBodyLimit::max(state.max_upload_bytes);
    let global_limits = Arc::new(ClientLimits::global(&state.rate_limit));
    let upload_limits = Arc::new(ClientLimits::upload(&state.rate_limit));
    tracing::debug!(global = ?global_limits, upload = ?upload_limits, "rate limits");
    let state = Arc::new(state);

    let upload = post(handlers::upload)
        .layer(body_limit)
        .layer(middleware::from_fn_with_state(upload_limits, rate_limit::enforce));

    let api = Router::new()
        .route("/upload", upload)
        .route("/status/:task_id", get(handlers::status))
        .route("/tasks", get(handlers::tasks))
        .route("/download/:task_id", get(handlers::download))
        .route("/preview/:task_id", get(handlers::preview))
        .route("/version", get(handlers::version));

    Router::new()
        .nest("/api", api)
        .route("/health", get(handlers::health))
        .layer(middleware::from_fn_with_state(global_limits, rate_limit::enforce))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
