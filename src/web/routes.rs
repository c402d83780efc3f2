use axum::{
    http::StatusCode,
    middleware::from_fn,
    response::Json,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::core::app::AppState;
use crate::core::error::ErrorResponse;
use crate::web::handlers::{markdown, tracker};
use crate::web::middleware::log_requests;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Read-only tracker API
        .route("/api/topics", get(tracker::list_topics))
        .route("/api/topics/:id", get(tracker::get_topic))
        .route("/api/topics/:id/reports", get(tracker::list_reports))
        .route("/api/reports/:id", get(tracker::get_report))
        .route("/api/reports/:id/posts", get(tracker::list_posts))

        .route("/api/markdown/preview", post(markdown::preview))

        // Health check
        .route("/health", get(health_check))

        .fallback(not_found)
        .layer(from_fn(log_requests))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}

async fn not_found() -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: "Not found".to_string(),
        }),
    )
}
