use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;

use super::handlers;
use super::state::AppState;

// API Routes - REST API for programmatic access
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new().nest(
        "/api",
        Router::new()
            // Connection management
            .route(
                "/connections",
                get(handlers::api::list_connections).post(handlers::api::create_connection),
            )
            .route("/connections/test", post(handlers::api::test_connection))
            .route(
                "/connections/{id}",
                get(handlers::api::get_connection).delete(handlers::api::delete_connection),
            )
            .route(
                "/connections/{id}/test",
                post(handlers::api::test_existing_connection),
            )
            .route("/connections/{id}/schema", get(handlers::api::get_schema))
            // Natural language queries
            .route("/query", post(handlers::api::execute_query))
            .route("/history", get(handlers::api::list_history))
            .route(
                "/history/{id}/insights",
                post(handlers::api::generate_insights),
            )
            // System status
            .route("/status", get(handlers::api::system_status)),
    )
}
