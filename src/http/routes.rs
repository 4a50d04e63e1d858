use super::handlers;
use super::state::AppState;
use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/status", get(handlers::get_status))
        // Conversations
        .route(
            "/conversations",
            get(handlers::list_conversations).post(handlers::create_conversation),
        )
        .route(
            "/conversations/:conversation_id/connect",
            post(handlers::connect_conversation),
        )
        .route(
            "/conversations/:conversation_id/messages",
            post(handlers::send_message),
        )
        .route(
            "/conversations/:conversation_id/handle",
            delete(handlers::clear_handle),
        )
        // Session control
        .route("/disconnect", post(handlers::disconnect))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
