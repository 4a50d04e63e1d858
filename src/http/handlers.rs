use super::state::AppState;
use crate::handles::ConversationRecord;
use crate::live::{ConnectionState, LiveError};
use crate::orchestrator::OrchestratorError;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateConversationRequest {
    /// Optional conversation ID (if not provided, generate UUID)
    pub id: Option<String>,

    /// Optional title
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub state: ConnectionState,
    pub active_conversation: Option<String>,
    pub context_used: u64,
    pub context_max: u64,
    pub session_time_remaining_secs: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct ConnectResponse {
    pub conversation_id: String,
    pub connected: bool,
    pub state: ConnectionState,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, error: String) -> Response {
    (status, Json(ErrorResponse { error })).into_response()
}

fn orchestrator_error(e: OrchestratorError) -> Response {
    let status = match &e {
        OrchestratorError::Live(LiveError::SetupTimeout(_)) => StatusCode::GATEWAY_TIMEOUT,
        OrchestratorError::Live(_) => StatusCode::BAD_GATEWAY,
        OrchestratorError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error!("Session operation failed: {}", e);
    error_response(status, e.to_string())
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /status
pub async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    let orchestrator = &state.orchestrator;
    let budget = orchestrator.client().context_budget();

    Json(StatusResponse {
        state: orchestrator.state(),
        active_conversation: orchestrator.active_conversation(),
        context_used: budget.used(),
        context_max: budget.max(),
        session_time_remaining_secs: orchestrator
            .client()
            .session_time_remaining()
            .map(|d| d.as_secs()),
    })
}

/// GET /conversations
pub async fn list_conversations(State(state): State<AppState>) -> impl IntoResponse {
    let conversations: Vec<ConversationRecord> = state.records.list_conversations().await;
    Json(conversations)
}

/// POST /conversations
/// Create a conversation thread
pub async fn create_conversation(
    State(state): State<AppState>,
    Json(req): Json<CreateConversationRequest>,
) -> impl IntoResponse {
    let id = req
        .id
        .unwrap_or_else(|| format!("conversation-{}", uuid::Uuid::new_v4()));
    let title = req.title.unwrap_or_else(|| "New conversation".to_string());

    match state.records.create_conversation(id, title).await {
        Ok(record) => (StatusCode::CREATED, Json(record)).into_response(),
        Err(e) => {
            error!("Failed to create conversation: {}", e);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to create conversation: {}", e),
            )
        }
    }
}

/// POST /conversations/:conversation_id/connect
/// Connect the live session to a conversation, resuming it when possible
pub async fn connect_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> impl IntoResponse {
    if state.records.get_conversation(&conversation_id).await.is_none() {
        return error_response(
            StatusCode::NOT_FOUND,
            format!("Conversation {} not found", conversation_id),
        );
    }

    info!("Connecting conversation: {}", conversation_id);
    match state.orchestrator.switch_conversation(&conversation_id).await {
        Ok(connected) => {
            let status = if connected {
                StatusCode::OK
            } else {
                StatusCode::CONFLICT
            };
            (
                status,
                Json(ConnectResponse {
                    conversation_id,
                    connected,
                    state: state.orchestrator.state(),
                }),
            )
                .into_response()
        }
        Err(e) => orchestrator_error(e),
    }
}

/// POST /conversations/:conversation_id/messages
/// Send a complete user text turn to the active conversation
pub async fn send_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    Json(req): Json<SendMessageRequest>,
) -> impl IntoResponse {
    if state.orchestrator.active_conversation().as_deref() != Some(conversation_id.as_str()) {
        return error_response(
            StatusCode::CONFLICT,
            format!("Conversation {} is not connected", conversation_id),
        );
    }

    match state.orchestrator.send_text(&req.text).await {
        Ok(true) => StatusCode::ACCEPTED.into_response(),
        Ok(false) => error_response(
            StatusCode::CONFLICT,
            format!("Session is {:?}", state.orchestrator.state()),
        ),
        Err(e) => orchestrator_error(e),
    }
}

/// DELETE /conversations/:conversation_id/handle
/// Forget the conversation's resumption handle (disconnecting it if live)
pub async fn clear_handle(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> impl IntoResponse {
    match state.orchestrator.delete_conversation(&conversation_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => orchestrator_error(e),
    }
}

/// POST /disconnect
pub async fn disconnect(State(state): State<AppState>) -> impl IntoResponse {
    let disconnected = state.orchestrator.disconnect();
    Json(serde_json::json!({ "disconnected": disconnected }))
}
