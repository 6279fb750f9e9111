use axum::{
    Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use serde_json::{Value, json};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use triage_flow::{ConversationTurn, Pipeline, PipelineRequest, SessionStore};

use crate::{
    config::ServiceConfig,
    models::{ChatFailure, ChatRequest, ChatResponse, SessionResponse},
    workflow::build_triage_pipeline,
};

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<Value>)>;
type ApiError = (StatusCode, Json<Value>);

fn bad_request_error(message: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message })))
}

fn not_found_error(message: &str, id: &str) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": message,
            "session_id": id
        })),
    )
}

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub sessions: Arc<SessionStore>,
}

impl AppState {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            sessions: Arc::new(SessionStore::new()),
        }
    }
}

pub async fn create_app(config: &ServiceConfig) -> anyhow::Result<Router> {
    let pipeline = build_triage_pipeline(config).await?;
    Ok(build_router(AppState::new(pipeline)))
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/api/chat", post(chat))
        .route(
            "/api/session/{session_id}",
            get(get_session).delete(delete_session),
        )
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

async fn root() -> Json<Value> {
    Json(json!({
        "service": "Medical Triage Service",
        "version": "1.0.0",
        "description": "Multi-stage medical triage with judge validation and clarification",
        "endpoints": {
            "POST /api/chat": "Run a patient message through the triage pipeline",
            "GET /api/session/{session_id}": "Get the stored conversation for a session",
            "DELETE /api/session/{session_id}": "Forget a session",
            "GET /health": "Health check"
        }
    }))
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

fn validate_message(message: &str) -> Result<(), ApiError> {
    if message.trim().is_empty() {
        return Err(bad_request_error("Message cannot be empty"));
    }
    Ok(())
}

async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    validate_message(&request.message)?;

    let session_id = request
        .session_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    // Held until the turn is stored so requests on one session run in order.
    let mut session = state.sessions.lock(&session_id).await;
    let history = match request.conversation_history {
        Some(history) => history,
        None => session.messages.clone(),
    };

    info!(
        session_id = %session_id,
        history_len = history.len(),
        "Processing chat message"
    );

    let outcome = state
        .pipeline
        .run(
            PipelineRequest::new(request.message.as_str(), history.clone())
                .with_session(session_id.as_str()),
        )
        .await;
    session.context = outcome.context.clone();

    let Some(record) = outcome.record else {
        warn!(session_id = %session_id, error = %outcome.final_text, "Triage pipeline failed");
        let failure = ChatFailure {
            error: outcome.final_text,
            session_id,
            diagnostics: outcome.diagnostics,
        };
        return Ok(Json(failure).into_response());
    };

    // Client-supplied history supersedes whatever was stored for the session.
    session.messages = history;
    session.messages.push(ConversationTurn::patient(request.message));
    session
        .messages
        .push(ConversationTurn::assistant(outcome.final_text.as_str()));

    let response = ChatResponse {
        response: outcome.final_text,
        session_id,
        timestamp: chrono::Utc::now().to_rfc3339(),
        parsed_content: record.into_value(),
        diagnostics: outcome.diagnostics,
    };
    Ok(Json(response).into_response())
}

async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<SessionResponse> {
    match state.sessions.get(&session_id).await {
        Some(session) => Ok(Json(SessionResponse {
            session_id: session.id,
            messages: session.messages,
            context: session.context,
            created_at: session.created_at.to_rfc3339(),
        })),
        None => Err(not_found_error("Session not found", &session_id)),
    }
}

async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Value> {
    if state.sessions.delete(&session_id).await {
        info!(session_id = %session_id, "Session deleted");
        Ok(Json(json!({ "session_id": session_id, "deleted": true })))
    } else {
        Err(not_found_error("Session not found", &session_id))
    }
}
