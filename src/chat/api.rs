use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event, Sse},
    },
    routing::{delete, get, post},
};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use super::models::StreamFrame;
use super::orchestrator::{TurnOrchestrator, TurnStream};
use crate::errors::{ChatError, StoreError};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub orchestrator: TurnOrchestrator,
}

pub type SharedState = Arc<AppState>;

pub const DEFAULT_SESSION_ID: &str = "default";

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, rename = "sessionId")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub streaming: bool,
}

#[derive(Deserialize)]
pub struct CreateSessionRequest {
    #[serde(default, rename = "sessionId")]
    pub session_id: Option<String>,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(json!({"error": message}))).into_response()
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::Validation(msg) => ApiError::BadRequest(msg),
            other => {
                error!(error = %other, "Chat turn failed");
                ApiError::Internal(other.to_string())
            }
        }
    }
}

/// Malformed or non-JSON bodies are validation failures like any other.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        error!(error = %err, "Session store request failed");
        ApiError::Internal(err.to_string())
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/chat", post(chat))
        .route("/api/history/{session_id}", get(get_history))
        .route("/api/sessions", get(list_sessions).post(create_session))
        .route("/api/sessions/{session_id}", delete(delete_session))
}

// ── SSE framing ───────────────────────────────────────────────────────

/// One SSE event per frame: `data: <frame json>`. No ids, retry or comments.
fn frame_event(frame: &StreamFrame) -> Result<Event, axum::Error> {
    Event::default().json_data(frame)
}

fn sse_events(turns: TurnStream) -> impl Stream<Item = Result<Event, axum::Error>> {
    turns.map(|frame| frame_event(&frame))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> impl IntoResponse {
    Json(json!({"status": "OK"}))
}

async fn chat(
    State(state): State<SharedState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = payload?;
    let message = req.message.unwrap_or_default();
    let session_id = req
        .session_id
        .unwrap_or_else(|| DEFAULT_SESSION_ID.to_string());

    if req.streaming {
        let turns = state.orchestrator.reply_streaming(&session_id, &message).await?;
        Ok(Sse::new(sse_events(turns)).into_response())
    } else {
        let answer = state.orchestrator.reply(&session_id, &message).await?;
        Ok(Json(json!({"message": answer})).into_response())
    }
}

async fn get_history(
    State(state): State<SharedState>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let history = state.orchestrator.store().history(&session_id).await?;
    Ok(Json(json!({"history": history})))
}

async fn list_sessions(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let sessions = state.orchestrator.store().list_sessions().await?;
    Ok(Json(json!({"sessions": sessions})))
}

async fn create_session(
    State(state): State<SharedState>,
    payload: Result<Json<CreateSessionRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let session_id = req
        .session_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Session ID is required".into()))?;
    state.orchestrator.store().create_session(&session_id).await?;
    Ok(Json(json!({"success": true})))
}

async fn delete_session(
    State(state): State<SharedState>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.orchestrator.store().delete_session(&session_id).await?;
    Ok(Json(json!({"success": true})))
}
