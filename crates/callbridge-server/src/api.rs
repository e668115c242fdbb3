//! Error type and the live-session inspection handlers.

use crate::registry::SessionSummary;
use crate::session::SessionSnapshot;
use crate::AppState;
use axum::{
    extract::{Extension, Json, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

/// API error type mapping to HTTP status codes.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid input: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("internal server error: {0}")]
    InternalServerError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::InternalServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(serde_json::json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionListResponse {
    pub sessions: Vec<SessionSummary>,
    pub count: usize,
}

/// Handler for `GET /api/sessions`.
pub async fn list_sessions_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Json<SessionListResponse> {
    let sessions = state.registry.list();
    Json(SessionListResponse {
        count: sessions.len(),
        sessions,
    })
}

/// Handler for `GET /api/sessions/{callId}`.
pub async fn get_session_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(call_id): Path<String>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let handle = state
        .registry
        .get(&call_id)
        .ok_or_else(|| ApiError::NotFound(format!("no live session for call {}", call_id)))?;
    // A session that closes between lookup and reply is gone as far as callers care.
    handle
        .snapshot()
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no live session for call {}", call_id)))
}
