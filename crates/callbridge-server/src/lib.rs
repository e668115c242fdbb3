//! Call bridge server library logic.
//!
//! Answers inbound calls for configured businesses, accepts the provider's
//! media stream and runs one [`session::CallSession`] per live call between
//! that stream and a streaming voice model.

pub mod api;
pub mod api_media;
pub mod api_voice;
pub mod call_control;
pub mod config;
pub mod interruption;
pub mod outbound;
pub mod registry;
pub mod session;

use axum::{
    routing::{get, post},
    Extension, Json, Router,
};
use call_control::CallControl;
use callbridge_db::DbPool;
use callbridge_tools::ToolBackend;
use callbridge_voice::{AudioFormat, VoiceModelAdapter};
use registry::SessionRegistry;
use serde_json::{json, Value};
use session::SessionSettings;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across all request handlers and sessions.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: DbPool,
    /// Live call sessions.
    pub registry: SessionRegistry,
    /// Opens voice model connections.
    pub model: Arc<dyn VoiceModelAdapter>,
    /// Audio format the model consumes and produces.
    pub model_audio: AudioFormat,
    /// Business tool backend.
    pub tools: Arc<dyn ToolBackend>,
    /// Out-of-band control of live calls.
    pub call_control: Arc<dyn CallControl>,
    pub settings: SessionSettings,
    /// The public URL of the server, used to build media stream URLs.
    pub public_url: String,
}

/// Health check handler.
async fn health(Extension(state): Extension<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "activeSessions": state.registry.len()
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/api/sessions", get(api::list_sessions_handler))
        .route("/api/sessions/{callId}", get(api::get_session_handler))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    Router::new()
        .route("/health", get(health))
        .route("/voice/incoming", post(api_voice::incoming_call_handler))
        .route("/voice/status", post(api_voice::call_status_handler))
        .route("/media/{businessId}", get(api_media::media_stream_handler))
        .merge(api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(Extension(Arc::new(state)))
}
