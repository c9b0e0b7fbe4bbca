//! Chat turn endpoints and reply audio retrieval

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Path, State},
    http::header,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use uuid::Uuid;

use super::{ApiError, ApiState};
use crate::orchestrator::TurnResult;

/// Base64 voice clips outgrow axum's 2 MiB default well under a minute of WAV
pub const MAX_AUDIO_BODY: usize = 25 * 1024 * 1024;

/// Build chat router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/chat", post(chat))
        .route(
            "/api/chat/audio",
            post(chat_audio).layer(DefaultBodyLimit::max(MAX_AUDIO_BODY)),
        )
        .route("/api/audio/{id}", get(fetch_audio))
        .with_state(state)
}

/// Typed message from the UI
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub text: String,
}

/// Recorded message from the UI
#[derive(Debug, Deserialize)]
pub struct AudioChatRequest {
    /// Base64 audio, optionally as a `data:` URL
    pub audio: String,
    #[serde(default)]
    pub mime_type: Option<String>,
}

/// Run a text turn; failures are reported inside the result
async fn chat(State(state): State<Arc<ApiState>>, Json(request): Json<ChatRequest>) -> Json<TurnResult> {
    Json(state.orchestrator.handle_text_turn(&request.text).await)
}

/// Run a voice turn; failures are reported inside the result
async fn chat_audio(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<AudioChatRequest>,
) -> Json<TurnResult> {
    Json(
        state
            .orchestrator
            .handle_base64_audio_turn(&request.audio, request.mime_type.as_deref())
            .await,
    )
}

/// Serve a synthesized reply clip while it is still cached
async fn fetch_audio(State(state): State<Arc<ApiState>>, Path(id): Path<Uuid>) -> Result<Response, ApiError> {
    let clip = state
        .audio
        .get(&id)
        .ok_or_else(|| ApiError::not_found(format!("audio {id} not found or expired")))?;

    Ok((
        [
            (header::CONTENT_TYPE, clip.mime_type),
            (header::CACHE_CONTROL, "no-store"),
        ],
        clip.bytes,
    )
        .into_response())
}
