//! Voice API endpoints for speech-to-text and text-to-speech

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use super::{ApiError, ApiState};

/// Build voice router
pub fn router(state: Arc<ApiState>) -> Router {
    let limit = state.upload_limit;
    Router::new()
        .route("/transcribe", post(transcribe))
        .route("/synthesize", post(synthesize))
        .route("/capabilities", get(capabilities))
        .layer(DefaultBodyLimit::max(limit))
        .with_state(state)
}

/// Voice capabilities response
#[derive(Debug, Serialize)]
pub struct VoiceCapabilities {
    pub stt_available: bool,
    pub tts_available: bool,
    /// MIME type of synthesized audio
    pub audio_format: &'static str,
}

/// Get voice capabilities
async fn capabilities(State(state): State<Arc<ApiState>>) -> Json<VoiceCapabilities> {
    Json(VoiceCapabilities {
        stt_available: state.stt_available,
        tts_available: state.tts_available,
        audio_format: state.audio_format.content_type(),
    })
}

/// Transcription response
#[derive(Debug, Serialize)]
pub struct TranscribeResponse {
    pub text: String,
}

/// Transcribe audio to text
///
/// Accepts the raw audio file as the request body; `Content-Type` picks the
/// container (`audio/webm`, `audio/mp4`, `audio/mpeg`, `audio/ogg`, otherwise WAV).
async fn transcribe(
    State(state): State<Arc<ApiState>>,
    headers: axum::http::HeaderMap,
    body: Bytes,
) -> Result<Json<TranscribeResponse>, ApiError> {
    if !state.stt_available {
        return Err(ApiError::NotConfigured("STT not configured (GROQ_API_KEY not set)"));
    }

    if body.is_empty() {
        return Err(ApiError::BadRequest("Empty audio data".to_string()));
    }

    let extension = match headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
    {
        Some(ct) if ct.starts_with("audio/webm") => "webm",
        Some(ct) if ct.starts_with("audio/mp4") => "mp4",
        Some(ct) if ct.starts_with("audio/mpeg") => "mp3",
        Some(ct) if ct.starts_with("audio/ogg") => "ogg",
        _ => "wav",
    };

    let scratch = tempfile::tempdir()?;
    let path = scratch.path().join(format!("recording.{extension}"));
    tokio::fs::write(&path, &body).await?;

    let text = state
        .doctor
        .transcriber()
        .transcribe_file(Some(&path))
        .await?;

    Ok(Json(TranscribeResponse { text }))
}

/// Synthesis request
#[derive(Debug, Deserialize)]
pub struct SynthesizeRequest {
    pub text: String,
}

/// Synthesize text to speech
///
/// Returns audio in the configured output format
async fn synthesize(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<SynthesizeRequest>,
) -> Result<Response, ApiError> {
    if !state.tts_available {
        return Err(ApiError::NotConfigured("TTS not configured (ELEVENLABS_API_KEY not set)"));
    }

    if request.text.is_empty() {
        return Err(ApiError::BadRequest("Empty text".to_string()));
    }

    let scratch = tempfile::tempdir()?;
    let dest = scratch
        .path()
        .join(format!("speech.{}", state.audio_format.extension()));

    let path = state
        .doctor
        .voice()
        .synthesize_to_file(&request.text, &dest)
        .await?;
    let audio = tokio::fs::read(path).await?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, state.audio_format.content_type())],
        audio,
    )
        .into_response())
}
