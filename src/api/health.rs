//! Health check endpoints

use std::sync::Arc;

use axum::{Json, Router, extract::State, http::StatusCode, routing::get};
use serde::Serialize;

use super::ApiState;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Detailed readiness response
#[derive(Serialize)]
pub struct ReadinessResponse {
    pub status: &'static str,
    pub checks: ReadinessChecks,
}

/// Individual readiness checks
#[derive(Serialize)]
pub struct ReadinessChecks {
    /// Transcription and chat models
    pub groq: CheckResult,
    /// Speech synthesis
    pub elevenlabs: CheckResult,
}

/// Result of a single health check
#[derive(Serialize)]
pub struct CheckResult {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CheckResult {
    const fn ok() -> Self {
        Self {
            status: "ok",
            message: None,
        }
    }

    fn unavailable(key: &str) -> Self {
        Self {
            status: "unavailable",
            message: Some(format!("{key} not set")),
        }
    }

    fn credential(configured: bool, key: &str) -> Self {
        if configured {
            Self::ok()
        } else {
            Self::unavailable(key)
        }
    }
}

/// Liveness check - is the service running?
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Readiness check - can consultations reach the models?
///
/// Synthesis is optional: without it answers are text-only, so a missing
/// `ElevenLabs` key degrades but does not fail readiness.
async fn ready(State(state): State<Arc<ApiState>>) -> (StatusCode, Json<ReadinessResponse>) {
    let groq = CheckResult::credential(state.stt_available, "GROQ_API_KEY");
    let elevenlabs = CheckResult::credential(state.tts_available, "ELEVENLABS_API_KEY");

    let (status, http_status) = match (groq.status, elevenlabs.status) {
        ("ok", "ok") => ("ok", StatusCode::OK),
        ("ok", _) => ("degraded", StatusCode::OK),
        _ => ("unavailable", StatusCode::SERVICE_UNAVAILABLE),
    };

    (
        http_status,
        Json(ReadinessResponse {
            status,
            checks: ReadinessChecks { groq, elevenlabs },
        }),
    )
}

/// Build health router (liveness only, no state needed)
pub fn router() -> Router {
    Router::new().route("/health", get(health))
}

/// Build readiness router
pub fn ready_router(state: Arc<ApiState>) -> Router {
    Router::new().route("/ready", get(ready)).with_state(state)
}
