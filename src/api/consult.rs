//! Consultation endpoints behind the form

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::Ordering;

use axum::extract::multipart::Field;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;

use super::{ApiError, ApiState};
use crate::consultation::PatientInput;

/// Build consultation router
pub fn router(state: Arc<ApiState>) -> Router {
    let limit = state.upload_limit;
    Router::new()
        .route("/", post(consult))
        .route("/audio", get(answer_audio))
        .layer(DefaultBodyLimit::max(limit))
        .with_state(state)
}

/// The three outputs of a consultation
#[derive(Debug, Serialize)]
pub struct ConsultResponse {
    pub patient_query: String,
    pub doctor_response: String,
    /// Where to fetch the spoken answer, `None` when there is none
    pub audio_url: Option<String>,
}

/// Run a consultation from the submitted form
///
/// Accepts multipart fields `text`, `audio` (file), and `image` (file); any may
/// be absent or empty.
async fn consult(
    State(state): State<Arc<ApiState>>,
    mut multipart: Multipart,
) -> Result<Json<ConsultResponse>, ApiError> {
    let uploads = tempfile::tempdir()?;
    let mut input = PatientInput::default();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "text" => {
                let text = field.text().await?;
                input.text = Some(text).filter(|t| !t.is_empty());
            }
            "audio" => input.audio_path = save_upload(field, uploads.path(), "audio").await?,
            "image" => input.image_path = save_upload(field, uploads.path(), "image").await?,
            other => tracing::debug!(field = other, "ignoring unknown form field"),
        }
    }

    let consultation = state.doctor.consult(&input).await;

    let audio_url = consultation.audio_path.as_ref().map(|_| {
        let version = state.audio_version.fetch_add(1, Ordering::SeqCst) + 1;
        format!("/api/consult/audio?v={version}")
    });

    Ok(Json(ConsultResponse {
        patient_query: consultation.patient_query,
        doctor_response: consultation.doctor_response,
        audio_url,
    }))
}

/// Write an uploaded file into `dir`; empty uploads count as absent
async fn save_upload(
    field: Field<'_>,
    dir: &Path,
    kind: &str,
) -> Result<Option<PathBuf>, ApiError> {
    let file_name = field
        .file_name()
        .and_then(|n| Path::new(n).file_name())
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .map_or_else(|| kind.to_string(), ToString::to_string);

    let data = field.bytes().await?;

    if data.is_empty() {
        return Ok(None);
    }

    let path = dir.join(format!("{kind}-{file_name}"));
    tokio::fs::write(&path, &data).await?;
    tracing::debug!(kind, bytes = data.len(), path = %path.display(), "upload saved");

    Ok(Some(path))
}

/// Serve the latest spoken answer
async fn answer_audio(State(state): State<Arc<ApiState>>) -> Result<Response, ApiError> {
    if state.audio_version.load(Ordering::SeqCst) == 0 {
        return Err(ApiError::NotFound("no spoken answer yet"));
    }

    let audio = state
        .doctor
        .read_answer_audio()
        .await?
        .ok_or(ApiError::NotFound("no spoken answer yet"))?;

    Ok((
        [
            (header::CONTENT_TYPE, state.audio_format.content_type()),
            (header::CACHE_CONTROL, "no-store"),
        ],
        audio,
    )
        .into_response())
}
