//! Speech-to-text (STT) processing

use std::path::Path;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use secrecy::{ExposeSecret, SecretString};

use crate::consultation::Transcribe;
use crate::{Error, Result};

/// Response from the Whisper-compatible transcription API
#[derive(serde::Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// Transcribes speech to text
pub struct SpeechToText {
    client: reqwest::Client,
    api_key: Option<SecretString>,
    base_url: String,
    model: String,
    language: String,
}

impl SpeechToText {
    /// Create a new STT instance against an OpenAI-compatible endpoint
    #[must_use]
    pub fn new(
        api_key: Option<SecretString>,
        base_url: impl Into<String>,
        model: String,
        language: String,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model,
            language,
        }
    }

    /// Use a preconfigured HTTP client
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Transcribe an audio file
    ///
    /// A missing or empty path yields an empty transcript without a remote call.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or transcription fails
    pub async fn transcribe_file(&self, path: Option<&Path>) -> Result<String> {
        let Some(path) = path.filter(|p| !p.as_os_str().is_empty()) else {
            return Ok(String::new());
        };

        let audio = tokio::fs::read(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::Stt(format!("audio file not found at {}", path.display()))
            } else {
                Error::Io(e)
            }
        })?;

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("audio.wav")
            .to_string();

        self.transcribe(audio, &file_name).await
    }

    /// Transcribe audio bytes
    ///
    /// # Arguments
    ///
    /// * `audio` - Encoded audio (wav, mp3, webm, ...)
    /// * `file_name` - Name sent with the upload; its extension selects the MIME type
    ///
    /// # Errors
    ///
    /// Returns error if transcription fails
    pub async fn transcribe(&self, audio: Vec<u8>, file_name: &str) -> Result<String> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| Error::Config("GROQ_API_KEY not set".to_string()))?;

        tracing::debug!(audio_bytes = audio.len(), file_name, "starting transcription");

        let part = Part::bytes(audio)
            .file_name(file_name.to_string())
            .mime_str(mime_for_file(file_name))
            .map_err(|e| Error::Stt(e.to_string()))?;

        let form = Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("language", self.language.clone());

        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(api_key.expose_secret())
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "transcription request failed");
                e
            })?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "transcription API error");
            return Err(Error::Stt(format!("transcription API error {status}: {body}")));
        }

        let result: TranscriptionResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse response");
            e
        })?;

        tracing::info!(transcript = %result.text, "transcription complete");
        Ok(result.text)
    }
}

#[async_trait]
impl Transcribe for SpeechToText {
    async fn transcribe_file(&self, path: Option<&Path>) -> Result<String> {
        Self::transcribe_file(self, path).await
    }
}

/// MIME type for an uploaded audio file name
fn mime_for_file(file_name: &str) -> &'static str {
    let extension = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("mp3" | "mpeg" | "mpga") => "audio/mpeg",
        Some("m4a" | "mp4") => "audio/mp4",
        Some("webm") => "audio/webm",
        Some("ogg" | "oga") => "audio/ogg",
        Some("flac") => "audio/flac",
        _ => "audio/wav",
    }
}
