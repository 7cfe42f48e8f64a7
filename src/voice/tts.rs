//! Text-to-speech (TTS) processing

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};

use super::format::{OutputFormat, measure_duration};
use crate::config::VoiceConfig;
use crate::consultation::Synthesize;
use crate::error::TtsError;
use crate::Result;

/// Synthesizes speech from text through `ElevenLabs`
pub struct TextToSpeech {
    client: reqwest::Client,
    api_key: Option<SecretString>,
    base_url: String,
    voice_id: String,
    model: String,
    format: OutputFormat,
    min_duration: Duration,
}

impl TextToSpeech {
    /// Create a new TTS instance
    ///
    /// A missing key is accepted here; every synthesis then fails fast with
    /// [`TtsError::MissingApiKey`].
    #[must_use]
    pub fn new(
        api_key: Option<SecretString>,
        base_url: impl Into<String>,
        voice: &VoiceConfig,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            voice_id: voice.tts_voice.clone(),
            model: voice.tts_model.clone(),
            format: voice.tts_format,
            min_duration: voice.min_duration,
        }
    }

    /// Use a preconfigured HTTP client
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Whether a credential is configured
    #[must_use]
    pub const fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    /// Output format of synthesized audio
    #[must_use]
    pub const fn format(&self) -> OutputFormat {
        self.format
    }

    /// Synthesize text to speech
    ///
    /// # Returns
    ///
    /// Encoded audio bytes in the configured output format
    ///
    /// # Errors
    ///
    /// Returns error if the text is empty, no key is configured, or the API fails
    pub async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        if text.is_empty() {
            return Err(TtsError::EmptyText.into());
        }

        let Some(api_key) = self.api_key.as_ref() else {
            tracing::warn!("ELEVENLABS_API_KEY not set, skipping synthesis");
            return Err(TtsError::MissingApiKey.into());
        };

        #[derive(serde::Serialize)]
        struct SynthesisRequest<'a> {
            text: &'a str,
            model_id: &'a str,
        }

        let url = format!("{}/v1/text-to-speech/{}", self.base_url, self.voice_id);
        let output_format = self.format.to_string();

        let request = SynthesisRequest {
            text,
            model_id: &self.model,
        };

        tracing::debug!(
            voice = %self.voice_id,
            model = %self.model,
            format = %output_format,
            chars = text.len(),
            "requesting synthesis"
        );

        let response = self
            .client
            .post(&url)
            .query(&[("output_format", output_format.as_str())])
            .header("xi-api-key", api_key.expose_secret())
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let error = classify_error(status, &body);
            tracing::error!(status = %status, error = %error, "synthesis API error");
            return Err(error.into());
        }

        let audio = response.bytes().await?;
        Ok(audio.to_vec())
    }

    /// Synthesize `text`, save it to `dest`, and validate the saved file
    ///
    /// The audio is staged beside `dest` and only moved into place once it
    /// passes validation, so a rejected clip leaves the previous answer intact.
    ///
    /// # Errors
    ///
    /// Returns error if synthesis fails, the file cannot be written, or the
    /// saved audio is undecodable or shorter than the configured minimum
    pub async fn synthesize_to_file(&self, text: &str, dest: &Path) -> Result<PathBuf> {
        let audio = self.synthesize(text).await?;

        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let staging = staging_path(dest);
        tokio::fs::write(&staging, &audio).await?;

        let duration = match validate_file(&staging, self.format, self.min_duration).await {
            Ok(duration) => duration,
            Err(e) => {
                if let Err(remove) = tokio::fs::remove_file(&staging).await {
                    tracing::debug!(path = %staging.display(), error = %remove, "could not remove rejected clip");
                }
                return Err(e);
            }
        };

        tokio::fs::rename(&staging, dest).await?;
        tracing::info!(
            path = %dest.display(),
            duration_ms = duration.as_millis(),
            "synthesized answer saved"
        );

        Ok(dest.to_path_buf())
    }
}

/// Hidden sibling of `dest` that holds audio until it is validated
fn staging_path(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map_or_else(|| "answer".into(), |n| n.to_string_lossy());
    dest.with_file_name(format!(".{name}.partial"))
}

#[async_trait]
impl Synthesize for TextToSpeech {
    async fn synthesize_to_file(&self, text: &str, dest: &Path) -> Result<PathBuf> {
        Self::synthesize_to_file(self, text, dest).await
    }
}

/// Reload a saved audio file and check it is long enough to be real speech
///
/// # Errors
///
/// Returns [`TtsError::Validation`] if the file cannot be read or decoded and
/// [`TtsError::TooShort`] if it plays for less than `min_duration`
pub async fn validate_file(
    path: &Path,
    format: OutputFormat,
    min_duration: Duration,
) -> Result<Duration> {
    let audio = tokio::fs::read(path)
        .await
        .map_err(|e| TtsError::Validation(e.to_string()))?;

    let duration =
        measure_duration(&audio, format).map_err(|e| TtsError::Validation(e.to_string()))?;

    if duration < min_duration {
        return Err(TtsError::TooShort {
            duration_ms: duration.as_millis(),
            min_ms: min_duration.as_millis(),
        }
        .into());
    }

    Ok(duration)
}

/// Map an error response to a diagnostic
///
/// Bodies look like `{"detail": {"status": "voice_limit_reached", "message": "..."}}`.
fn classify_error(status: StatusCode, body: &str) -> TtsError {
    let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();
    let detail = parsed.as_ref().and_then(|v| v.get("detail"));

    let detail_status = detail
        .and_then(|d| d.get("status"))
        .and_then(serde_json::Value::as_str);

    let message = detail
        .and_then(|d| d.get("message").and_then(serde_json::Value::as_str).or_else(|| d.as_str()))
        .map_or_else(|| body.to_string(), ToString::to_string);

    match detail_status {
        Some("invalid_output_format") => TtsError::InvalidOutputFormat(message),
        Some("voice_limit_reached") => TtsError::VoiceLimitReached,
        Some("unauthorized" | "invalid_api_key") => TtsError::Unauthorized,
        _ if status == StatusCode::UNAUTHORIZED => TtsError::Unauthorized,
        _ => TtsError::Api {
            status: status.as_u16(),
            message,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staging_path_is_hidden_sibling() {
        assert_eq!(
            staging_path(Path::new("/data/final.mp3")),
            Path::new("/data/.final.mp3.partial")
        );
    }

    #[test]
    fn test_classifies_invalid_output_format() {
        let body = r#"{"detail":{"status":"invalid_output_format","message":"pcm_44100 requires Pro tier"}}"#;
        let error = classify_error(StatusCode::FORBIDDEN, body);
        assert!(matches!(error, TtsError::InvalidOutputFormat(ref m) if m.contains("Pro tier")));
    }

    #[test]
    fn test_classifies_voice_limit() {
        let body = r#"{"detail":{"status":"voice_limit_reached","message":"too many voices"}}"#;
        assert!(matches!(
            classify_error(StatusCode::BAD_REQUEST, body),
            TtsError::VoiceLimitReached
        ));
    }

    #[test]
    fn test_classifies_unauthorized() {
        let body = r#"{"detail":{"status":"unauthorized","message":"bad key"}}"#;
        assert!(matches!(
            classify_error(StatusCode::FORBIDDEN, body),
            TtsError::Unauthorized
        ));
        assert!(matches!(
            classify_error(StatusCode::UNAUTHORIZED, ""),
            TtsError::Unauthorized
        ));
    }

    #[test]
    fn test_unknown_errors_keep_message() {
        let body = r#"{"detail":{"status":"quota_exceeded","message":"out of credits"}}"#;
        match classify_error(StatusCode::TOO_MANY_REQUESTS, body) {
            TtsError::Api { status, message } => {
                assert_eq!(status, 429);
                assert_eq!(message, "out of credits");
            }
            other => panic!("unexpected: {other:?}"),
        }

        match classify_error(StatusCode::BAD_GATEWAY, "upstream down") {
            TtsError::Api { message, .. } => assert_eq!(message, "upstream down"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_diagnostics_are_distinct() {
        let messages = [
            TtsError::InvalidOutputFormat("x".to_string()).to_string(),
            TtsError::VoiceLimitReached.to_string(),
            TtsError::Unauthorized.to_string(),
            TtsError::Api {
                status: 500,
                message: "x".to_string(),
            }
            .to_string(),
        ];
        for (i, a) in messages.iter().enumerate() {
            for b in &messages[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
