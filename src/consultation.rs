//! Consultation pipeline
//!
//! Runs one patient request end to end:
//!
//! ```text
//! text | audio ──► query ──► preamble + query ──► chat model ──► synthesis
//!                                   ▲
//!                       image ──────┘ (selects the vision model)
//! ```
//!
//! Every step degrades instead of failing: a missing transcript becomes an
//! empty query, a failed model call becomes an apology, and a failed synthesis
//! leaves the answer text-only.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::brain::ChatClient;
use crate::config::{Config, ModelConfig};
use crate::image::{EncodedImage, encode_image};
use crate::voice::{SpeechToText, TextToSpeech};
use crate::{Error, Result};

/// Reply used when a vision-only model is called without an image
pub const IMAGE_MISSING_REPLY: &str =
    "I cannot analyze the image because it couldn't be loaded or is missing.";

/// Reply used when the chat model call fails
pub const ANALYSIS_FAILED_REPLY: &str =
    "I'm sorry, I encountered an error while trying to analyze the input.";

/// Appended to the answer when no audio could be produced
pub const AUDIO_FAILED_SUFFIX: &str = " (Error: Could not generate audio response.)";

/// Turns a recorded audio file into text
#[async_trait]
pub trait Transcribe: Send + Sync {
    /// Transcribe the file at `path`; `None` yields an empty transcript
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or the service fails
    async fn transcribe_file(&self, path: Option<&Path>) -> Result<String>;
}

/// Answers a query, optionally looking at an image
#[async_trait]
pub trait Analyze: Send + Sync {
    /// Ask `model` about `query`
    ///
    /// # Errors
    ///
    /// Returns error if the model cannot be reached or gives no answer
    async fn analyze(
        &self,
        query: &str,
        image: Option<&EncodedImage>,
        model: &str,
    ) -> Result<String>;
}

/// Speaks text into an audio file
#[async_trait]
pub trait Synthesize: Send + Sync {
    /// Synthesize `text` into `dest` and return the written path
    ///
    /// # Errors
    ///
    /// Returns error if synthesis fails or the result does not validate
    async fn synthesize_to_file(&self, text: &str, dest: &Path) -> Result<PathBuf>;
}

/// One patient submission
#[derive(Debug, Clone, Default)]
pub struct PatientInput {
    /// Typed symptoms
    pub text: Option<String>,
    /// Recorded voice
    pub audio_path: Option<PathBuf>,
    /// Photo to look at
    pub image_path: Option<PathBuf>,
}

impl PatientInput {
    /// Text-only input
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }
}

/// The three outputs shown to the patient
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Consultation {
    /// Typed or transcribed query
    pub patient_query: String,
    /// Doctor's answer (or a placeholder)
    pub doctor_response: String,
    /// Spoken answer, when synthesis succeeded
    pub audio_path: Option<PathBuf>,
}

/// The consultation pipeline over its three remote services
pub struct Doctor {
    transcriber: Arc<dyn Transcribe>,
    brain: Arc<dyn Analyze>,
    voice: Arc<dyn Synthesize>,
    models: ModelConfig,
    system_prompt: String,
    output_path: PathBuf,
    output_lock: Mutex<()>,
}

impl Doctor {
    /// Create a pipeline from its services
    #[must_use]
    pub fn new(
        transcriber: Arc<dyn Transcribe>,
        brain: Arc<dyn Analyze>,
        voice: Arc<dyn Synthesize>,
        models: ModelConfig,
        system_prompt: String,
        output_path: PathBuf,
    ) -> Self {
        Self {
            transcriber,
            brain,
            voice,
            models,
            system_prompt,
            output_path,
            output_lock: Mutex::new(()),
        }
    }

    /// Wire the pipeline to the configured remote services
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn from_config(config: &Config) -> Result<Self> {
        let http = config.http_client()?;

        let transcriber = SpeechToText::new(
            config.api_keys.groq(),
            &config.endpoints.chat_url,
            config.voice.stt_model.clone(),
            config.voice.stt_language.clone(),
        )
        .with_http_client(http.clone());

        let brain = ChatClient::new(config.api_keys.groq(), &config.endpoints.chat_url)
            .with_http_client(http.clone());

        let voice = TextToSpeech::new(
            config.api_keys.elevenlabs(),
            &config.endpoints.tts_url,
            &config.voice,
        )
        .with_http_client(http);

        Ok(Self::new(
            Arc::new(transcriber),
            Arc::new(brain),
            Arc::new(voice),
            config.models.clone(),
            config.system_prompt.clone(),
            config.voice.output_path.clone(),
        ))
    }

    /// Transcription service
    #[must_use]
    pub fn transcriber(&self) -> &Arc<dyn Transcribe> {
        &self.transcriber
    }

    /// Synthesis service
    #[must_use]
    pub fn voice(&self) -> &Arc<dyn Synthesize> {
        &self.voice
    }

    /// Fixed path the spoken answer is written to
    #[must_use]
    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Read the last spoken answer, if one has been written
    ///
    /// Waits for any synthesis in progress so a half-written file is never
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read
    pub async fn read_answer_audio(&self) -> Result<Option<Vec<u8>>> {
        let _guard = self.output_lock.lock().await;
        match tokio::fs::read(&self.output_path).await {
            Ok(audio) => Ok(Some(audio)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Derive the patient query: typed text wins, then the transcript, else empty
    pub async fn derive_query(&self, input: &PatientInput) -> String {
        if let Some(text) = input.text.as_deref().filter(|t| !t.is_empty()) {
            return text.to_string();
        }

        let Some(audio) = input.audio_path.as_deref() else {
            return String::new();
        };

        match self.transcriber.transcribe_file(Some(audio)).await {
            Ok(transcript) => transcript,
            Err(e) => {
                tracing::error!(error = %e, "transcription failed, using empty query");
                String::new()
            }
        }
    }

    /// Prefix the instruction preamble
    #[must_use]
    pub fn combine_query(&self, patient_query: &str) -> String {
        format!("{} {patient_query}", self.system_prompt)
    }

    /// Run a full consultation
    pub async fn consult(&self, input: &PatientInput) -> Consultation {
        let patient_query = self.derive_query(input).await;
        let combined = self.combine_query(&patient_query);

        let image = encode_image(input.image_path.as_deref()).await;
        let model = self.models.select(image.is_some());
        tracing::info!(
            model,
            has_image = image.is_some(),
            query_chars = patient_query.len(),
            "consulting"
        );

        let mut doctor_response = match self.brain.analyze(&combined, image.as_ref(), model).await
        {
            Ok(answer) => answer,
            Err(Error::ImageRequired) => {
                tracing::warn!(model, "vision model called without an image");
                IMAGE_MISSING_REPLY.to_string()
            }
            Err(e) => {
                tracing::error!(model, error = %e, "chat model call failed");
                ANALYSIS_FAILED_REPLY.to_string()
            }
        };

        if doctor_response.is_empty() {
            return Consultation {
                patient_query,
                doctor_response,
                audio_path: None,
            };
        }

        let audio_path = {
            let _guard = self.output_lock.lock().await;
            match self
                .voice
                .synthesize_to_file(&doctor_response, &self.output_path)
                .await
            {
                Ok(path) => Some(path),
                Err(e) => {
                    tracing::warn!(error = %e, "speech synthesis failed");
                    None
                }
            }
        };

        if audio_path.is_none() {
            doctor_response.push_str(AUDIO_FAILED_SUFFIX);
        }

        Consultation {
            patient_query,
            doctor_response,
            audio_path,
        }
    }
}
