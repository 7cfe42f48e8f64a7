//! Configuration management for mediguide
//!
//! Values are layered env > TOML file > defaults. Credentials are held as
//! [`SecretString`] and handed to each client at construction.

pub mod file;

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use crate::voice::OutputFormat;
use crate::Result;

pub use file::{MediguideConfigFile, config_file_path, load_config_file};

/// Default OpenAI-compatible endpoint for chat and transcription
pub const DEFAULT_CHAT_URL: &str = "https://api.groq.com/openai/v1";

/// Default speech synthesis endpoint
pub const DEFAULT_TTS_URL: &str = "https://api.elevenlabs.io";

/// Default model when an image is attached
pub const DEFAULT_VISION_MODEL: &str = "llama-3.2-90b-vision-preview";

/// Default model for text-only queries
pub const DEFAULT_TEXT_MODEL: &str = "llama-3.3-70b-versatile";

/// Default transcription model
pub const DEFAULT_STT_MODEL: &str = "whisper-large-v3";

/// Default synthesis voice ("Rachel")
pub const DEFAULT_TTS_VOICE: &str = "21m00Tcm4TlvDq8ikWAM";

/// Default synthesis model
pub const DEFAULT_TTS_MODEL: &str = "eleven_turbo_v2";

/// Answers shorter than this are treated as failed synthesis
pub const DEFAULT_MIN_DURATION: Duration = Duration::from_millis(500);

/// Default HTTP port
pub const DEFAULT_PORT: u16 = 7860;

/// Default request body limit for uploads (25 MiB)
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

/// Instruction preamble placed before every patient query
pub const DEFAULT_SYSTEM_PROMPT: &str = "You have to act as a professional doctor. I know you are not, but this is for learning purposes. \
What's wrong, if anything, medically? \
If you make a differential diagnosis, suggest some remedies. Don't add any numbers or special characters in \
your response. Your response should be in one long paragraph. Always answer as if you are answering a real person. \
Don't respond as an AI model in markdown. Your answer should mimic that of an actual doctor, not an AI bot. \
Keep your answer concise (max 2 sentences). No preamble, start your answer right away, please.";

/// mediguide configuration
#[derive(Debug)]
pub struct Config {
    /// API keys
    pub api_keys: ApiKeys,

    /// Chat model selection
    pub models: ModelConfig,

    /// Transcription and synthesis configuration
    pub voice: VoiceConfig,

    /// HTTP server configuration
    pub api_server: ApiServerConfig,

    /// Remote service base URLs
    pub endpoints: Endpoints,

    /// Instruction preamble
    pub system_prompt: String,

    /// Per-request timeout for remote calls (reqwest default when `None`)
    pub request_timeout: Option<Duration>,
}

/// API keys for external services
#[derive(Debug, Default)]
pub struct ApiKeys {
    /// Groq API key (chat, vision and transcription)
    pub groq: Option<SecretString>,

    /// `ElevenLabs` API key (synthesis)
    pub elevenlabs: Option<SecretString>,
}

impl ApiKeys {
    /// Copy of the Groq key for a client
    #[must_use]
    pub fn groq(&self) -> Option<SecretString> {
        self.groq.as_ref().map(duplicate)
    }

    /// Copy of the `ElevenLabs` key for a client
    #[must_use]
    pub fn elevenlabs(&self) -> Option<SecretString> {
        self.elevenlabs.as_ref().map(duplicate)
    }
}

/// Chat model identifiers, picked by whether an image is attached
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelConfig {
    /// Model used when an image is attached
    pub vision: String,

    /// Model used for text-only queries
    pub text: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            vision: DEFAULT_VISION_MODEL.to_string(),
            text: DEFAULT_TEXT_MODEL.to_string(),
        }
    }
}

impl ModelConfig {
    /// Pick the model for a request
    #[must_use]
    pub fn select(&self, has_image: bool) -> &str {
        if has_image { &self.vision } else { &self.text }
    }
}

/// Voice processing configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// STT model
    pub stt_model: String,

    /// STT language hint
    pub stt_language: String,

    /// TTS model
    pub tts_model: String,

    /// TTS voice identifier
    pub tts_voice: String,

    /// TTS output format
    pub tts_format: OutputFormat,

    /// Fixed path of the synthesized answer, overwritten per request
    pub output_path: PathBuf,

    /// Minimum accepted answer duration
    pub min_duration: Duration,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        let tts_format = OutputFormat::default();
        Self {
            stt_model: DEFAULT_STT_MODEL.to_string(),
            stt_language: "en".to_string(),
            tts_model: DEFAULT_TTS_MODEL.to_string(),
            tts_voice: DEFAULT_TTS_VOICE.to_string(),
            output_path: default_output_path(tts_format),
            tts_format,
            min_duration: DEFAULT_MIN_DURATION,
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Port to listen on
    pub port: u16,

    /// Directory served instead of the embedded form
    pub static_dir: Option<PathBuf>,

    /// Request body limit for uploads, in bytes
    pub max_upload_bytes: usize,
}

/// Remote service base URLs
#[derive(Debug, Clone)]
pub struct Endpoints {
    /// OpenAI-compatible base URL for chat and transcription
    pub chat_url: String,

    /// `ElevenLabs`-compatible base URL for synthesis
    pub tts_url: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            chat_url: DEFAULT_CHAT_URL.to_string(),
            tts_url: DEFAULT_TTS_URL.to_string(),
        }
    }
}

/// Return the data directory for generated audio, creating it if needed
///
/// Uses `~/.local/share/mediguide/` on Linux
pub fn data_dir() -> PathBuf {
    let data_dir = directories::ProjectDirs::from("dev", "omni", "mediguide")
        .map_or_else(|| PathBuf::from(".mediguide"), |d| d.data_dir().to_path_buf());

    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        tracing::warn!(
            path = %data_dir.display(),
            error = %e,
            "failed to create data directory"
        );
    }

    data_dir
}

fn default_output_path(format: OutputFormat) -> PathBuf {
    data_dir().join(format!("final.{}", format.extension()))
}

fn duplicate(secret: &SecretString) -> SecretString {
    SecretString::from(secret.expose_secret().to_owned())
}

fn secret(value: Option<String>) -> Option<SecretString> {
    value
        .filter(|v| !v.trim().is_empty())
        .map(SecretString::from)
}

impl Config {
    /// Load configuration from the environment and the standard config file
    ///
    /// # Errors
    ///
    /// Returns error if a configured value is invalid (e.g. an unknown output format)
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let fc = load_config_file(config_path);
        Self::from_sources(fc, |key| std::env::var(key).ok())
    }

    /// Build configuration from a parsed config file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if a configured value is invalid
    pub fn from_sources(
        fc: MediguideConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        // API keys (env > toml > None)
        let api_keys = ApiKeys {
            groq: secret(env("GROQ_API_KEY").or(fc.api_keys.groq)),
            elevenlabs: secret(env("ELEVENLABS_API_KEY").or(fc.api_keys.elevenlabs)),
        };

        if api_keys.groq.is_none() {
            tracing::warn!("GROQ_API_KEY not set; chat and transcription will fail");
        }
        if api_keys.elevenlabs.is_none() {
            tracing::warn!("ELEVENLABS_API_KEY not set; answers will be text only");
        }

        let models = ModelConfig {
            vision: env("MEDIGUIDE_VISION_MODEL")
                .or(fc.models.vision)
                .unwrap_or_else(|| DEFAULT_VISION_MODEL.to_string()),
            text: env("MEDIGUIDE_TEXT_MODEL")
                .or(fc.models.text)
                .unwrap_or_else(|| DEFAULT_TEXT_MODEL.to_string()),
        };

        let tts_format: OutputFormat = env("MEDIGUIDE_TTS_FORMAT")
            .or(fc.voice.tts_format)
            .map_or_else(|| Ok(OutputFormat::default()), |s| s.parse())?;

        let output_path = env("MEDIGUIDE_OUTPUT_PATH")
            .map(PathBuf::from)
            .or(fc.voice.output_path)
            .unwrap_or_else(|| default_output_path(tts_format));

        let voice = VoiceConfig {
            stt_model: env("MEDIGUIDE_STT_MODEL")
                .or(fc.voice.stt_model)
                .unwrap_or_else(|| DEFAULT_STT_MODEL.to_string()),
            stt_language: fc.voice.stt_language.unwrap_or_else(|| "en".to_string()),
            tts_model: env("MEDIGUIDE_TTS_MODEL")
                .or(fc.voice.tts_model)
                .unwrap_or_else(|| DEFAULT_TTS_MODEL.to_string()),
            tts_voice: env("MEDIGUIDE_TTS_VOICE")
                .or(fc.voice.tts_voice)
                .unwrap_or_else(|| DEFAULT_TTS_VOICE.to_string()),
            tts_format,
            output_path,
            min_duration: fc
                .voice
                .min_duration_ms
                .map_or(DEFAULT_MIN_DURATION, Duration::from_millis),
        };

        // API server config (env > toml > default)
        let api_server = ApiServerConfig {
            port: env("MEDIGUIDE_PORT")
                .or_else(|| env("PORT"))
                .and_then(|s| s.parse().ok())
                .or(fc.server.port)
                .unwrap_or(DEFAULT_PORT),
            static_dir: env("MEDIGUIDE_STATIC_DIR")
                .map(PathBuf::from)
                .or(fc.server.static_dir),
            max_upload_bytes: env("MEDIGUIDE_MAX_UPLOAD_MB")
                .and_then(|s| s.parse().ok())
                .or(fc.server.max_upload_mb)
                .map_or(DEFAULT_MAX_UPLOAD_BYTES, |mb| mb.saturating_mul(1024 * 1024)),
        };

        let endpoints = Endpoints {
            chat_url: env("MEDIGUIDE_CHAT_URL")
                .or(fc.server.chat_url)
                .unwrap_or_else(|| DEFAULT_CHAT_URL.to_string()),
            tts_url: env("MEDIGUIDE_TTS_URL")
                .or(fc.server.tts_url)
                .unwrap_or_else(|| DEFAULT_TTS_URL.to_string()),
        };

        Ok(Self {
            api_keys,
            models,
            voice,
            api_server,
            endpoints,
            system_prompt: fc
                .prompt
                .system
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            request_timeout: fc.server.request_timeout_secs.map(Duration::from_secs),
        })
    }

    /// Build the HTTP client shared by the remote service clients
    ///
    /// # Errors
    ///
    /// Returns error if the TLS backend cannot be initialized
    pub fn http_client(&self) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = self.request_timeout {
            builder = builder.timeout(timeout);
        }
        Ok(builder.build()?)
    }
}
