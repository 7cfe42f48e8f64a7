//! TOML configuration file loading
//!
//! Supports `~/.config/mediguide/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct MediguideConfigFile {
    /// Model identifiers
    #[serde(default)]
    pub models: ModelsFileConfig,

    /// Transcription and synthesis settings
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,

    /// Server and endpoint settings
    #[serde(default)]
    pub server: ServerFileConfig,

    /// Instruction preamble
    #[serde(default)]
    pub prompt: PromptFileConfig,
}

/// Chat model selection
#[derive(Debug, Default, Deserialize)]
pub struct ModelsFileConfig {
    /// Model used when an image is attached
    pub vision: Option<String>,

    /// Model used for text-only queries
    pub text: Option<String>,
}

/// Voice processing configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// STT model (e.g. "whisper-large-v3")
    pub stt_model: Option<String>,

    /// STT language hint (ISO 639-1)
    pub stt_language: Option<String>,

    /// TTS model (e.g. "`eleven_turbo_v2`")
    pub tts_model: Option<String>,

    /// TTS voice identifier
    pub tts_voice: Option<String>,

    /// TTS output format (e.g. "`mp3_44100_128`")
    pub tts_format: Option<String>,

    /// Where the synthesized answer is written
    pub output_path: Option<PathBuf>,

    /// Minimum accepted answer length in milliseconds
    pub min_duration_ms: Option<u64>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    /// Groq key for chat, vision and transcription
    pub groq: Option<String>,

    /// `ElevenLabs` key for synthesis
    pub elevenlabs: Option<String>,
}

/// Server/runtime configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    /// HTTP server port
    pub port: Option<u16>,

    /// Directory to serve instead of the embedded form
    pub static_dir: Option<PathBuf>,

    /// OpenAI-compatible chat and transcription base URL
    pub chat_url: Option<String>,

    /// Speech synthesis base URL
    pub tts_url: Option<String>,

    /// Per-request timeout for remote calls
    pub request_timeout_secs: Option<u64>,

    /// Largest accepted consultation or transcription upload, in megabytes
    pub max_upload_mb: Option<usize>,
}

/// Prompt configuration
#[derive(Debug, Default, Deserialize)]
pub struct PromptFileConfig {
    /// Replaces the built-in doctor preamble
    pub system: Option<String>,
}

/// Load the TOML config file from `path`, or the standard path when `None`
///
/// Returns `MediguideConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file(path: Option<&Path>) -> MediguideConfigFile {
    let Some(path) = path.map(Path::to_path_buf).or_else(config_file_path) else {
        return MediguideConfigFile::default();
    };

    if !path.exists() {
        return MediguideConfigFile::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match parse_config(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                MediguideConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            MediguideConfigFile::default()
        }
    }
}

/// Parse config file contents
///
/// # Errors
///
/// Returns error if the TOML is malformed
pub fn parse_config(content: &str) -> crate::Result<MediguideConfigFile> {
    Ok(toml::from_str(content)?)
}

/// Return the config file path: `~/.config/mediguide/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("mediguide").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_parses() {
        let config = parse_config(
            r#"
            [models]
            text = "llama-3.1-8b-instant"

            [voice]
            tts_format = "pcm_16000"

            [server]
            max_upload_mb = 50
            "#,
        )
        .unwrap();

        assert_eq!(config.models.text.as_deref(), Some("llama-3.1-8b-instant"));
        assert!(config.models.vision.is_none());
        assert_eq!(config.voice.tts_format.as_deref(), Some("pcm_16000"));
        assert!(config.api_keys.groq.is_none());
        assert_eq!(config.server.max_upload_mb, Some(50));
    }

    #[test]
    fn test_malformed_file_is_error() {
        assert!(parse_config("[models\ntext = 1").is_err());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = load_config_file(Some(Path::new("/nonexistent/mediguide.toml")));
        assert!(config.server.port.is_none());
    }
}
