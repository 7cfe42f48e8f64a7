//! Error types for mediguide

use thiserror::Error;

/// Result type alias for mediguide operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running a consultation
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio capture or decoding error
    #[error("audio error: {0}")]
    Audio(String),

    /// Audio playback error
    #[error("playback error: {0}")]
    Playback(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(#[from] TtsError),

    /// Vision/text model error
    #[error("vision error: {0}")]
    Vision(String),

    /// A vision-only model was asked to answer without an image
    #[error("model requires an image but none was provided")]
    ImageRequired,

    /// Image loading error
    #[error("image error: {0}")]
    Image(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Speech synthesis failures, one variant per diagnostic
#[derive(Debug, Error)]
pub enum TtsError {
    /// Nothing to synthesize
    #[error("no text to synthesize")]
    EmptyText,

    /// `ELEVENLABS_API_KEY` is not configured
    #[error("missing ELEVENLABS_API_KEY")]
    MissingApiKey,

    /// Requested output format is not allowed for this account or voice
    #[error("invalid output format: {0} (set the output format to one of the allowed values)")]
    InvalidOutputFormat(String),

    /// The account has no free custom voice slots
    #[error("custom voice limit reached; use a built-in voice id or free a slot")]
    VoiceLimitReached,

    /// Credential rejected
    #[error("unauthorized; check ELEVENLABS_API_KEY")]
    Unauthorized,

    /// Any other API failure
    #[error("API error {status}: {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Message reported by the service
        message: String,
    },

    /// Generated audio is too short to be a real answer
    #[error("generated audio is {duration_ms} ms, below the {min_ms} ms minimum")]
    TooShort {
        /// Measured duration
        duration_ms: u128,
        /// Required minimum
        min_ms: u128,
    },

    /// Generated audio could not be decoded for validation
    #[error("generated audio failed validation: {0}")]
    Validation(String),
}
