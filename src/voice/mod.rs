//! Voice processing module
//!
//! Handles microphone recording, transcription, synthesis, and playback of
//! the spoken answer.

mod capture;
mod format;
mod phrase;
mod playback;
pub mod stt;
pub mod tts;

pub use capture::{AudioCapture, RecordOptions, SAMPLE_RATE, record_to_file, samples_to_wav};
pub use format::{Codec, OutputFormat, measure_duration};
pub use phrase::{PhraseDetector, PhraseLimits, PhraseState, calculate_energy, calibrate_threshold};
pub use playback::{
    AudioSink, CommandSink, NativeSink, PlaybackHandle, PlaybackOutcome, PlayerCommand, SinkKind,
    decode_file, default_sink,
};
pub use stt::SpeechToText;
pub use tts::{TextToSpeech, validate_file};
