//! Mediguide - AI medical assistant demo
//!
//! This library provides the consultation pipeline behind the Mediguide form:
//! - Speech-to-text for recorded symptoms
//! - Vision/text chat models that answer as a doctor
//! - Speech synthesis and playback of the answer
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                    Interfaces                       │
//! │      Browser form  │  /api/consult  │  CLI         │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                     Doctor                          │
//! │   Transcribe  │  Image encode  │  Analyze  │  Speak │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │               Remote services                       │
//! │   Groq (chat + Whisper)   │   ElevenLabs (TTS)      │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod brain;
pub mod config;
pub mod consultation;
pub mod error;
pub mod image;
pub mod voice;

pub use brain::ChatClient;
pub use config::Config;
pub use consultation::{Analyze, Consultation, Doctor, PatientInput, Synthesize, Transcribe};
pub use error::{Error, Result, TtsError};
pub use image::EncodedImage;
