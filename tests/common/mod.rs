//! Shared test utilities
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use mediguide::config::ModelConfig;
use mediguide::image::EncodedImage;
use mediguide::{Analyze, Doctor, Error, Result, Synthesize, Transcribe};

/// Preamble used by test pipelines
pub const TEST_PROMPT: &str = "Act as a doctor.";

/// Smallest valid PNG (1x1 transparent pixel)
pub const TINY_PNG: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F,
    0x15, 0xC4, 0x89, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x00,
    0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49,
    0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
];

/// Encode a mono 16-bit 16 kHz WAV of silence lasting `secs`
pub fn wav_bytes(secs: f32) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut buffer = std::io::Cursor::new(Vec::new());
    let mut writer = hound::WavWriter::new(&mut buffer, spec).expect("failed to create wav");
    let samples = (16_000.0 * secs) as usize;
    for _ in 0..samples {
        writer.write_sample(0i16).expect("failed to write sample");
    }
    writer.finalize().expect("failed to finalize wav");
    buffer.into_inner()
}

/// Write a mono 16-bit WAV of silence lasting `secs`
pub fn write_wav(path: &Path, secs: f32) {
    std::fs::write(path, wav_bytes(secs)).expect("failed to write wav");
}

/// Transcriber returning a fixed transcript, or failing when `None`
pub struct FakeTranscriber {
    transcript: Option<String>,
    pub calls: Mutex<Vec<Option<PathBuf>>>,
}

impl FakeTranscriber {
    pub fn returning(transcript: &str) -> Arc<Self> {
        Arc::new(Self {
            transcript: Some(transcript.to_string()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            transcript: None,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Transcribe for FakeTranscriber {
    async fn transcribe_file(&self, path: Option<&Path>) -> Result<String> {
        self.calls.lock().unwrap().push(path.map(Path::to_path_buf));
        self.transcript
            .clone()
            .ok_or_else(|| Error::Stt("transcription service unavailable".to_string()))
    }
}

/// One recorded chat call
#[derive(Debug, Clone)]
pub struct BrainCall {
    pub query: String,
    pub image: Option<EncodedImage>,
    pub model: String,
}

/// Chat model returning a fixed answer, or failing when `None`
pub struct FakeBrain {
    answer: Option<String>,
    pub calls: Mutex<Vec<BrainCall>>,
}

impl FakeBrain {
    pub fn answering(answer: &str) -> Arc<Self> {
        Arc::new(Self {
            answer: Some(answer.to_string()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            answer: None,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn last_call(&self) -> BrainCall {
        self.calls
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("chat model was not called")
    }
}

#[async_trait]
impl Analyze for FakeBrain {
    async fn analyze(
        &self,
        query: &str,
        image: Option<&EncodedImage>,
        model: &str,
    ) -> Result<String> {
        self.calls.lock().unwrap().push(BrainCall {
            query: query.to_string(),
            image: image.cloned(),
            model: model.to_string(),
        });
        self.answer
            .clone()
            .ok_or_else(|| Error::Vision("API error 500: upstream down".to_string()))
    }
}

/// Synthesizer writing a one-second WAV, or failing
pub struct FakeVoice {
    fail: bool,
    pub calls: Mutex<Vec<String>>,
}

impl FakeVoice {
    pub fn working() -> Arc<Self> {
        Arc::new(Self {
            fail: false,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn spoken(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Synthesize for FakeVoice {
    async fn synthesize_to_file(&self, text: &str, dest: &Path) -> Result<PathBuf> {
        self.calls.lock().unwrap().push(text.to_string());
        if self.fail {
            return Err(mediguide::TtsError::VoiceLimitReached.into());
        }
        write_wav(dest, 1.0);
        Ok(dest.to_path_buf())
    }
}

/// Models used by test pipelines
pub fn test_models() -> ModelConfig {
    ModelConfig {
        vision: "test-vision-model".to_string(),
        text: "test-text-model".to_string(),
    }
}

/// Build a pipeline over fakes, writing answers to `output`
pub fn doctor(
    transcriber: Arc<dyn Transcribe>,
    brain: Arc<dyn Analyze>,
    voice: Arc<dyn Synthesize>,
    output: &Path,
) -> Doctor {
    Doctor::new(
        transcriber,
        brain,
        voice,
        test_models(),
        TEST_PROMPT.to_string(),
        output.to_path_buf(),
    )
}
