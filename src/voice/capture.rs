//! Audio capture from microphone

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};

use super::phrase::{PhraseDetector, PhraseLimits, PhraseState};
use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// How often the recorder drains the capture buffer
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Captures audio from the default input device
pub struct AudioCapture {
    config: StreamConfig,
    buffer: Arc<Mutex<Vec<f32>>>,
    stream: Option<Stream>,
}

impl AudioCapture {
    /// Create a new audio capture instance
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

        let supported_config = device
            .supported_input_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
            })
            .ok_or_else(|| Error::Audio("no suitable audio config found".to_string()))?;

        let config = supported_config
            .with_sample_rate(SampleRate(SAMPLE_RATE))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = SAMPLE_RATE,
            channels = config.channels,
            "audio capture initialized"
        );

        Ok(Self {
            config,
            buffer: Arc::new(Mutex::new(Vec::new())),
            stream: None,
        })
    }

    /// Start capturing audio
    ///
    /// # Errors
    ///
    /// Returns error if capture fails
    pub fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let buffer = Arc::clone(&self.buffer);
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device".to_string()))?;

        let stream = device
            .build_input_stream(
                &self.config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if let Ok(mut buf) = buffer.lock() {
                        buf.extend_from_slice(data);
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;
        self.stream = Some(stream);

        tracing::debug!("audio capture started");
        Ok(())
    }

    /// Stop capturing audio
    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("audio capture stopped");
        }
    }

    /// Get captured audio buffer and clear it
    ///
    /// Returns the audio samples captured since last call
    #[must_use]
    pub fn take_buffer(&self) -> Vec<f32> {
        self.buffer
            .lock()
            .map(|mut buf| std::mem::take(&mut *buf))
            .unwrap_or_default()
    }

    /// Get the sample rate
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }
}

/// Options for [`record_to_file`]
#[derive(Debug, Clone, Copy)]
pub struct RecordOptions {
    /// Ambient-noise calibration window
    pub calibration: Duration,
    /// Phrase timing limits
    pub limits: PhraseLimits,
}

impl Default for RecordOptions {
    fn default() -> Self {
        Self {
            calibration: Duration::from_secs(1),
            limits: PhraseLimits::default(),
        }
    }
}

/// Record one phrase from the default microphone into a WAV file
///
/// Blocks the calling thread; run it on a blocking task from async code.
///
/// # Errors
///
/// Returns error if the microphone cannot be opened, no speech starts before
/// the timeout, or the file cannot be written
pub fn record_to_file(path: &Path, options: &RecordOptions) -> Result<Duration> {
    let mut capture = AudioCapture::new()?;
    capture.start()?;

    tracing::info!("adjusting for ambient noise...");
    std::thread::sleep(options.calibration);
    let ambient = capture.take_buffer();

    let mut detector = PhraseDetector::calibrated(&ambient, options.limits, capture.sample_rate());
    tracing::info!(threshold = detector.threshold(), "start speaking now...");

    loop {
        std::thread::sleep(POLL_INTERVAL);
        match detector.process(&capture.take_buffer()) {
            PhraseState::Complete => break,
            PhraseState::TimedOut => {
                capture.stop();
                return Err(Error::Audio(
                    "listening timed out while waiting for phrase to start".to_string(),
                ));
            }
            PhraseState::Waiting | PhraseState::Speaking => {}
        }
    }
    capture.stop();

    let phrase = detector.take_phrase();
    let wav = samples_to_wav(&phrase, SAMPLE_RATE)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, wav)?;

    #[allow(clippy::cast_precision_loss)]
    let duration = Duration::from_secs_f64(phrase.len() as f64 / f64::from(SAMPLE_RATE));
    tracing::info!(path = %path.display(), duration_ms = duration.as_millis(), "recording complete");

    Ok(duration)
}

/// Convert f32 samples to WAV bytes for STT APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            // Convert f32 [-1.0, 1.0] to i16
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
