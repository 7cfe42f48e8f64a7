//! Phrase detection for local recording
//!
//! Energy-based: ambient noise sets the threshold, speech above it starts a
//! phrase, and a run of quiet samples (or the phrase limit) ends it.

use std::time::Duration;

/// Floor for the calibrated speech threshold
const MIN_THRESHOLD: f32 = 0.01;

/// Speech must be this much louder than the ambient level
const AMBIENT_RATIO: f32 = 1.5;

/// State of the phrase detector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhraseState {
    /// Waiting for speech to begin
    Waiting,
    /// Speech detected, accumulating
    Speaking,
    /// Phrase finished (pause or limit reached)
    Complete,
    /// No speech before the timeout
    TimedOut,
}

/// Sample-count limits for a phrase
#[derive(Debug, Clone, Copy)]
pub struct PhraseLimits {
    /// Longest wait for speech to begin
    pub timeout: Duration,
    /// Longest phrase, unbounded when `None`
    pub phrase_time_limit: Option<Duration>,
    /// Quiet run that ends a phrase
    pub pause: Duration,
}

impl Default for PhraseLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            phrase_time_limit: None,
            pause: Duration::from_millis(800),
        }
    }
}

/// Detects one spoken phrase in a stream of samples
pub struct PhraseDetector {
    threshold: f32,
    state: PhraseState,
    buffer: Vec<f32>,
    waited: usize,
    silence: usize,
    timeout_samples: usize,
    limit_samples: Option<usize>,
    pause_samples: usize,
}

impl PhraseDetector {
    /// Create a detector with an explicit energy threshold
    #[must_use]
    pub fn new(threshold: f32, limits: PhraseLimits, sample_rate: u32) -> Self {
        let to_samples = |d: Duration| samples_for(d, sample_rate);

        tracing::debug!(threshold, ?limits, "phrase detector initialized");

        Self {
            threshold,
            state: PhraseState::Waiting,
            buffer: Vec::new(),
            waited: 0,
            silence: 0,
            timeout_samples: to_samples(limits.timeout),
            limit_samples: limits.phrase_time_limit.map(to_samples),
            pause_samples: to_samples(limits.pause),
        }
    }

    /// Create a detector whose threshold is calibrated from ambient noise
    #[must_use]
    pub fn calibrated(ambient: &[f32], limits: PhraseLimits, sample_rate: u32) -> Self {
        Self::new(calibrate_threshold(ambient), limits, sample_rate)
    }

    /// Feed captured samples and return the new state
    pub fn process(&mut self, samples: &[f32]) -> PhraseState {
        let energy = calculate_energy(samples);
        let is_speech = energy > self.threshold;

        match self.state {
            PhraseState::Waiting => {
                if is_speech {
                    self.state = PhraseState::Speaking;
                    self.buffer.extend_from_slice(samples);
                    self.silence = 0;
                    tracing::trace!(energy, "speech detected");
                    self.check_limit();
                } else {
                    self.waited += samples.len();
                    if self.waited >= self.timeout_samples {
                        tracing::debug!("no speech before timeout");
                        self.state = PhraseState::TimedOut;
                    }
                }
            }
            PhraseState::Speaking => {
                self.buffer.extend_from_slice(samples);

                if is_speech {
                    self.silence = 0;
                } else {
                    self.silence += samples.len();
                }

                if self.silence >= self.pause_samples {
                    tracing::debug!(samples = self.buffer.len(), "phrase complete");
                    self.state = PhraseState::Complete;
                } else {
                    self.check_limit();
                }
            }
            PhraseState::Complete | PhraseState::TimedOut => {}
        }

        self.state
    }

    fn check_limit(&mut self) {
        if let Some(limit) = self.limit_samples
            && self.buffer.len() >= limit
        {
            self.buffer.truncate(limit);
            tracing::debug!(samples = limit, "phrase time limit reached");
            self.state = PhraseState::Complete;
        }
    }

    /// Get current state
    #[must_use]
    pub const fn state(&self) -> PhraseState {
        self.state
    }

    /// Calibrated speech threshold
    #[must_use]
    pub const fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Take the captured phrase, clearing it
    pub fn take_phrase(&mut self) -> Vec<f32> {
        std::mem::take(&mut self.buffer)
    }
}

/// Threshold a little above the ambient RMS level
#[must_use]
pub fn calibrate_threshold(ambient: &[f32]) -> f32 {
    (calculate_energy(ambient) * AMBIENT_RATIO).max(MIN_THRESHOLD)
}

/// Calculate RMS energy of audio samples
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn calculate_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn samples_for(duration: Duration, sample_rate: u32) -> usize {
    (duration.as_secs_f64() * f64::from(sample_rate)) as usize
}
