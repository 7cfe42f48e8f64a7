//! Synthesis output formats and duration probing

use std::fmt;
use std::io::Cursor;
use std::str::FromStr;
use std::time::Duration;

use crate::{Error, Result};

/// Audio codec of a synthesized file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    /// MPEG layer III
    Mp3,
    /// Raw signed 16-bit little-endian mono PCM
    Pcm,
    /// Raw 8-bit mu-law mono
    Ulaw,
    /// Raw 8-bit A-law mono
    Alaw,
    /// RIFF WAVE container
    Wav,
}

impl Codec {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::Pcm => "pcm",
            Self::Ulaw => "ulaw",
            Self::Alaw => "alaw",
            Self::Wav => "wav",
        }
    }
}

/// Output format string understood by the synthesis API, e.g. `mp3_44100_128`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputFormat {
    pub codec: Codec,
    pub sample_rate: u32,
    pub bitrate_kbps: Option<u32>,
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self {
            codec: Codec::Mp3,
            sample_rate: 44_100,
            bitrate_kbps: Some(128),
        }
    }
}

impl OutputFormat {
    /// File extension for saved audio
    #[must_use]
    pub const fn extension(&self) -> &'static str {
        match self.codec {
            Codec::Mp3 => "mp3",
            Codec::Wav => "wav",
            Codec::Pcm | Codec::Ulaw | Codec::Alaw => "raw",
        }
    }

    /// MIME type used when serving the file over HTTP
    #[must_use]
    pub const fn content_type(&self) -> &'static str {
        match self.codec {
            Codec::Mp3 => "audio/mpeg",
            Codec::Wav => "audio/wav",
            Codec::Pcm => "audio/L16",
            Codec::Ulaw => "audio/basic",
            Codec::Alaw => "audio/x-alaw-basic",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.codec.as_str(), self.sample_rate)?;
        if let Some(bitrate) = self.bitrate_kbps {
            write!(f, "_{bitrate}")?;
        }
        Ok(())
    }
}

impl FromStr for OutputFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::Config(format!("unsupported output format: {s}"));

        let mut parts = s.trim().split('_');
        let codec = match parts.next().map(str::to_ascii_lowercase).as_deref() {
            Some("mp3") => Codec::Mp3,
            Some("pcm") => Codec::Pcm,
            Some("ulaw") => Codec::Ulaw,
            Some("alaw") => Codec::Alaw,
            Some("wav") => Codec::Wav,
            _ => return Err(invalid()),
        };

        let sample_rate: u32 = parts
            .next()
            .and_then(|p| p.parse().ok())
            .filter(|rate| *rate > 0)
            .ok_or_else(invalid)?;

        let bitrate_kbps = match parts.next() {
            Some(p) => Some(p.parse().map_err(|_| invalid())?),
            None => None,
        };

        if parts.next().is_some() {
            return Err(invalid());
        }

        Ok(Self {
            codec,
            sample_rate,
            bitrate_kbps,
        })
    }
}

/// Measure the playing time of an encoded audio buffer
///
/// # Errors
///
/// Returns error if the buffer cannot be decoded as `format`
pub fn measure_duration(audio: &[u8], format: OutputFormat) -> Result<Duration> {
    match format.codec {
        Codec::Mp3 => mp3_duration(audio),
        Codec::Wav => wav_duration(audio),
        Codec::Pcm => Ok(raw_duration(audio.len() / 2, format.sample_rate)),
        Codec::Ulaw | Codec::Alaw => Ok(raw_duration(audio.len(), format.sample_rate)),
    }
}

fn raw_duration(frames: usize, sample_rate: u32) -> Duration {
    let nanos = frames as u128 * 1_000_000_000 / u128::from(sample_rate.max(1));
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}

fn wav_duration(audio: &[u8]) -> Result<Duration> {
    let reader =
        hound::WavReader::new(Cursor::new(audio)).map_err(|e| Error::Audio(e.to_string()))?;
    let rate = reader.spec().sample_rate;
    if rate == 0 {
        return Err(Error::Audio("WAV header reports zero sample rate".to_string()));
    }
    Ok(raw_duration(reader.duration() as usize, rate))
}

fn mp3_duration(audio: &[u8]) -> Result<Duration> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(audio));
    let mut seconds = 0.0_f64;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                let channels = frame.channels.max(1);
                if frame.sample_rate <= 0 {
                    continue;
                }
                #[allow(clippy::cast_precision_loss)]
                let frame_secs = (frame.data.len() / channels) as f64 / f64::from(frame.sample_rate);
                seconds += frame_secs;
            }
            Err(minimp3::Error::Eof | minimp3::Error::InsufficientData) => break,
            Err(minimp3::Error::SkippedData) => {}
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    Ok(Duration::from_secs_f64(seconds))
}
