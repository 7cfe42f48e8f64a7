//! Audio playback of synthesized answers
//!
//! One [`AudioSink`] per platform, chosen once at startup by [`default_sink`]:
//! `afplay` on macOS, a player fallback chain on Linux, PowerShell's
//! `SoundPlayer` on Windows, or in-process decoding through `cpal`.

use std::collections::VecDeque;
use std::fmt;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleRate;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::{Error, Result};

/// Replaced by the audio file path in player arguments
const PATH_PLACEHOLDER: &str = "{path}";

/// How long a player gets to honor the quit command before it is killed
const QUIT_GRACE: Duration = Duration::from_millis(500);

/// Something that can play an audio file
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Sink name for logging
    fn name(&self) -> &str;

    /// Start playback in the background
    ///
    /// # Errors
    ///
    /// Returns error if no player could be started
    fn spawn(&self, path: &Path) -> Result<PlaybackHandle>;

    /// Play to completion
    ///
    /// # Errors
    ///
    /// Returns error if playback cannot start or fails
    async fn play(&self, path: &Path) -> Result<()> {
        self.spawn(path)?.wait().await
    }
}

/// External player invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerCommand {
    /// Executable looked up on `PATH`
    pub program: &'static str,
    /// Arguments; the file path is appended unless one contains `{path}`
    pub args: &'static [&'static str],
}

impl PlayerCommand {
    /// Build the command line for `path`
    ///
    /// An argument that is exactly `{path}` receives the raw path; a
    /// placeholder embedded in a script is single-quote escaped.
    #[must_use]
    pub fn command(&self, path: &Path) -> Command {
        let path = path.to_string_lossy();
        let mut command = Command::new(self.program);

        if self.args.iter().any(|a| a.contains(PATH_PLACEHOLDER)) {
            for arg in self.args {
                if *arg == PATH_PLACEHOLDER {
                    command.arg(path.as_ref());
                } else {
                    command.arg(arg.replace(PATH_PLACEHOLDER, &path.replace('\'', "''")));
                }
            }
        } else {
            command.args(self.args).arg(path.as_ref());
        }

        command
    }

    /// Whether the program is on `PATH`
    #[must_use]
    pub fn is_available(&self) -> bool {
        which::which(self.program).is_ok()
    }

    fn start(&self, path: &Path) -> std::io::Result<Child> {
        self.command(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
    }
}

/// Start the first player in `queue` that launches, consuming the ones tried
fn start_next(queue: &mut VecDeque<PlayerCommand>, path: &Path) -> Option<(PlayerCommand, Child)> {
    while let Some(player) = queue.pop_front() {
        match player.start(path) {
            Ok(child) => return Some((player, child)),
            Err(e) => {
                tracing::warn!(player = player.program, error = %e, "player failed to start, trying next");
            }
        }
    }
    None
}

/// Plays files through external player processes, trying each in order
pub struct CommandSink {
    name: &'static str,
    players: Vec<PlayerCommand>,
}

impl CommandSink {
    /// Sink over an explicit player chain
    #[must_use]
    pub const fn new(name: &'static str, players: Vec<PlayerCommand>) -> Self {
        Self { name, players }
    }

    /// macOS: `afplay`
    #[must_use]
    pub fn macos() -> Self {
        Self::new(
            "afplay",
            vec![PlayerCommand {
                program: "afplay",
                args: &[],
            }],
        )
    }

    /// Linux: `mpg123`, then `ffplay`, then `aplay`
    #[must_use]
    pub fn linux() -> Self {
        Self::new(
            "linux-players",
            vec![
                PlayerCommand {
                    program: "mpg123",
                    args: &["-q"],
                },
                PlayerCommand {
                    program: "ffplay",
                    args: &["-nodisp", "-autoexit", "-loglevel", "quiet"],
                },
                PlayerCommand {
                    program: "aplay",
                    args: &["-q"],
                },
            ],
        )
    }

    /// Windows: PowerShell `Media.SoundPlayer`
    #[must_use]
    pub fn windows() -> Self {
        Self::new(
            "powershell",
            vec![PlayerCommand {
                program: "powershell",
                args: &[
                    "-NoProfile",
                    "-Command",
                    "(New-Object Media.SoundPlayer '{path}').PlaySync();",
                ],
            }],
        )
    }

    /// Player chain, in fallback order
    #[must_use]
    pub fn players(&self) -> &[PlayerCommand] {
        &self.players
    }

    fn tried(&self) -> String {
        self.players
            .iter()
            .map(|p| p.program)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[async_trait]
impl AudioSink for CommandSink {
    fn name(&self) -> &str {
        self.name
    }

    fn spawn(&self, path: &Path) -> Result<PlaybackHandle> {
        let mut queue: VecDeque<PlayerCommand> = self
            .players
            .iter()
            .copied()
            .filter(PlayerCommand::is_available)
            .collect();

        let Some((player, child)) = start_next(&mut queue, path) else {
            return Err(Error::Playback(format!(
                "no audio player found (tried {})",
                self.tried()
            )));
        };

        tracing::debug!(player = player.program, path = %path.display(), "playback started");
        Ok(PlaybackHandle {
            player: player.program.to_string(),
            inner: HandleInner::Process {
                child,
                path: path.to_path_buf(),
                fallbacks: queue,
            },
        })
    }
}

/// Decodes in-process and plays through the default output device
#[derive(Debug, Default)]
pub struct NativeSink;

#[async_trait]
impl AudioSink for NativeSink {
    fn name(&self) -> &str {
        "native"
    }

    fn spawn(&self, path: &Path) -> Result<PlaybackHandle> {
        let (samples, sample_rate) = decode_file(path)?;
        let stop = Arc::new(AtomicBool::new(false));
        let task_stop = Arc::clone(&stop);

        let task = tokio::task::spawn_blocking(move || {
            play_samples_blocking(samples, sample_rate, &task_stop)
        });

        Ok(PlaybackHandle {
            player: "native".to_string(),
            inner: HandleInner::Native { task, stop },
        })
    }
}

/// Which sink to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SinkKind {
    /// The platform's external player
    #[default]
    System,
    /// In-process decoding through `cpal`
    Native,
}

/// Select the audio sink for this platform
#[must_use]
pub fn default_sink(kind: SinkKind) -> Box<dyn AudioSink> {
    match kind {
        SinkKind::Native => Box::new(NativeSink),
        SinkKind::System if cfg!(target_os = "macos") => Box::new(CommandSink::macos()),
        SinkKind::System if cfg!(target_os = "windows") => Box::new(CommandSink::windows()),
        SinkKind::System => Box::new(CommandSink::linux()),
    }
}

/// How monitored playback ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    /// The player reached the end of the file
    Finished,
    /// Ctrl-C stopped the player first
    Interrupted,
}

/// A running playback
pub struct PlaybackHandle {
    player: String,
    inner: HandleInner,
}

enum HandleInner {
    Process {
        child: Child,
        path: PathBuf,
        /// Available players not yet tried
        fallbacks: VecDeque<PlayerCommand>,
    },
    Native {
        task: JoinHandle<Result<()>>,
        stop: Arc<AtomicBool>,
    },
}

impl fmt::Debug for PlaybackHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaybackHandle")
            .field("player", &self.player)
            .finish_non_exhaustive()
    }
}

impl PlaybackHandle {
    /// Player driving this playback
    #[must_use]
    pub fn player(&self) -> &str {
        &self.player
    }

    /// Wait for playback to finish
    ///
    /// A player that exits unsuccessfully hands over to the next available
    /// player in its chain.
    ///
    /// # Errors
    ///
    /// Returns error if every remaining player exits unsuccessfully
    pub async fn wait(&mut self) -> Result<()> {
        match &mut self.inner {
            HandleInner::Process {
                child,
                path,
                fallbacks,
            } => loop {
                let status = child.wait().await?;
                if status.success() {
                    return Ok(());
                }

                let Some((next, next_child)) = start_next(fallbacks, path) else {
                    return Err(Error::Playback(format!("{} exited with {status}", self.player)));
                };

                tracing::warn!(player = %self.player, %status, next = next.program, "player failed, trying next");
                *child = next_child;
                self.player = next.program.to_string();
            },
            HandleInner::Native { task, .. } => task
                .await
                .map_err(|e| Error::Playback(format!("playback task failed: {e}")))?,
        }
    }

    /// Stop playback: ask the player to quit, then kill it if it lingers
    ///
    /// # Errors
    ///
    /// Returns error if the player cannot be killed
    pub async fn stop(&mut self) -> Result<()> {
        match &mut self.inner {
            HandleInner::Process { child, .. } => {
                if let Some(mut stdin) = child.stdin.take() {
                    if let Err(e) = stdin.write_all(b"q\n").await {
                        tracing::debug!(error = %e, "could not send quit command");
                    }
                    drop(stdin);
                }

                if let Ok(Ok(_)) = tokio::time::timeout(QUIT_GRACE, child.wait()).await {
                    tracing::debug!(player = %self.player, "player quit");
                } else {
                    tracing::warn!(player = %self.player, "player ignored quit, terminating");
                    child.kill().await?;
                }
                Ok(())
            }
            HandleInner::Native { task, stop } => {
                stop.store(true, Ordering::Relaxed);
                let _ = task.await;
                Ok(())
            }
        }
    }

    /// Wait for playback, stopping it if Ctrl-C arrives first
    ///
    /// # Errors
    ///
    /// Returns error if the player fails or cannot be stopped
    pub async fn wait_or_interrupt(mut self) -> Result<PlaybackOutcome> {
        let interrupted = tokio::select! {
            result = self.wait() => {
                result?;
                false
            }
            _ = tokio::signal::ctrl_c() => true,
        };

        if interrupted {
            tracing::info!(player = %self.player, "playback interrupted");
            self.stop().await?;
            Ok(PlaybackOutcome::Interrupted)
        } else {
            Ok(PlaybackOutcome::Finished)
        }
    }
}

/// Decode a WAV or MP3 file to mono f32 samples
///
/// # Errors
///
/// Returns error if the file cannot be read or decoded
pub fn decode_file(path: &Path) -> Result<(Vec<f32>, u32)> {
    let data = std::fs::read(path)?;
    let is_wav = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("wav"));

    if is_wav { decode_wav(&data) } else { decode_mp3(&data) }
}

fn decode_wav(data: &[u8]) -> Result<(Vec<f32>, u32)> {
    let mut reader =
        hound::WavReader::new(Cursor::new(data)).map_err(|e| Error::Audio(e.to_string()))?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Audio(e.to_string()))?,
        hound::SampleFormat::Int => {
            #[allow(clippy::cast_precision_loss)]
            let scale = (1_i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| Error::Audio(e.to_string()))?
        }
    };

    Ok((downmix(&interleaved, channels), spec.sample_rate))
}

fn decode_mp3(data: &[u8]) -> Result<(Vec<f32>, u32)> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(data));
    let mut samples = Vec::new();
    let mut sample_rate = 0;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                sample_rate = u32::try_from(frame.sample_rate).unwrap_or(sample_rate);
                let frame_samples: Vec<f32> =
                    frame.data.iter().map(|&s| f32::from(s) / 32768.0).collect();
                samples.extend(downmix(&frame_samples, frame.channels.max(1)));
            }
            Err(minimp3::Error::Eof | minimp3::Error::InsufficientData) => break,
            Err(minimp3::Error::SkippedData) => {}
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    if sample_rate == 0 {
        return Err(Error::Audio("no MP3 frames found".to_string()));
    }

    Ok((samples, sample_rate))
}

/// Average interleaved channels down to mono
#[allow(clippy::cast_precision_loss)]
fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Play samples in a blocking manner until done or `stop` is set
fn play_samples_blocking(samples: Vec<f32>, sample_rate: u32, stop: &AtomicBool) -> Result<()> {
    if samples.is_empty() {
        return Ok(());
    }

    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

    let rate = SampleRate(sample_rate);
    let supported_config = device
        .supported_output_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(|c| c.channels() == 1 && c.min_sample_rate() <= rate && c.max_sample_rate() >= rate)
        .or_else(|| {
            // Fallback: try stereo
            device.supported_output_configs().ok()?.find(|c| {
                c.channels() == 2 && c.min_sample_rate() <= rate && c.max_sample_rate() >= rate
            })
        })
        .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

    let config = supported_config.with_sample_rate(rate).config();
    let channels = usize::from(config.channels);

    let sample_count = samples.len();
    let samples = Arc::new(samples);
    let position = Arc::new(AtomicUsize::new(0));

    let stream_samples = Arc::clone(&samples);
    let stream_position = Arc::clone(&position);

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                for frame in data.chunks_mut(channels) {
                    let pos = stream_position.load(Ordering::Relaxed);
                    let sample = stream_samples.get(pos).copied().unwrap_or(0.0);
                    for out in frame.iter_mut() {
                        *out = sample;
                    }
                    if pos < stream_samples.len() {
                        stream_position.store(pos + 1, Ordering::Relaxed);
                    }
                }
            },
            |err| {
                tracing::error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;

    let duration_ms = (sample_count as u64 * 1000) / u64::from(sample_rate);
    let timeout = Duration::from_millis(duration_ms + 500);
    let start = Instant::now();

    while position.load(Ordering::Relaxed) < sample_count && start.elapsed() < timeout {
        if stop.load(Ordering::Relaxed) {
            tracing::debug!("native playback stopped");
            break;
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    // Let the device drain its last buffer
    std::thread::sleep(Duration::from_millis(100));

    drop(stream);
    tracing::debug!(samples = sample_count, "playback complete");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args_of(command: &Command) -> Vec<String> {
        command
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_path_is_appended_by_default() {
        let player = PlayerCommand {
            program: "mpg123",
            args: &["-q"],
        };
        let command = player.command(Path::new("/tmp/final.mp3"));
        assert_eq!(args_of(&command), ["-q", "/tmp/final.mp3"]);
    }

    #[test]
    fn test_placeholder_in_script_is_escaped() {
        let sink = CommandSink::windows();
        let command = sink.players()[0].command(Path::new("C:\\it's\\final.wav"));
        let args = args_of(&command);
        assert_eq!(
            args[2],
            "(New-Object Media.SoundPlayer 'C:\\it''s\\final.wav').PlaySync();"
        );
    }

    #[test]
    fn test_linux_fallback_order() {
        let programs: Vec<_> = CommandSink::linux().players().iter().map(|p| p.program).collect();
        assert_eq!(programs, ["mpg123", "ffplay", "aplay"]);
    }

    #[test]
    fn test_missing_players_report_chain() {
        let sink = CommandSink::new(
            "none",
            vec![PlayerCommand {
                program: "mediguide-no-such-player",
                args: &[],
            }],
        );
        let error = sink.spawn(Path::new("final.mp3")).unwrap_err();
        assert!(error.to_string().contains("mediguide-no-such-player"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_player_hands_over_to_next() {
        let sink = CommandSink::new(
            "chain",
            vec![
                PlayerCommand {
                    program: "false",
                    args: &[],
                },
                PlayerCommand {
                    program: "true",
                    args: &[],
                },
            ],
        );

        let mut handle = sink.spawn(Path::new("final.mp3")).unwrap();
        assert_eq!(handle.player(), "false");
        handle.wait().await.unwrap();
        assert_eq!(handle.player(), "true");

        sink.play(Path::new("final.mp3")).await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exhausted_chain_reports_last_failure() {
        let failing = PlayerCommand {
            program: "false",
            args: &[],
        };
        let sink = CommandSink::new("chain", vec![failing, failing]);

        let error = sink.play(Path::new("final.mp3")).await.unwrap_err();
        assert!(error.to_string().contains("false exited with"));
    }

    #[test]
    fn test_mp3_decode_without_frames() {
        for data in [&b""[..], b"definitely not audio", &[0xFF; 3]] {
            let error = decode_mp3(data).unwrap_err();
            assert!(error.to_string().contains("no MP3 frames found"), "{error}");
        }
    }

    #[test]
    fn test_downmix_averages_channels() {
        let stereo = [1.0, 0.0, 0.5, 0.5];
        assert_eq!(downmix(&stereo, 2), vec![0.5, 0.5]);
        assert_eq!(downmix(&stereo, 1), stereo.to_vec());
    }

    #[test]
    fn test_default_sink_selection() {
        assert_eq!(default_sink(SinkKind::Native).name(), "native");
        let system = default_sink(SinkKind::System);
        if cfg!(target_os = "linux") {
            assert_eq!(system.name(), "linux-players");
        }
    }
}
