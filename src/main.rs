use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use mediguide::api::{ApiServer, ApiState};
use mediguide::voice::{
    PhraseLimits, PlaybackOutcome, RecordOptions, SinkKind, default_sink, record_to_file,
};
use mediguide::{Config, Doctor, PatientInput};

/// Mediguide - AI medical assistant with voice and vision
#[derive(Parser)]
#[command(name = "mediguide", version, about)]
struct Cli {
    /// Port to listen on (overrides `MEDIGUIDE_PORT` and the config file)
    #[arg(long)]
    port: Option<u16>,

    /// Config file (defaults to the platform config directory)
    #[arg(short, long, env = "MEDIGUIDE_CONFIG")]
    config: Option<PathBuf>,

    /// How answers are played on this machine
    #[arg(long, value_enum, default_value_t = Player::System)]
    player: Player,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the consultation form (default)
    Serve,
    /// Run one consultation from the terminal
    Ask {
        /// Typed symptoms
        #[arg(short, long)]
        text: Option<String>,
        /// Recorded symptoms
        #[arg(short, long)]
        audio: Option<PathBuf>,
        /// Photo to examine
        #[arg(short, long)]
        image: Option<PathBuf>,
        /// Play the spoken answer
        #[arg(long)]
        play: bool,
    },
    /// Record one phrase from the microphone
    Record {
        /// Output WAV file
        #[arg(default_value = "patient_voice_test.wav")]
        path: PathBuf,
        /// Seconds to wait for speech to begin
        #[arg(long, default_value = "20")]
        timeout: u64,
        /// Longest phrase in seconds
        #[arg(long)]
        phrase_limit: Option<u64>,
    },
    /// Play an audio file through the selected player
    Play {
        /// Audio file
        path: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Player {
    /// Platform player command
    System,
    /// Built-in decoder and output device
    Native,
}

impl From<Player> for SinkKind {
    fn from(player: Player) -> Self {
        match player {
            Player::System => Self::System,
            Player::Native => Self::Native,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Keys may live in a .env file next to the binary
    let dotenv = dotenvy::dotenv();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,mediguide=info",
        1 => "info,mediguide=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    if let Ok(path) = dotenv {
        tracing::debug!(path = %path.display(), "loaded .env");
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let sink = SinkKind::from(cli.player);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(cli.config.as_deref(), cli.port).await,
        Command::Ask {
            text,
            audio,
            image,
            play,
        } => {
            let input = PatientInput {
                text,
                audio_path: audio,
                image_path: image,
            };
            ask(cli.config.as_deref(), &input, play.then_some(sink)).await
        }
        Command::Record {
            path,
            timeout,
            phrase_limit,
        } => record(path, timeout, phrase_limit).await,
        Command::Play { path } => play(&path, sink).await,
    }
}

async fn serve(config_path: Option<&Path>, port: Option<u16>) -> anyhow::Result<()> {
    let config = Config::load(config_path)?;
    tracing::debug!(?config, "loaded configuration");

    let state = Arc::new(ApiState::from_config(&config)?);
    let port = port.unwrap_or(config.api_server.port);

    tracing::info!(
        port,
        vision_model = %config.models.vision,
        text_model = %config.models.text,
        "starting mediguide"
    );

    ApiServer::new(state, port)
        .static_dir(config.api_server.static_dir.clone())
        .run()
        .await?;

    Ok(())
}

async fn ask(
    config_path: Option<&Path>,
    input: &PatientInput,
    play_with: Option<SinkKind>,
) -> anyhow::Result<()> {
    let config = Config::load(config_path)?;
    let doctor = Doctor::from_config(&config)?;

    let consultation = doctor.consult(input).await;

    println!("Patient: {}", consultation.patient_query);
    println!("Doctor:  {}", consultation.doctor_response);

    let Some(audio) = consultation.audio_path else {
        return Ok(());
    };
    println!("Audio:   {}", audio.display());

    if let Some(kind) = play_with {
        play(&audio, kind).await?;
    }

    Ok(())
}

async fn record(path: PathBuf, timeout: u64, phrase_limit: Option<u64>) -> anyhow::Result<()> {
    let options = RecordOptions {
        limits: PhraseLimits {
            timeout: Duration::from_secs(timeout),
            phrase_time_limit: phrase_limit.map(Duration::from_secs),
            ..PhraseLimits::default()
        },
        ..RecordOptions::default()
    };

    println!("Recording to {}... speak after calibration.", path.display());

    let written = path.clone();
    let duration = tokio::task::spawn_blocking(move || record_to_file(&written, &options)).await??;

    println!(
        "Saved {:.1}s of audio to {}",
        duration.as_secs_f64(),
        path.display()
    );
    Ok(())
}

async fn play(path: &Path, kind: SinkKind) -> anyhow::Result<()> {
    let sink = default_sink(kind);
    let handle = sink.spawn(path)?;
    tracing::info!(player = handle.player(), path = %path.display(), "playing (Ctrl-C to stop)");

    match handle.wait_or_interrupt().await? {
        PlaybackOutcome::Finished => tracing::debug!("playback finished"),
        PlaybackOutcome::Interrupted => println!("Playback stopped."),
    }

    Ok(())
}
