use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use casabot::transcoder::{AudioPayload, Transcoder, Transcript};
use casabot::{Config, Daemon};

/// Casabot - voice and text chat for a Home Assistant backend
#[derive(Parser)]
#[command(name = "casabot", version, about)]
struct Cli {
    /// Port to listen on (overrides config)
    #[arg(long, env = "CASABOT_PORT")]
    port: Option<u16>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Disable speech recognition and synthesis
    #[arg(long, env = "CASABOT_DISABLE_VOICE")]
    disable_voice: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the web UI and API (default)
    Serve,
    /// Send one text message to the assistant and print the reply
    Ask {
        /// Message text
        text: String,
    },
    /// Transcribe a local audio file
    Transcribe {
        /// Path to a WAV, WebM, Ogg or MP3 recording
        file: PathBuf,
    },
    /// Handshake with the assistant backend and report the session state
    Check,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,casabot=info",
        1 => "info,casabot=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load_with_options(cli.disable_voice)?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    tracing::debug!(?config, "loaded configuration");

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            tracing::info!(port = config.server.port, voice = config.voice.enabled, "starting casabot");
            Daemon::new(config).run().await?;
        }
        Command::Ask { text } => ask(config, &text).await?,
        Command::Transcribe { file } => transcribe(config, &file).await?,
        Command::Check => check(config).await?,
    }

    Ok(())
}

/// One text turn against the configured backend
async fn ask(config: Config, text: &str) -> anyhow::Result<()> {
    let daemon = Daemon::new(config);
    daemon.connect().await?;

    let result = daemon.orchestrator().handle_text_turn(text).await;
    println!("{}", result.text);

    daemon.assistant().shutdown().await;
    Ok(())
}

/// Transcribe a recording without involving the assistant
async fn transcribe(config: Config, file: &Path) -> anyhow::Result<()> {
    let daemon = Daemon::new(config);
    if !daemon.transcoder().can_transcribe() {
        anyhow::bail!("speech recognition is not configured");
    }

    let bytes = tokio::fs::read(file).await?;
    let payload = AudioPayload::new(bytes, mime_for_path(file));

    match daemon.transcoder().transcribe(&payload).await? {
        Transcript::Text(text) => println!("{text}"),
        Transcript::Unintelligible => println!("(no speech recognized)"),
    }
    Ok(())
}

/// Handshake only
async fn check(config: Config) -> anyhow::Result<()> {
    let url = config.assistant.url.clone();
    let daemon = Daemon::new(config);

    let state = daemon.connect().await?;
    let info = daemon.assistant().session_info().await.unwrap_or_default();

    println!("assistant: {url}");
    println!("state:     {state}");
    println!("server:    {}", info.server_name.as_deref().unwrap_or("unknown"));
    println!("version:   {}", info.server_version.as_deref().unwrap_or("unknown"));
    println!("protocol:  {}", info.protocol_version.as_deref().unwrap_or("unknown"));

    let (stt, tts) = daemon.orchestrator().voice_capabilities();
    println!("voice:     stt={stt} tts={tts}");

    daemon.assistant().shutdown().await;
    Ok(())
}

fn mime_for_path(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("wav") => "audio/wav",
        Some("webm") => "audio/webm",
        Some("ogg" | "oga" | "opus") => "audio/ogg",
        Some("mp3") => "audio/mpeg",
        Some("m4a" | "mp4") => "audio/mp4",
        _ => "application/octet-stream",
    }
}
