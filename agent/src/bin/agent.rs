//! Chime agent - CLI binary.
//!
//! Listens for HTTP playback requests and plays sounds, beeps and speech
//! through the system audio device.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use agent::{
    serve, AgentConfig, AgentContext, ControllerConfig, CpalDevice, OutputDevice, Pico2Wave,
    PlaybackController,
};
use chime_common::{init_tracing, ColorWhen, MetricsContext, MetricsServerConfig};

/// Chime agent - play sounds, beeps and speech on request
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    // ---
    /// Address to bind the HTTP API to
    #[arg(long, env = "API_HOST", default_value = "0.0.0.0")]
    host: IpAddr,

    /// Port for the HTTP API
    #[arg(short, long, env = "API_PORT", default_value = "5000")]
    port: u16,

    /// Directory containing the playable sound files
    #[arg(short, long, env = "AUDIO_DIR", default_value = "audio-files/")]
    audio_dir: PathBuf,

    /// Text-to-speech language
    #[arg(long, env = "TTS_LANG", default_value = "en-US")]
    tts_lang: String,

    /// Log level used when RUST_LOG is not set
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Maximum duration of a single playback session in milliseconds
    #[arg(long, env = "MAX_DURATION_MS", default_value = "60000")]
    max_duration_ms: u64,

    /// Interval between playback liveness checks in milliseconds
    #[arg(long, env = "POLL_INTERVAL_MS", default_value = "10")]
    poll_interval_ms: u64,

    /// Audio output device name (default device when omitted)
    #[arg(short, long, env = "AUDIO_DEVICE")]
    device: Option<String>,

    /// Name reported by `GET /info`
    #[arg(long, env = "AGENT_NAME", default_value = "chime")]
    name: String,

    /// Prometheus metrics bind address (serves `GET /metrics`).
    #[arg(long, env = "METRICS_BIND")]
    metrics_bind: Option<SocketAddr>,

    /// Coloring
    #[arg(long, value_enum, default_value = "auto")]
    color: ColorWhen,
}

/// Capture version number from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    let args = Args::parse();
    init_tracing(args.color, &args.log_level)?;

    info!("Starting chime agent v{VERSION}");
    info!("Audio directory: {}", args.audio_dir.display());
    info!("TTS language: {}", args.tts_lang);
    info!("Maximum session duration: {}ms", args.max_duration_ms);

    if args.poll_interval_ms == 0 {
        anyhow::bail!("poll interval must be at least 1ms");
    }

    let metrics = MetricsContext::new("agent")?;
    if let Some(bind) = args.metrics_bind {
        let _metrics_task = metrics.spawn_metrics_server(MetricsServerConfig::new(bind));
    }

    let device = match &args.device {
        Some(name) => CpalDevice::named(name),
        None => CpalDevice::new(),
    };
    if let Err(e) = device.check_ready() {
        // The device may appear later (USB speaker, PulseAudio restart)
        warn!("Audio device not ready: {:#}", e);
    }

    let config = AgentConfig {
        bind: SocketAddr::new(args.host, args.port),
        audio_dir: args.audio_dir,
        tts_language: args.tts_lang,
        name: args.name,
        controller: ControllerConfig {
            max_duration: Duration::from_millis(args.max_duration_ms),
            poll_interval: Duration::from_millis(args.poll_interval_ms),
        },
        ..AgentConfig::default()
    };

    let device: Arc<dyn OutputDevice> = Arc::new(device);
    let controller =
        Arc::new(PlaybackController::new(device, config.controller).with_metrics(metrics.clone()));

    let ctx = AgentContext {
        controller: Arc::clone(&controller),
        synthesizer: Arc::new(Pico2Wave::new(config.tts_language.clone())),
        config: Arc::new(config),
        metrics,
    };

    serve(ctx, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutdown requested");
    })
    .await
    .context("API server failed")?;

    controller.stop();
    info!("Agent stopped");
    Ok(())
}
