//! CueForge engine - Main entry point
//!
//! Headless show-control engine driven by JSON command lines on stdin.
//! Responses go to stdout one line per command; logs go to stderr.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use cueforge_common::events::ShowEvent;
use cueforge_engine::audio::{AudioOutputSink, SymphoniaSource};
use cueforge_engine::fade::FadeEngine;
use cueforge_engine::video::{NullDisplay, NullPresenter};
use cueforge_engine::{AudioEngine, CommandProcessor, CueScheduler, EngineConfig};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::signal;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Command-line arguments for cueforge
#[derive(Parser, Debug)]
#[command(name = "cueforge")]
#[command(about = "Show-control cue engine")]
#[command(version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, env = "CUEFORGE_CONFIG")]
    config: Option<PathBuf>,

    /// Show document to open at startup
    #[arg(short, long, env = "CUEFORGE_SHOW")]
    show: Option<PathBuf>,

    /// Output device id (overrides the configuration file)
    #[arg(short, long, env = "CUEFORGE_DEVICE")]
    device: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = EngineConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.logging.directive())))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!(
        "Starting CueForge engine v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("CUEFORGE_GIT_HASH"),
        env!("CUEFORGE_BUILD_TIMESTAMP"),
        env!("CUEFORGE_BUILD_PROFILE")
    );

    let shutdown = CancellationToken::new();
    let fades = FadeEngine::new(config.fade_tick_interval());
    let fade_task = fades.start(shutdown.child_token());

    let audio = AudioEngine::new(&config, Arc::new(SymphoniaSource::new()), output_sink(&config), fades);
    let device_id = args.device.or_else(|| config.audio.device.clone());
    let device = audio
        .start(device_id.as_deref())
        .context("Failed to start audio output")?;
    info!("Audio output: {} ({} channels)", device.name, device.output_channels);

    let scheduler = CueScheduler::new(
        &config,
        Arc::clone(&audio),
        Arc::new(NullPresenter::new()),
        Arc::new(NullDisplay::new()),
    );
    if let Some(path) = &args.show {
        scheduler
            .open_show(path)
            .await
            .with_context(|| format!("Failed to open show {}", path.display()))?;
    }

    let event_task = tokio::spawn(log_events(scheduler.subscribe(), shutdown.child_token()));
    let processor = CommandProcessor::new(scheduler.clone());

    tokio::select! {
        result = command_loop(processor) => result?,
        _ = signal::ctrl_c() => info!("Shutdown requested"),
    }

    scheduler.stop().await;
    audio.shutdown();
    shutdown.cancel();
    let _ = tokio::join!(fade_task, event_task);

    info!("CueForge engine stopped");
    Ok(())
}

#[cfg(not(feature = "cpal-output"))]
fn output_sink(config: &EngineConfig) -> Arc<dyn AudioOutputSink> {
    use cueforge_engine::audio::ClockedSink;
    Arc::new(ClockedSink::new(
        config.audio.sample_rate,
        config.audio.buffer_size,
        config.audio.clocked_output_channels,
    ))
}

#[cfg(feature = "cpal-output")]
fn output_sink(config: &EngineConfig) -> Arc<dyn AudioOutputSink> {
    use cueforge_engine::audio::CpalSink;
    Arc::new(CpalSink::new(config.audio.sample_rate, config.audio.buffer_size))
}

/// Answer stdin command lines until stdin closes, then idle until Ctrl-C
async fn command_loop(processor: CommandProcessor) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let response = processor.process(line).await;
        stdout.write_all(response.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }

    info!("Command input closed; running until Ctrl-C");
    futures::future::pending::<()>().await;
    Ok(())
}

async fn log_events(mut events: broadcast::Receiver<ShowEvent>, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            received = events.recv() => match received {
                Ok(event) => debug!("Event: {:?}", event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Event log lagged, {} events skipped", skipped)
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}
