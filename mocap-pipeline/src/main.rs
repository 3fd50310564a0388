//! mocap-pipeline - Session processing entry point
//!
//! Runs every pipeline stage over one recording session folder and logs the
//! progress events as they arrive. Ctrl+C cancels the run between stages.

use std::fs::File;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::Parser;
use mocap_common::config::{resolve_session_folder, PipelineConfig};
use mocap_common::events::{self, PipelineEvent};
use mocap_pipeline::calibration;
use mocap_pipeline::detect::CommandPoseDetector;
use mocap_pipeline::filter::ButterworthFilter;
use mocap_pipeline::video::FfmpegVideoIo;
use mocap_pipeline::{Orchestrator, RunContext, RunState};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Command-line arguments for mocap-pipeline
#[derive(Parser, Debug)]
#[command(name = "mocap-pipeline")]
#[command(about = "Multi-camera markerless motion capture pipeline")]
#[command(version)]
struct Args {
    /// Recording session folder (falls back to MOCAP_SESSION_FOLDER)
    #[arg(short, long)]
    session_folder: Option<PathBuf>,

    /// Pipeline configuration TOML (falls back to MOCAP_CONFIG)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Camera calibration TOML; defaults to `*calibration*.toml` in the session
    #[arg(long, env = "MOCAP_CALIBRATION")]
    calibration: Option<PathBuf>,

    /// Pose detector command line
    #[arg(long, default_value = "detect_pose", env = "MOCAP_DETECTOR_COMMAND")]
    detector_command: String,

    /// ffmpeg executable
    #[arg(long, default_value = "ffmpeg", env = "MOCAP_FFMPEG")]
    ffmpeg: String,

    /// ffprobe executable
    #[arg(long, default_value = "ffprobe", env = "MOCAP_FFPROBE")]
    ffprobe: String,
}

fn init_tracing(config: &PipelineConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &config.logging.level;
        EnvFilter::new(format!("mocap_pipeline={level},mocap_common={level}"))
    });

    let file_layer = match &config.logging.file {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };
    let stderr_layer = file_layer
        .is_none()
        .then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
    Ok(())
}

fn log_event(event: &PipelineEvent) {
    match event {
        PipelineEvent::RunStarted { session_folder, .. } => {
            info!(session_folder = %session_folder, "Run started");
        }
        PipelineEvent::StageSkipped { stage, reused, .. } => {
            info!(stage = %stage, reused = reused.len(), "Stage skipped");
        }
        PipelineEvent::Progress {
            stage,
            current,
            total,
            message,
            ..
        } => {
            info!(stage = %stage, current, total, "{}", message);
        }
        PipelineEvent::QaWarning { stage, message, .. } => {
            tracing::warn!(stage = %stage, "QA: {}", message);
        }
        PipelineEvent::RunFailed { stage, error, .. } => {
            tracing::error!(stage = ?stage, "Run failed: {}", error);
        }
        other => {
            tracing::debug!(event_type = other.event_type(), "Pipeline event");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = PipelineConfig::load_or_default(args.config.as_deref())
        .context("Failed to load pipeline configuration")?;
    config.validate().context("Invalid pipeline configuration")?;

    init_tracing(&config)?;

    info!("Starting mocap-pipeline {}", env!("CARGO_PKG_VERSION"));

    let session_folder = resolve_session_folder(args.session_folder.as_deref())
        .context("Failed to resolve session folder")?;
    if !session_folder.is_dir() {
        anyhow::bail!("Session folder not found: {}", session_folder.display());
    }

    let calibration_path = args
        .calibration
        .clone()
        .or_else(|| calibration::find_in_session(&session_folder));
    match &calibration_path {
        Some(path) => info!(calibration = %path.display(), "Using camera calibration"),
        None => info!("No camera calibration found"),
    }

    let video_io = FfmpegVideoIo::new(args.ffmpeg.clone(), args.ffprobe.clone());
    if !video_io.is_available() {
        tracing::warn!(ffmpeg = %args.ffmpeg, "ffmpeg not found, synchronization will fail");
    }
    let detector = CommandPoseDetector::from_command_line(&args.detector_command)
        .context("Invalid detector command")?;

    let orchestrator = Orchestrator::new(
        Arc::new(video_io),
        Arc::new(detector),
        Arc::new(ButterworthFilter::new()),
    );

    let (progress, mut receiver) = events::progress_channel(config.progress_channel_capacity);
    let ctx = RunContext::new(session_folder, config, calibration_path);

    let cancel_token = CancellationToken::new();
    let signal_token = cancel_token.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, cancelling after the current stage");
            signal_token.cancel();
        }
    });

    let consumer = tokio::spawn(async move {
        while let Some(event) = receiver.recv().await {
            log_event(&event);
            if event.is_terminal() {
                break;
            }
        }
    });

    let run = orchestrator.run(&ctx, &progress, &cancel_token).await;
    drop(progress);
    consumer.await.context("Progress consumer failed")?;

    info!(
        run_id = %run.run_id,
        state = ?run.state,
        elapsed_ms = run.elapsed_ms(),
        summary = %ctx.run_summary_path().display(),
        "Pipeline finished"
    );

    match run.state {
        RunState::Completed => Ok(()),
        RunState::Cancelled => anyhow::bail!("Run cancelled"),
        _ => anyhow::bail!(
            "Run failed: {}",
            run.error.as_deref().unwrap_or("unknown error")
        ),
    }
}
