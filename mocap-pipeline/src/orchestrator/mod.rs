//! Session pipeline orchestrator
//!
//! Drives one recording session through every stage in order, reporting
//! through a bounded progress channel.
//!
//! # Stage Progression
//! SYNC → DETECT_2D → TRIANGULATE_3D → NORMALIZE → FILTER → COMPUTE_COM → PERSIST
//!
//! # Architecture
//! Each stage is handled by a dedicated `phase_*` method in its own module.
//! A skipped stage loads its artifacts from the session folder instead of
//! running; a missing artifact fails the run with `MissingInput`. Normalize
//! and Persist have no skip flag.
//!
//! Cancellation is observed between stages: a stage that has started runs to
//! completion, then the run ends as `Cancelled`.

use crate::context::RunContext;
use crate::detect::detector::PoseDetector;
use crate::filter::TemporalFilter;
use crate::run_state::{PipelineRun, RunState, StageOutcome};
use crate::video::VideoIo;
use chrono::Utc;
use mocap_common::events::{PipelineEvent, ProgressSender, Stage};
use mocap_common::{Error, Result};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

// Phase modules (internal implementation)
mod phase_sync;
mod phase_detect;
mod phase_triangulate;
mod phase_normalize;
mod phase_filter;
mod phase_com;
mod phase_persist;
mod qa;
mod summary;

pub use summary::write_run_summary;

/// Pipeline orchestrator service
///
/// Holds the external collaborators; everything run-specific comes in
/// through the `RunContext`.
pub struct Orchestrator {
    video_io: Arc<dyn VideoIo>,
    detector: Arc<dyn PoseDetector>,
    filter: Arc<dyn TemporalFilter>,
}

impl Orchestrator {
    pub fn new(
        video_io: Arc<dyn VideoIo>,
        detector: Arc<dyn PoseDetector>,
        filter: Arc<dyn TemporalFilter>,
    ) -> Self {
        Self {
            video_io,
            detector,
            filter,
        }
    }

    /// Run every stage for one session
    ///
    /// Never returns an error: the outcome is carried by the returned
    /// `PipelineRun` state and by the terminal event on `progress`.
    pub async fn run(
        &self,
        ctx: &RunContext,
        progress: &ProgressSender,
        cancel_token: &CancellationToken,
    ) -> PipelineRun {
        let mut run = PipelineRun::new(ctx.run_id, ctx.session_folder.display().to_string());

        tracing::info!(
            run_id = %ctx.run_id,
            session_folder = %ctx.session_folder.display(),
            "Starting pipeline run"
        );
        progress.emit(PipelineEvent::RunStarted {
            run_id: ctx.run_id,
            session_folder: run.session_folder.clone(),
            timestamp: Utc::now(),
        });

        let outcome = self.execute(ctx, &mut run, progress, cancel_token).await;

        match outcome {
            Ok(()) => {
                if let Err(e) = run.transition_to(RunState::Completed) {
                    tracing::error!(run_id = %ctx.run_id, error = %e, "State transition failed");
                }
                tracing::info!(
                    run_id = %ctx.run_id,
                    elapsed_ms = run.elapsed_ms(),
                    underdetermined_points = run.underdetermined_points,
                    qa_warnings = run.qa_warnings.len(),
                    "Pipeline run completed"
                );
                progress
                    .emit_terminal(PipelineEvent::RunCompleted {
                        run_id: ctx.run_id,
                        elapsed_ms: run.elapsed_ms(),
                        timestamp: Utc::now(),
                    })
                    .await;
            }
            Err(Error::Cancelled) => {
                let last_stage = run.last_completed_stage();
                if let Err(e) = run.transition_to(RunState::Cancelled) {
                    tracing::error!(run_id = %ctx.run_id, error = %e, "State transition failed");
                }
                tracing::warn!(
                    run_id = %ctx.run_id,
                    last_stage = ?last_stage,
                    "Pipeline run cancelled"
                );
                progress
                    .emit_terminal(PipelineEvent::RunCancelled {
                        run_id: ctx.run_id,
                        last_stage,
                        timestamp: Utc::now(),
                    })
                    .await;
            }
            Err(e) => {
                let stage = run.current_stage();
                let message = e.to_string();
                tracing::error!(
                    run_id = %ctx.run_id,
                    stage = ?stage,
                    error = %message,
                    "Pipeline run failed"
                );
                if let Err(e) = run.fail(message.clone()) {
                    tracing::error!(run_id = %ctx.run_id, error = %e, "State transition failed");
                }
                progress
                    .emit_terminal(PipelineEvent::RunFailed {
                        run_id: ctx.run_id,
                        stage,
                        error: message,
                        timestamp: Utc::now(),
                    })
                    .await;
            }
        }

        if let Err(e) = write_run_summary(&ctx.run_summary_path(), &run) {
            tracing::warn!(run_id = %ctx.run_id, error = %e, "Failed to write run summary");
        }

        run
    }

    async fn execute(
        &self,
        ctx: &RunContext,
        run: &mut PipelineRun,
        progress: &ProgressSender,
        cancel_token: &CancellationToken,
    ) -> Result<()> {
        let started = self.enter_stage(ctx, run, Stage::Sync, progress, cancel_token)?;
        let (videos, outcome) = self.phase_sync(ctx, run, progress).await?;
        self.finish_stage(ctx, run, Stage::Sync, outcome, started, progress);

        let started = self.enter_stage(ctx, run, Stage::Detect2D, progress, cancel_token)?;
        let (keypoints, outcome) = self.phase_detect(ctx, run, progress, &videos).await?;
        self.finish_stage(ctx, run, Stage::Detect2D, outcome, started, progress);

        let started = self.enter_stage(ctx, run, Stage::Triangulate3D, progress, cancel_token)?;
        let (triangulated, outcome) = self.phase_triangulate(ctx, run, progress, keypoints).await?;
        self.finish_stage(ctx, run, Stage::Triangulate3D, outcome, started, progress);

        let started = self.enter_stage(ctx, run, Stage::Normalize, progress, cancel_token)?;
        let normalized = self.phase_normalize(ctx, &triangulated.skeleton);
        self.finish_stage(ctx, run, Stage::Normalize, StageOutcome::Executed, started, progress);

        let started = self.enter_stage(ctx, run, Stage::Filter, progress, cancel_token)?;
        let (filtered, outcome) = self.phase_filter(ctx, run, progress, normalized).await?;
        self.finish_stage(ctx, run, Stage::Filter, outcome, started, progress);

        let started = self.enter_stage(ctx, run, Stage::ComputeCom, progress, cancel_token)?;
        let (com, outcome) = self.phase_com(ctx, run, progress, &filtered).await?;
        self.finish_stage(ctx, run, Stage::ComputeCom, outcome, started, progress);

        let started = self.enter_stage(ctx, run, Stage::Persist, progress, cancel_token)?;
        self.phase_persist(ctx, run, &filtered, &com).await?;
        self.finish_stage(ctx, run, Stage::Persist, StageOutcome::Executed, started, progress);

        Ok(())
    }

    /// Observe cancellation, then move the run into `stage`
    fn enter_stage(
        &self,
        ctx: &RunContext,
        run: &mut PipelineRun,
        stage: Stage,
        progress: &ProgressSender,
        cancel_token: &CancellationToken,
    ) -> Result<Instant> {
        if cancel_token.is_cancelled() {
            tracing::info!(run_id = %ctx.run_id, next_stage = %stage, "Cancellation observed");
            return Err(Error::Cancelled);
        }

        run.transition_to(RunState::Running(stage))?;
        tracing::info!(run_id = %ctx.run_id, stage = %stage, "Stage started");
        progress.emit(PipelineEvent::StageStarted {
            run_id: ctx.run_id,
            stage,
            timestamp: Utc::now(),
        });
        Ok(Instant::now())
    }

    fn finish_stage(
        &self,
        ctx: &RunContext,
        run: &mut PipelineRun,
        stage: Stage,
        outcome: StageOutcome,
        started: Instant,
        progress: &ProgressSender,
    ) {
        let elapsed_ms = started.elapsed().as_millis() as u64;
        run.record_stage(stage, outcome, elapsed_ms);
        tracing::info!(
            run_id = %ctx.run_id,
            stage = %stage,
            outcome = ?outcome,
            elapsed_ms,
            "Stage completed"
        );
        progress.emit(PipelineEvent::StageCompleted {
            run_id: ctx.run_id,
            stage,
            elapsed_ms,
            timestamp: Utc::now(),
        });
    }

    /// Announce a skipped stage and the artifacts it reused
    fn announce_skip(
        &self,
        ctx: &RunContext,
        stage: Stage,
        reused: &[&std::path::Path],
        progress: &ProgressSender,
    ) {
        let reused: Vec<String> = reused.iter().map(|p| p.display().to_string()).collect();
        tracing::info!(run_id = %ctx.run_id, stage = %stage, reused = ?reused, "Stage skipped, loading artifacts");
        progress.emit(PipelineEvent::StageSkipped {
            run_id: ctx.run_id,
            stage,
            reused,
            timestamp: Utc::now(),
        });
    }

    fn emit_progress(
        &self,
        ctx: &RunContext,
        stage: Stage,
        current: usize,
        total: usize,
        message: impl Into<String>,
        progress: &ProgressSender,
    ) {
        progress.emit(PipelineEvent::Progress {
            run_id: ctx.run_id,
            stage,
            current,
            total,
            message: message.into(),
            timestamp: Utc::now(),
        });
    }
}
