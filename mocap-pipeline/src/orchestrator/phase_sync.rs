//! Stage 1: Synchronization
//!
//! Probe raw videos, estimate per-camera lags, trim every camera to a
//! common window and record what was done in `synchronization_debug.toml`.

use super::Orchestrator;
use crate::context::RunContext;
use crate::run_state::{PipelineRun, StageOutcome};
use crate::sync::audio::{self, MonoAudio};
use crate::sync::debug_record::{AudioRecord, SyncDebugRecord, VideoRecord};
use crate::sync::{self, AlignmentOutcome, CameraStream, FrameAligner};
use crate::video::{self, VideoInfo, VideoIo};
use mocap_common::config::{SyncMode, SynchronizationConfig};
use mocap_common::events::{ProgressSender, Stage};
use mocap_common::{Error, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Probe every video in `folder`, in file-name order
fn probe_folder(video_io: &dyn VideoIo, folder: &Path) -> Result<Vec<VideoInfo>> {
    let paths = video::discover_videos(folder).map_err(|e| Error::InvalidInput(format!("{:#}", e)))?;
    paths
        .iter()
        .map(|path| {
            video_io
                .probe(path)
                .map_err(|e| Error::Collaborator(format!("{:#}", e)))
        })
        .collect()
}

fn mode_name(mode: SyncMode) -> &'static str {
    match mode {
        SyncMode::Audio => "audio",
        SyncMode::Manual => "manual",
    }
}

/// Blocking body of the stage: probe, decode, align, export, mux
fn synchronize(
    video_io: &dyn VideoIo,
    config: &SynchronizationConfig,
    raw_folder: &Path,
    output_folder: &Path,
    debug_path: &Path,
) -> Result<AlignmentOutcome> {
    let raw = probe_folder(video_io, raw_folder)?;
    if raw.is_empty() {
        return Err(Error::InvalidInput(format!(
            "no videos found in {}",
            raw_folder.display()
        )));
    }
    tracing::info!(cameras = raw.len(), folder = %raw_folder.display(), "Found raw videos");

    let mut streams = raw
        .into_iter()
        .map(|video| {
            let id = sync::camera_id(&video.path);
            let audio = match config.mode {
                SyncMode::Audio => Some(audio::extract_mono_audio(&video.path, &id)?),
                SyncMode::Manual => None,
            };
            Ok(CameraStream { id, video, audio })
        })
        .collect::<Result<Vec<_>>>()?;

    // Bring audio to one rate up front; exported WAVs use the same rate
    let unified: Vec<MonoAudio> = match config.mode {
        SyncMode::Audio => sync::unify_sample_rates(&streams)?,
        SyncMode::Manual => Vec::new(),
    };
    for (stream, audio) in streams.iter_mut().zip(&unified) {
        stream.audio = Some(audio.clone());
    }

    let aligner = FrameAligner::new(video_io);
    let outcome = aligner.align(
        &streams,
        config.mode,
        &config.manual_frames,
        output_folder,
    )?;

    if config.export_trimmed_audio {
        let written = aligner.export_audio(&streams, &outcome, output_folder)?;
        tracing::info!(files = written.len(), "Exported trimmed audio into synchronized videos");
    }

    let record = SyncDebugRecord {
        mode: mode_name(config.mode).to_string(),
        reference_camera: streams.first().map(|s| s.id.clone()).unwrap_or_default(),
        raw_video_information: streams
            .iter()
            .map(|s| (s.id.clone(), VideoRecord::from(&s.video)))
            .collect(),
        synchronized_video_information: streams
            .iter()
            .zip(&outcome.synchronized)
            .map(|(s, v)| (s.id.clone(), VideoRecord::from(v)))
            .collect(),
        audio_information: AudioRecord {
            sample_rate: unified.first().map(|a| a.sample_rate),
            durations_seconds: streams
                .iter()
                .zip(&unified)
                .map(|(s, a)| (s.id.clone(), a.duration_seconds()))
                .collect::<BTreeMap<_, _>>(),
        },
        lag_dictionary: outcome.lags.as_map(),
    };
    record.write(debug_path)?;

    Ok(outcome)
}

impl Orchestrator {
    /// Stage 1: produce the synchronized video set
    pub(super) async fn phase_sync(
        &self,
        ctx: &RunContext,
        run: &mut PipelineRun,
        progress: &ProgressSender,
    ) -> Result<(Vec<VideoInfo>, StageOutcome)> {
        let output_folder = ctx.synchronized_videos_folder();
        let video_io = Arc::clone(&self.video_io);

        if ctx.config.synchronization.skip_synchronization {
            let folder = output_folder.clone();
            let videos = tokio::task::spawn_blocking(move || -> Result<Vec<VideoInfo>> {
                if !folder.is_dir() {
                    return Ok(Vec::new());
                }
                probe_folder(video_io.as_ref(), &folder)
            })
            .await
            .map_err(|e| Error::Internal(format!("Sync worker failed: {}", e)))??;

            if videos.is_empty() {
                return Err(Error::missing("synchronized videos", output_folder));
            }
            let reused: Vec<&Path> = videos.iter().map(|v| v.path.as_path()).collect();
            self.announce_skip(ctx, Stage::Sync, &reused, progress);
            return Ok((videos, StageOutcome::Skipped));
        }

        let raw_folder = ctx.raw_videos_folder();
        if !raw_folder.is_dir() {
            return Err(Error::missing("raw videos folder", raw_folder));
        }

        tracing::info!(
            run_id = %ctx.run_id,
            mode = mode_name(ctx.config.synchronization.mode),
            raw_folder = %raw_folder.display(),
            "Stage 1: Synchronizing cameras"
        );

        let config = ctx.config.synchronization.clone();
        let debug_path: PathBuf = ctx.synchronization_debug_path();
        let outcome = tokio::task::spawn_blocking(move || {
            synchronize(video_io.as_ref(), &config, &raw_folder, &output_folder, &debug_path)
        })
        .await
        .map_err(|e| Error::Internal(format!("Sync worker failed: {}", e)))??;

        run.lag_seconds = outcome.lags.as_map();
        let cameras = outcome.synchronized.len();
        self.emit_progress(
            ctx,
            Stage::Sync,
            cameras,
            cameras,
            format!(
                "Synchronized {} cameras to {} frames",
                cameras, outcome.plan.frame_count
            ),
            progress,
        );

        Ok((outcome.synchronized, StageOutcome::Executed))
    }
}
