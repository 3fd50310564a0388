//! Frame alignment of independently started cameras
//!
//! Lags are estimated either from the audio tracks (FFT cross-correlation
//! against the first camera) or from one user-marked frame per camera. Both
//! paths then share the same normalization and trimming:
//!
//! 1. `normalized[c] = max(raw) - raw[c]`, so the last camera to start gets 0
//! 2. `window = min_c(duration[c] - normalized[c])`
//! 3. camera `c` keeps frames `[round(normalized[c]·fps), +floor(window·fps))`

pub mod audio;
pub mod correlate;
pub mod debug_record;

use crate::video::{VideoInfo, VideoIo};
use audio::MonoAudio;
use mocap_common::config::SyncMode;
use mocap_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Frame rates closer than this are treated as equal
const FPS_TOLERANCE: f64 = 1e-3;

/// One probed camera recording
#[derive(Debug, Clone)]
pub struct CameraStream {
    /// Camera identifier (video file stem)
    pub id: String,
    pub video: VideoInfo,
    /// Mono audio, present in audio mode
    pub audio: Option<MonoAudio>,
}

/// Per-camera lags in seconds, in camera order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LagEstimate {
    pub camera_ids: Vec<String>,
    /// Offset relative to the reference (first) camera
    pub raw_seconds: Vec<f64>,
    /// Offset after normalization, minimum exactly 0
    pub normalized_seconds: Vec<f64>,
}

impl LagEstimate {
    pub fn from_raw(camera_ids: Vec<String>, raw_seconds: Vec<f64>) -> Self {
        let normalized_seconds = normalize_lags(&raw_seconds);
        Self {
            camera_ids,
            raw_seconds,
            normalized_seconds,
        }
    }

    /// Camera id → normalized lag
    pub fn as_map(&self) -> BTreeMap<String, f64> {
        self.camera_ids
            .iter()
            .cloned()
            .zip(self.normalized_seconds.iter().copied())
            .collect()
    }
}

/// Trim window shared by every camera
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrimPlan {
    pub fps: f64,
    pub start_frames: Vec<u64>,
    pub frame_count: u64,
    pub minimum_duration_seconds: f64,
}

/// Result of aligning a camera set
#[derive(Debug, Clone)]
pub struct AlignmentOutcome {
    pub lags: LagEstimate,
    pub plan: TrimPlan,
    pub synchronized: Vec<VideoInfo>,
}

/// `max(raw) - raw[c]` for every camera
pub fn normalize_lags(raw: &[f64]) -> Vec<f64> {
    let max = raw.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    raw.iter().map(|lag| max - lag).collect()
}

/// Shared frame rate of all cameras, `InvalidInput` when they differ
pub fn common_frame_rate(videos: &[VideoInfo]) -> Result<f64> {
    let first = videos
        .first()
        .ok_or_else(|| Error::InvalidInput("no videos to synchronize".into()))?;
    for video in &videos[1..] {
        if (video.fps - first.fps).abs() > FPS_TOLERANCE {
            return Err(Error::InvalidInput(format!(
                "frame rates differ: {} is {} fps, {} is {} fps",
                first.path.display(),
                first.fps,
                video.path.display(),
                video.fps
            )));
        }
    }
    if !(first.fps > 0.0) {
        return Err(Error::InvalidInput(format!(
            "{} reports a non-positive frame rate",
            first.path.display()
        )));
    }
    Ok(first.fps)
}

/// Raw lags from user-marked sync frames: `(mark[ref] - mark[c]) / fps`
pub fn manual_lags(marks: &[u64], fps: f64) -> Result<Vec<f64>> {
    let reference = *marks
        .first()
        .ok_or_else(|| Error::InvalidInput("no manual sync frames given".into()))?;
    Ok(marks
        .iter()
        .map(|mark| (reference as f64 - *mark as f64) / fps)
        .collect())
}

/// Raw lags from audio cross-correlation against the first camera
///
/// All cameras must carry audio at one shared sample rate.
pub fn audio_lags(audio: &[&MonoAudio]) -> Result<Vec<f64>> {
    let reference = audio
        .first()
        .ok_or_else(|| Error::InvalidInput("no camera audio to correlate".into()))?;

    let mut lags = Vec::with_capacity(audio.len());
    lags.push(0.0);
    for (idx, other) in audio.iter().enumerate().skip(1) {
        if other.sample_rate != reference.sample_rate {
            return Err(Error::InvalidInput(format!(
                "camera {} audio is {} Hz, reference is {} Hz",
                idx, other.sample_rate, reference.sample_rate
            )));
        }
        let lag = correlate::lag_seconds(&reference.samples, &other.samples, reference.sample_rate)?;
        tracing::debug!(camera = idx, lag_seconds = lag, "Audio lag estimated");
        lags.push(lag);
    }
    Ok(lags)
}

/// Bring every camera's audio to the first camera's sample rate
pub fn unify_sample_rates(streams: &[CameraStream]) -> Result<Vec<MonoAudio>> {
    let mut unified = Vec::with_capacity(streams.len());
    let mut target = None;
    for stream in streams {
        let audio = stream.audio.as_ref().ok_or_else(|| Error::NoAudioTrack {
            camera: stream.id.clone(),
        })?;
        let rate = *target.get_or_insert(audio.sample_rate);
        if audio.sample_rate != rate {
            tracing::info!(
                camera = %stream.id,
                from = audio.sample_rate,
                to = rate,
                "Resampling camera audio to the shared rate"
            );
        }
        unified.push(audio::resample(audio, rate)?);
    }
    Ok(unified)
}

/// Common window every camera can supply after dropping its own lead-in
pub fn plan_trim(videos: &[VideoInfo], normalized: &[f64]) -> Result<TrimPlan> {
    if videos.len() != normalized.len() {
        return Err(Error::ShapeMismatch(format!(
            "{} videos but {} lags",
            videos.len(),
            normalized.len()
        )));
    }
    let fps = common_frame_rate(videos)?;

    let minimum_duration_seconds = videos
        .iter()
        .zip(normalized)
        .map(|(video, lag)| video.duration_seconds() - lag)
        .fold(f64::INFINITY, f64::min);

    // Tolerance keeps an exact whole-frame duration from flooring one short
    let frame_count = (minimum_duration_seconds * fps + 1e-6).floor();
    if !(frame_count >= 1.0) {
        return Err(Error::InvalidInput(format!(
            "cameras share no common window (minimum duration {:.3} s)",
            minimum_duration_seconds
        )));
    }

    let start_frames = normalized
        .iter()
        .map(|lag| (lag * fps).round().max(0.0) as u64)
        .collect();

    Ok(TrimPlan {
        fps,
        start_frames,
        frame_count: frame_count as u64,
        minimum_duration_seconds,
    })
}

/// Applies lag estimates to a camera set through a `VideoIo` collaborator
pub struct FrameAligner<'a> {
    video_io: &'a dyn VideoIo,
}

impl<'a> FrameAligner<'a> {
    pub fn new(video_io: &'a dyn VideoIo) -> Self {
        Self { video_io }
    }

    /// Estimate lags for `mode` and trim every camera into `output_folder`
    pub fn align(
        &self,
        streams: &[CameraStream],
        mode: SyncMode,
        manual_frames: &[u64],
        output_folder: &Path,
    ) -> Result<AlignmentOutcome> {
        if streams.is_empty() {
            return Err(Error::InvalidInput("no cameras to synchronize".into()));
        }
        let videos: Vec<VideoInfo> = streams.iter().map(|s| s.video.clone()).collect();
        let fps = common_frame_rate(&videos)?;
        let ids: Vec<String> = streams.iter().map(|s| s.id.clone()).collect();

        let raw = match mode {
            SyncMode::Audio => {
                let unified = unify_sample_rates(streams)?;
                let refs: Vec<&MonoAudio> = unified.iter().collect();
                audio_lags(&refs)?
            }
            SyncMode::Manual => {
                if manual_frames.len() != streams.len() {
                    return Err(Error::InvalidInput(format!(
                        "{} manual sync frames for {} cameras",
                        manual_frames.len(),
                        streams.len()
                    )));
                }
                manual_lags(manual_frames, fps)?
            }
        };

        let lags = LagEstimate::from_raw(ids, raw);
        tracing::info!(lags = ?lags.as_map(), "Normalized camera lags");

        let plan = plan_trim(&videos, &lags.normalized_seconds)?;
        let synchronized = self.apply_trim(streams, &plan, output_folder)?;

        Ok(AlignmentOutcome {
            lags,
            plan,
            synchronized,
        })
    }

    /// Trim every camera to the planned window
    ///
    /// Fails with `ShapeMismatch` if the written videos disagree on frame
    /// count.
    pub fn apply_trim(
        &self,
        streams: &[CameraStream],
        plan: &TrimPlan,
        output_folder: &Path,
    ) -> Result<Vec<VideoInfo>> {
        std::fs::create_dir_all(output_folder)?;

        let mut outputs = Vec::with_capacity(streams.len());
        for (stream, start) in streams.iter().zip(&plan.start_frames) {
            let destination = synchronized_video_path(output_folder, &stream.video.path);
            tracing::info!(
                camera = %stream.id,
                start_frame = start,
                frame_count = plan.frame_count,
                "Trimming camera"
            );
            let written = self
                .video_io
                .trim(&stream.video.path, &destination, *start, plan.frame_count)
                .map_err(|e| Error::Collaborator(format!("{:#}", e)))?;
            outputs.push(written);
        }

        if let Some(first) = outputs.first() {
            if let Some(bad) = outputs.iter().find(|v| v.frame_count != first.frame_count) {
                return Err(Error::ShapeMismatch(format!(
                    "synchronized videos disagree on frame count: {} has {}, {} has {}",
                    first.path.display(),
                    first.frame_count,
                    bad.path.display(),
                    bad.frame_count
                )));
            }
        }

        Ok(outputs)
    }

    /// Write each camera's audio, trimmed to the synchronized window, next
    /// to its synchronized video and mux it into that video
    ///
    /// Streams without audio are skipped. Returns the WAV files written.
    pub fn export_audio(
        &self,
        streams: &[CameraStream],
        outcome: &AlignmentOutcome,
        output_folder: &Path,
    ) -> Result<Vec<PathBuf>> {
        let mut written = Vec::new();
        for ((stream, lag), video) in streams
            .iter()
            .zip(&outcome.lags.normalized_seconds)
            .zip(&outcome.synchronized)
        {
            let Some(track) = &stream.audio else {
                continue;
            };
            let trimmed = track.trimmed(*lag, outcome.plan.minimum_duration_seconds);
            let wav_path = output_folder.join(format!("{}.wav", stream.id));
            audio::write_wav(&wav_path, &trimmed)?;

            self.video_io
                .attach_audio(&video.path, &wav_path)
                .map_err(|e| Error::Collaborator(format!("{:#}", e)))?;
            tracing::debug!(camera = %stream.id, video = %video.path.display(), "Attached trimmed audio");
            written.push(wav_path);
        }
        Ok(written)
    }
}

/// `<folder>/synchronized_<stem>.<ext>` for a raw video path
pub fn synchronized_video_path(folder: &Path, raw: &Path) -> PathBuf {
    let name = raw
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "camera.mp4".to_string());
    folder.join(format!("synchronized_{}", name))
}

/// Camera identifier for a video path
pub fn camera_id(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}
