//! Video container access
//!
//! Decoding and encoding video is delegated to a `VideoIo` collaborator. The
//! shipped `FfmpegVideoIo` drives the `ffprobe` and `ffmpeg` binaries as
//! subprocesses; tests substitute in-memory fakes.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Command;
use walkdir::WalkDir;

/// Video file extensions picked up when scanning a folder
pub const VIDEO_EXTENSIONS: [&str; 4] = ["mp4", "mov", "avi", "mkv"];

/// Container-level facts about one video
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    pub path: PathBuf,
    pub fps: f64,
    pub frame_count: u64,
    pub width: u32,
    pub height: u32,
}

impl VideoInfo {
    pub fn duration_seconds(&self) -> f64 {
        if self.fps > 0.0 {
            self.frame_count as f64 / self.fps
        } else {
            0.0
        }
    }
}

/// Video probing, frame-range extraction and audio muxing
pub trait VideoIo: Send + Sync {
    /// Read frame rate, frame count and resolution
    fn probe(&self, path: &Path) -> Result<VideoInfo>;

    /// Write frames `[start_frame, start_frame + frame_count)` of `source` to
    /// `destination`, selecting frames by index, and probe the result
    fn trim(
        &self,
        source: &Path,
        destination: &Path,
        start_frame: u64,
        frame_count: u64,
    ) -> Result<VideoInfo>;

    /// Replace the audio of `video` with `audio`, keeping its video stream
    fn attach_audio(&self, video: &Path, audio: &Path) -> Result<()>;
}

/// Video files directly inside `folder`, sorted by file name
///
/// Sorting gives a stable camera order across runs.
pub fn discover_videos(folder: &Path) -> Result<Vec<PathBuf>> {
    if !folder.is_dir() {
        bail!("Video folder not found: {}", folder.display());
    }

    let mut videos: Vec<PathBuf> = WalkDir::new(folder)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .and_then(|e| e.to_str())
                .map(|e| VIDEO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                .unwrap_or(false)
        })
        .collect();
    videos.sort();

    tracing::debug!(folder = %folder.display(), videos = videos.len(), "Discovered videos");
    Ok(videos)
}

/// `ffprobe`/`ffmpeg` subprocess adapter
pub struct FfmpegVideoIo {
    ffmpeg: String,
    ffprobe: String,
}

impl Default for FfmpegVideoIo {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    nb_read_packets: Option<String>,
}

impl FfmpegVideoIo {
    pub fn new(ffmpeg: impl Into<String>, ffprobe: impl Into<String>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    /// Check both binaries are on PATH
    pub fn is_available(&self) -> bool {
        Command::new(&self.ffmpeg).arg("-version").output().is_ok()
            && Command::new(&self.ffprobe).arg("-version").output().is_ok()
    }
}

impl VideoIo for FfmpegVideoIo {
    fn probe(&self, path: &Path) -> Result<VideoInfo> {
        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-count_packets",
                "-show_entries",
                "stream=width,height,r_frame_rate,nb_read_packets",
                "-of",
                "json",
            ])
            .arg(path)
            .output()
            .with_context(|| format!("Failed to run {}", self.ffprobe))?;

        if !output.status.success() {
            bail!(
                "ffprobe failed on {} (exit code {:?}): {}",
                path.display(),
                output.status.code(),
                String::from_utf8_lossy(&output.stderr)
            );
        }

        let parsed: ProbeOutput = serde_json::from_slice(&output.stdout)
            .with_context(|| format!("Unreadable ffprobe output for {}", path.display()))?;
        let stream = parsed
            .streams
            .into_iter()
            .next()
            .with_context(|| format!("No video stream in {}", path.display()))?;

        let fps = stream
            .r_frame_rate
            .as_deref()
            .and_then(parse_frame_rate)
            .with_context(|| format!("Unknown frame rate for {}", path.display()))?;
        let frame_count = stream
            .nb_read_packets
            .as_deref()
            .and_then(|n| n.parse::<u64>().ok())
            .with_context(|| format!("Unknown frame count for {}", path.display()))?;

        Ok(VideoInfo {
            path: path.to_path_buf(),
            fps,
            frame_count,
            width: stream.width.unwrap_or(0),
            height: stream.height.unwrap_or(0),
        })
    }

    fn trim(
        &self,
        source: &Path,
        destination: &Path,
        start_frame: u64,
        frame_count: u64,
    ) -> Result<VideoInfo> {
        if frame_count == 0 {
            bail!("Refusing to write an empty video to {}", destination.display());
        }
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let last_frame = start_frame + frame_count - 1;
        let select = format!("select=between(n\\,{}\\,{})", start_frame, last_frame);

        tracing::debug!(
            source = %source.display(),
            destination = %destination.display(),
            start_frame,
            frame_count,
            "Trimming video"
        );

        let output = Command::new(&self.ffmpeg)
            .args(["-y", "-v", "error", "-i"])
            .arg(source)
            .args(["-vf", &select, "-fps_mode", "passthrough", "-an"])
            .arg(destination)
            .output()
            .with_context(|| format!("Failed to run {}", self.ffmpeg))?;

        if !output.status.success() {
            bail!(
                "ffmpeg failed trimming {} (exit code {:?}): {}",
                source.display(),
                output.status.code(),
                String::from_utf8_lossy(&output.stderr)
            );
        }

        self.probe(destination)
    }

    fn attach_audio(&self, video: &Path, audio: &Path) -> Result<()> {
        let file_name = video
            .file_name()
            .with_context(|| format!("Not a video file: {}", video.display()))?;
        // Same folder so the final rename never crosses filesystems
        let muxed = video.with_file_name(format!("muxing_{}", file_name.to_string_lossy()));

        tracing::debug!(video = %video.display(), audio = %audio.display(), "Attaching audio");

        let output = Command::new(&self.ffmpeg)
            .args(["-y", "-v", "error", "-i"])
            .arg(video)
            .arg("-i")
            .arg(audio)
            .args(["-map", "0:v:0", "-map", "1:a:0", "-c:v", "copy", "-c:a", "aac"])
            .arg(&muxed)
            .output()
            .with_context(|| format!("Failed to run {}", self.ffmpeg))?;

        if !output.status.success() {
            let _ = std::fs::remove_file(&muxed);
            bail!(
                "ffmpeg failed attaching {} to {} (exit code {:?}): {}",
                audio.display(),
                video.display(),
                output.status.code(),
                String::from_utf8_lossy(&output.stderr)
            );
        }

        std::fs::rename(&muxed, video)
            .with_context(|| format!("Failed to replace {}", video.display()))?;
        Ok(())
    }
}

/// Parse "30000/1001" or "30" into frames per second
fn parse_frame_rate(rate: &str) -> Option<f64> {
    match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            (den != 0.0).then(|| num / den)
        }
        None => rate.trim().parse().ok(),
    }
}
