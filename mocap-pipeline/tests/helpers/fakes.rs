//! In-memory collaborators
//!
//! `FakeVideoIo` never decodes anything: probing answers from a table keyed
//! by file stem, trimming writes an empty placeholder file and audio muxing
//! is only recorded.

use super::scene::{IMAGE_HEIGHT, IMAGE_WIDTH};
use anyhow::{bail, Result};
use mocap_pipeline::arrays::Skeleton3D;
use mocap_pipeline::detect::detector::{DetectorSettings, LandmarkFrame, PoseDetector};
use mocap_pipeline::filter::{FilterParameters, TemporalFilter};
use mocap_pipeline::schema::BODY_LANDMARK_NAMES;
use mocap_pipeline::video::{VideoInfo, VideoIo};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

pub struct FakeVideoIo {
    pub fps: f64,
    /// Frame count per file stem
    pub frame_counts: HashMap<String, u64>,
    pub default_frame_count: u64,
    pub trims: Mutex<Vec<(String, u64, u64)>>,
    /// (video, audio) file names passed to `attach_audio`
    pub attached_audio: Mutex<Vec<(String, String)>>,
}

impl FakeVideoIo {
    pub fn new(fps: f64, default_frame_count: u64) -> Self {
        Self {
            fps,
            frame_counts: HashMap::new(),
            default_frame_count,
            trims: Mutex::new(Vec::new()),
            attached_audio: Mutex::new(Vec::new()),
        }
    }

    pub fn with_frames(mut self, stem: &str, frames: u64) -> Self {
        self.frame_counts.insert(stem.to_string(), frames);
        self
    }

    fn info(&self, path: &Path, frame_count: u64) -> VideoInfo {
        VideoInfo {
            path: path.to_path_buf(),
            fps: self.fps,
            frame_count,
            width: IMAGE_WIDTH,
            height: IMAGE_HEIGHT,
        }
    }
}

impl VideoIo for FakeVideoIo {
    fn probe(&self, path: &Path) -> Result<VideoInfo> {
        if !path.is_file() {
            bail!("no such video: {}", path.display());
        }
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let frames = self
            .frame_counts
            .get(&stem)
            .copied()
            .unwrap_or(self.default_frame_count);
        Ok(self.info(path, frames))
    }

    fn trim(&self, source: &Path, destination: &Path, start_frame: u64, frame_count: u64) -> Result<VideoInfo> {
        std::fs::write(destination, b"")?;
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        self.trims.lock().unwrap().push((stem, start_frame, frame_count));
        Ok(self.info(destination, frame_count))
    }

    fn attach_audio(&self, video: &Path, audio: &Path) -> Result<()> {
        if !video.is_file() || !audio.is_file() {
            bail!("cannot attach {} to {}", audio.display(), video.display());
        }
        let name = |p: &Path| {
            p.file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default()
        };
        self.attached_audio.lock().unwrap().push((name(video), name(audio)));
        Ok(())
    }
}

/// Detector answering from precomputed landmark frames
///
/// A video is matched to its frames by `cam_<index>` in its file name.
pub struct SceneDetector {
    pub frames: Vec<Vec<LandmarkFrame>>,
    pub calls: AtomicUsize,
    /// Cancelled on the first `detect` call, when set
    pub cancel_on_detect: Option<CancellationToken>,
    /// Reported instead of the standard body landmark names, when set
    pub body_landmark_names: Option<Vec<String>>,
}

impl SceneDetector {
    pub fn new(frames: Vec<Vec<LandmarkFrame>>) -> Self {
        Self {
            frames,
            calls: AtomicUsize::new(0),
            cancel_on_detect: None,
            body_landmark_names: None,
        }
    }
}

impl PoseDetector for SceneDetector {
    fn name(&self) -> &str {
        "scene"
    }

    fn body_landmark_names(&self) -> Vec<String> {
        match &self.body_landmark_names {
            Some(names) => names.clone(),
            None => BODY_LANDMARK_NAMES.iter().map(|n| n.to_string()).collect(),
        }
    }

    fn detect(&self, video: &Path, _settings: &DetectorSettings) -> Result<Vec<LandmarkFrame>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(token) = &self.cancel_on_detect {
            token.cancel();
        }
        let name = video
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        for (camera, frames) in self.frames.iter().enumerate() {
            if name.contains(&format!("cam_{}", camera)) {
                return Ok(frames.clone());
            }
        }
        bail!("no scene frames for {}", name)
    }
}

/// Filter that returns its input
pub struct IdentityFilter;

impl TemporalFilter for IdentityFilter {
    fn name(&self) -> &str {
        "identity"
    }

    fn filter(&self, skeleton: &Skeleton3D, _params: &FilterParameters) -> Result<Skeleton3D> {
        Ok(skeleton.clone())
    }
}
