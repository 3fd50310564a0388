//! Per-camera 2D detection and keypoint aggregation
//!
//! Detection runs once per camera on the blocking pool, at most
//! `num_cpus::get()` cameras at a time. Once every camera has finished, the
//! per-camera arrays are stacked into `[camera, frame, point, 2]`; differing
//! frame counts abort with `ShapeMismatch`.

pub mod detector;

use crate::arrays::{CameraKeypoints, Keypoints2D};
use crate::schema::{
    BODY_POINT_COUNT, FACE_OFFSET, FACE_POINT_COUNT, HAND_POINT_COUNT, LEFT_HAND_OFFSET,
    RIGHT_HAND_OFFSET, TOTAL_POINT_COUNT,
};
use crate::video::VideoInfo;
use detector::{DetectorSettings, Landmark, LandmarkFrame, PoseDetector};
use futures::stream::{self, StreamExt};
use mocap_common::config::Detection2dConfig;
use mocap_common::{Error, Result};
use std::path::Path;
use std::sync::Arc;

pub use detector::CommandPoseDetector;

/// Write one landmark group into the frame's point range
///
/// Coordinates are scaled to pixels. With a threshold, landmarks whose
/// visibility is below it (or missing) stay NaN.
fn place_group(
    keypoints: &mut CameraKeypoints,
    frame: usize,
    offset: usize,
    capacity: usize,
    group: Option<&Vec<Landmark>>,
    size: (f64, f64),
    visibility_threshold: Option<f64>,
) {
    let Some(group) = group else {
        return;
    };
    for (i, landmark) in group.iter().take(capacity).enumerate() {
        if let Some(threshold) = visibility_threshold {
            if landmark.visibility.map_or(true, |v| v < threshold) {
                continue;
            }
        }
        keypoints.set(frame, offset + i, [landmark.x * size.0, landmark.y * size.1]);
    }
}

/// Pixel keypoints `[frame, point, 2]` for one camera
pub fn frames_to_keypoints(
    frames: &[LandmarkFrame],
    width: u32,
    height: u32,
    body_confidence_threshold: f64,
) -> CameraKeypoints {
    let size = (width as f64, height as f64);
    let mut keypoints = CameraKeypoints::new_nan(frames.len(), TOTAL_POINT_COUNT);
    for (f, frame) in frames.iter().enumerate() {
        place_group(
            &mut keypoints,
            f,
            0,
            BODY_POINT_COUNT,
            frame.body.as_ref(),
            size,
            Some(body_confidence_threshold),
        );
        place_group(&mut keypoints, f, RIGHT_HAND_OFFSET, HAND_POINT_COUNT, frame.right_hand.as_ref(), size, None);
        place_group(&mut keypoints, f, LEFT_HAND_OFFSET, HAND_POINT_COUNT, frame.left_hand.as_ref(), size, None);
        place_group(&mut keypoints, f, FACE_OFFSET, FACE_POINT_COUNT, frame.face.as_ref(), size, None);
    }
    keypoints
}

/// Runs the detector over every camera and stacks the results
pub struct KeypointAggregator {
    detector: Arc<dyn PoseDetector>,
    settings: DetectorSettings,
    body_confidence_threshold: f64,
    max_workers: usize,
}

impl KeypointAggregator {
    pub fn new(
        detector: Arc<dyn PoseDetector>,
        config: &Detection2dConfig,
        annotated_videos_folder: Option<&Path>,
    ) -> Self {
        Self {
            detector,
            settings: DetectorSettings {
                model_complexity: config.model_complexity,
                min_detection_confidence: config.min_detection_confidence,
                min_tracking_confidence: config.min_tracking_confidence,
                annotated_videos_folder: annotated_videos_folder
                    .filter(|_| config.save_annotated_videos)
                    .map(Path::to_path_buf),
            },
            body_confidence_threshold: config.body_confidence_threshold,
            max_workers: num_cpus::get().max(1),
        }
    }

    /// Detect on every video and stack into `[camera, frame, point, 2]`
    ///
    /// `on_camera_done` receives (cameras finished, total cameras).
    pub async fn aggregate(
        &self,
        videos: &[VideoInfo],
        mut on_camera_done: impl FnMut(usize, usize),
    ) -> Result<Keypoints2D> {
        if videos.is_empty() {
            return Err(Error::InvalidInput("no videos to run 2D detection on".into()));
        }
        let total = videos.len();

        let mut finished: Vec<(usize, Result<CameraKeypoints>)> = Vec::with_capacity(total);
        let mut results = stream::iter(videos.iter().cloned().enumerate())
            .map(|(camera, video)| {
                let detector = Arc::clone(&self.detector);
                let settings = self.settings.clone();
                let threshold = self.body_confidence_threshold;

                async move {
                    tracing::info!(camera, video = %video.path.display(), "Running 2D detection");
                    let outcome = tokio::task::spawn_blocking(move || -> Result<CameraKeypoints> {
                        let frames = detector.detect(&video.path, &settings).map_err(|e| {
                            Error::Collaborator(format!(
                                "{} failed on {}: {:#}",
                                detector.name(),
                                video.path.display(),
                                e
                            ))
                        })?;
                        Ok(frames_to_keypoints(&frames, video.width, video.height, threshold))
                    })
                    .await
                    .map_err(|e| Error::Internal(format!("Detection worker failed: {}", e)))
                    .and_then(|r| r);
                    (camera, outcome)
                }
            })
            .buffer_unordered(self.max_workers);

        while let Some((camera, outcome)) = results.next().await {
            finished.push((camera, outcome));
            on_camera_done(finished.len(), total);
        }

        // Barrier: every camera is done; restore camera order
        finished.sort_by_key(|(camera, _)| *camera);
        let per_camera = finished
            .into_iter()
            .map(|(_, outcome)| outcome)
            .collect::<Result<Vec<_>>>()?;

        for (camera, keypoints) in per_camera.iter().enumerate() {
            tracing::debug!(camera, frames = keypoints.frames, "Camera keypoints ready");
        }
        Keypoints2D::from_cameras(per_camera)
    }
}
