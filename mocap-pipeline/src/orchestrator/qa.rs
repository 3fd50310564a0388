//! Best-effort shape checks between stages
//!
//! A failed check is a warning: it is logged, recorded on the run and sent
//! as `QaWarning`, and the run continues.

use super::Orchestrator;
use crate::arrays::{Keypoints2D, ReprojectionError, Skeleton3D};
use crate::context::RunContext;
use crate::run_state::PipelineRun;
use crate::video::VideoInfo;
use chrono::Utc;
use mocap_common::events::{PipelineEvent, ProgressSender, Stage};

/// Camera count of the 2D data against the synchronized videos
pub(super) fn camera_count(keypoints: &Keypoints2D, videos: &[VideoInfo]) -> Option<String> {
    (keypoints.cameras() != videos.len()).then(|| {
        format!(
            "2D data has {} cameras but {} synchronized videos were found",
            keypoints.cameras(),
            videos.len()
        )
    })
}

/// Frame count of the 2D data against each synchronized video
pub(super) fn frame_counts(keypoints: &Keypoints2D, videos: &[VideoInfo]) -> Vec<String> {
    videos
        .iter()
        .filter(|v| v.frame_count != keypoints.frames() as u64)
        .map(|v| {
            format!(
                "{} has {} frames, 2D data has {}",
                v.path.display(),
                v.frame_count,
                keypoints.frames()
            )
        })
        .collect()
}

/// 3D skeleton against its reprojection error array
pub(super) fn error_shape(skeleton: &Skeleton3D, error: &ReprojectionError) -> Option<String> {
    let skeleton_shape = (skeleton.frames(), skeleton.points());
    let error_shape = (error.frames(), error.points());
    (skeleton_shape != error_shape).then(|| {
        format!(
            "3D data is {:?} (frames, points) but reprojection error is {:?}",
            skeleton_shape, error_shape
        )
    })
}

/// 3D frame and point counts against the 2D data they came from
pub(super) fn skeleton_matches_keypoints(skeleton: &Skeleton3D, keypoints: &Keypoints2D) -> Option<String> {
    let skeleton_shape = (skeleton.frames(), skeleton.points());
    let keypoint_shape = (keypoints.frames(), keypoints.points());
    (skeleton_shape != keypoint_shape).then(|| {
        format!(
            "3D data is {:?} (frames, points) but 2D data is {:?}",
            skeleton_shape, keypoint_shape
        )
    })
}

impl Orchestrator {
    pub(super) fn report_qa(
        &self,
        ctx: &RunContext,
        run: &mut PipelineRun,
        stage: Stage,
        message: String,
        progress: &ProgressSender,
    ) {
        tracing::warn!(run_id = %ctx.run_id, stage = %stage, "QA check failed: {}", message);
        run.add_qa_warning(message.clone());
        progress.emit(PipelineEvent::QaWarning {
            run_id: ctx.run_id,
            stage,
            message,
            timestamp: Utc::now(),
        });
    }
}
