//! Stage 2: 2D keypoint detection

use super::{qa, Orchestrator};
use crate::arrays::{Keypoints2D, NumericArray};
use crate::context::RunContext;
use crate::detect::KeypointAggregator;
use crate::npy;
use crate::run_state::{PipelineRun, StageOutcome};
use crate::video::VideoInfo;
use mocap_common::events::{ProgressSender, Stage};
use mocap_common::Result;
use std::sync::Arc;

impl Orchestrator {
    /// Stage 2: run the detector on every synchronized video
    pub(super) async fn phase_detect(
        &self,
        ctx: &RunContext,
        run: &mut PipelineRun,
        progress: &ProgressSender,
        videos: &[VideoInfo],
    ) -> Result<(Keypoints2D, StageOutcome)> {
        let raw_2d_path = ctx.raw_2d_path();

        let (keypoints, outcome) = if ctx.config.detection_2d.skip_2d_image_tracking {
            let keypoints: Keypoints2D = npy::load(&raw_2d_path)?;
            self.announce_skip(ctx, Stage::Detect2D, &[raw_2d_path.as_path()], progress);
            (keypoints, StageOutcome::Skipped)
        } else {
            tracing::info!(
                run_id = %ctx.run_id,
                cameras = videos.len(),
                detector = self.detector.name(),
                "Stage 2: Detecting 2D keypoints"
            );

            let annotated_folder = ctx.annotated_videos_folder();
            if ctx.config.detection_2d.save_annotated_videos {
                std::fs::create_dir_all(&annotated_folder)?;
            }
            let aggregator = KeypointAggregator::new(
                Arc::clone(&self.detector),
                &ctx.config.detection_2d,
                Some(&annotated_folder),
            );

            let keypoints = aggregator
                .aggregate(videos, |done, total| {
                    self.emit_progress(
                        ctx,
                        Stage::Detect2D,
                        done,
                        total,
                        format!("Detected keypoints for {}/{} cameras", done, total),
                        progress,
                    );
                })
                .await?;

            npy::save(&raw_2d_path, &keypoints)?;
            (keypoints, StageOutcome::Executed)
        };

        if let Some(message) = qa::camera_count(&keypoints, videos) {
            self.report_qa(ctx, run, Stage::Detect2D, message, progress);
        }
        for message in qa::frame_counts(&keypoints, videos) {
            self.report_qa(ctx, run, Stage::Detect2D, message, progress);
        }

        run.nan_counts
            .insert(Keypoints2D::NAME.to_string(), keypoints.nan_count());
        Ok((keypoints, outcome))
    }
}
