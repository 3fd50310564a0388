//! Stage 3: 3D triangulation

use super::{qa, Orchestrator};
use crate::arrays::{Keypoints2D, NumericArray, ReprojectionError, Skeleton3D};
use crate::calibration::{self, CalibrationBundle};
use crate::context::RunContext;
use crate::npy;
use crate::run_state::{PipelineRun, StageOutcome};
use crate::triangulate::outliers;
use crate::triangulate::{self, TriangulationOptions, TriangulationOutput, Triangulator};
use mocap_common::events::{ProgressSender, Stage};
use mocap_common::{Error, Result};
use std::sync::Arc;

impl Orchestrator {
    /// Stage 3: lift 2D keypoints to a 3D skeleton
    ///
    /// A single camera takes the planar fallback whatever the skip flag says.
    pub(super) async fn phase_triangulate(
        &self,
        ctx: &RunContext,
        run: &mut PipelineRun,
        progress: &ProgressSender,
        keypoints: Keypoints2D,
    ) -> Result<(TriangulationOutput, StageOutcome)> {
        let config = &ctx.config.triangulation;
        let raw_3d_path = ctx.raw_3d_path();
        let error_path = ctx.reprojection_error_path();
        let keypoints = Arc::new(keypoints);

        if keypoints.cameras() == 1 {
            tracing::warn!(
                run_id = %ctx.run_id,
                "Only one camera, using 2D coordinates with z = 0 in place of triangulation"
            );
            let output = triangulate::single_camera_skeleton(&keypoints)?;
            npy::save(&raw_3d_path, &output.skeleton)?;
            npy::save(&error_path, &output.error)?;
            run.nan_counts
                .insert("raw 3D skeleton".to_string(), output.skeleton.nan_count());
            return Ok((output, StageOutcome::Executed));
        }

        let (mut output, outcome) = if config.skip_3d_triangulation {
            let skeleton: Skeleton3D = npy::load(&raw_3d_path)?;
            let error: ReprojectionError = npy::load(&error_path)?;
            self.announce_skip(
                ctx,
                Stage::Triangulate3D,
                &[raw_3d_path.as_path(), error_path.as_path()],
                progress,
            );
            let underdetermined_points = skeleton.nan_count() / 3;
            (
                TriangulationOutput {
                    skeleton,
                    error,
                    underdetermined_points,
                },
                StageOutcome::Skipped,
            )
        } else {
            let calibration_path = ctx
                .calibration_path
                .clone()
                .ok_or_else(|| Error::missing("camera calibration for session", ctx.session_folder.clone()))?;
            let mut bundle = CalibrationBundle::load(&calibration_path)?;
            calibration::copy_into_session(&calibration_path, &ctx.session_folder)?;
            if config.pin_camera_0_to_origin {
                bundle.pin_camera_0_to_origin();
            }

            tracing::info!(
                run_id = %ctx.run_id,
                cameras = keypoints.cameras(),
                frames = keypoints.frames(),
                points = keypoints.points(),
                ransac = config.use_ransac_triangulation,
                "Stage 3: Triangulating 3D points"
            );

            let triangulator = Arc::new(Triangulator::new(bundle, TriangulationOptions::from(config)));
            let output = triangulator
                .triangulate_parallel(Arc::clone(&keypoints), |done, total| {
                    self.emit_progress(
                        ctx,
                        Stage::Triangulate3D,
                        done,
                        total,
                        format!("Triangulated {}/{} points", done, total),
                        progress,
                    );
                })
                .await?;

            npy::save(&raw_3d_path, &output.skeleton)?;
            npy::save(&error_path, &output.error)?;
            (output, StageOutcome::Executed)
        };

        if let Some(message) = qa::error_shape(&output.skeleton, &output.error) {
            self.report_qa(ctx, run, Stage::Triangulate3D, message, progress);
        }
        if let Some(message) = qa::skeleton_matches_keypoints(&output.skeleton, &keypoints) {
            self.report_qa(ctx, run, Stage::Triangulate3D, message, progress);
        }

        let outlier_filter = &config.reprojection_outlier_filter;
        if outlier_filter.enabled {
            let body_confidence_threshold = ctx.config.detection_2d.body_confidence_threshold;
            if body_confidence_threshold > 0.0 {
                tracing::warn!(
                    run_id = %ctx.run_id,
                    body_confidence_threshold,
                    "Reprojection outlier filter enabled alongside 2D confidence thresholding, points may be removed twice"
                );
            }
            let (filtered, report) =
                outliers::remove_high_reprojection_error(&output.skeleton, &output.error, outlier_filter.k)?;
            tracing::info!(
                run_id = %ctx.run_id,
                median = report.median,
                mad = report.median_absolute_deviation,
                threshold = report.threshold,
                removed_points = report.removed_points,
                "Removed high reprojection error points"
            );
            output.skeleton = filtered;
        }

        run.underdetermined_points = output.underdetermined_points;
        run.nan_counts
            .insert("raw 3D skeleton".to_string(), output.skeleton.nan_count());
        Ok((output, outcome))
    }
}
