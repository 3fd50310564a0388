//! Stage 6: Center of mass

use super::Orchestrator;
use crate::arrays::{NumericArray, SegmentCom, Skeleton3D, WholeBodyCom};
use crate::com::{segments, ComEngine, ComResult};
use crate::context::RunContext;
use crate::npy;
use crate::run_state::{PipelineRun, StageOutcome};
use mocap_common::events::{ProgressSender, Stage};
use mocap_common::{Error, Result};

impl Orchestrator {
    /// Segment table bound to the body landmark names the detector reports
    ///
    /// Fails with `SchemaMismatch` when the detector's landmark order differs
    /// from the one the segment table is written against.
    pub(super) fn com_engine(&self, ctx: &RunContext) -> Result<ComEngine> {
        let names = self.detector.body_landmark_names();
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        ComEngine::new(&names).map_err(|e| {
            tracing::error!(
                run_id = %ctx.run_id,
                detector = self.detector.name(),
                error = %e,
                "Detector landmark schema does not match the segment table"
            );
            e
        })
    }

    /// Stage 6: segment and whole-body center of mass
    pub(super) async fn phase_com(
        &self,
        ctx: &RunContext,
        run: &mut PipelineRun,
        progress: &ProgressSender,
        skeleton: &Skeleton3D,
    ) -> Result<(ComResult, StageOutcome)> {
        let segment_path = ctx.segment_com_path();
        let whole_body_path = ctx.total_body_com_path();

        let (com, outcome) = if ctx.config.center_of_mass.skip_center_of_mass {
            let segment: SegmentCom = npy::load(&segment_path)?;
            let whole_body: WholeBodyCom = npy::load(&whole_body_path)?;
            self.announce_skip(
                ctx,
                Stage::ComputeCom,
                &[segment_path.as_path(), whole_body_path.as_path()],
                progress,
            );
            (ComResult { segment, whole_body }, StageOutcome::Skipped)
        } else {
            tracing::info!(
                run_id = %ctx.run_id,
                segments = segments::SEGMENTS.len(),
                "Stage 6: Computing center of mass"
            );
            let engine = self.com_engine(ctx)?;
            let skeleton = skeleton.clone();
            let com = tokio::task::spawn_blocking(move || engine.compute(&skeleton))
                .await
                .map_err(|e| Error::Internal(format!("Center of mass worker failed: {}", e)))??;
            (com, StageOutcome::Executed)
        };

        run.nan_counts
            .insert(WholeBodyCom::NAME.to_string(), com.whole_body.nan_count());
        Ok((com, outcome))
    }
}
