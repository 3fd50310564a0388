//! Stage 7: Persist final artifacts

use super::Orchestrator;
use crate::arrays::Skeleton3D;
use crate::com::lengths;
use crate::com::{segments, ComResult};
use crate::context::RunContext;
use crate::export;
use crate::npy;
use crate::run_state::PipelineRun;
use crate::schema::{SkeletonSchema, BODY_POINT_COUNT};
use mocap_common::Result;

impl Orchestrator {
    /// Stage 7: write the filtered skeleton, center of mass and schema files
    ///
    /// The run summary is written by `run` once the final state is known.
    pub(super) async fn phase_persist(
        &self,
        ctx: &RunContext,
        run: &PipelineRun,
        filtered: &Skeleton3D,
        com: &ComResult,
    ) -> Result<()> {
        tracing::info!(
            run_id = %ctx.run_id,
            output_folder = %ctx.output_data_folder().display(),
            "Stage 7: Persisting results"
        );

        npy::save(&ctx.filtered_3d_path(), filtered)?;
        npy::save(&ctx.segment_com_path(), &com.segment)?;
        npy::save(&ctx.total_body_com_path(), &com.whole_body)?;

        SkeletonSchema::new(segments::virtual_markers()).write(&ctx.names_and_connections_path())?;

        if filtered.points() >= BODY_POINT_COUNT {
            let engine = self.com_engine(ctx)?;
            let segment_lengths = lengths::estimate_segment_lengths(&engine, filtered);
            lengths::write_segment_lengths(&ctx.segment_lengths_path(), &segment_lengths)?;
        } else {
            tracing::warn!(
                run_id = %ctx.run_id,
                points = filtered.points(),
                "Skeleton lacks body landmarks, segment lengths not written"
            );
        }

        let tables = export::write_landmark_csvs(ctx, filtered)?;
        tracing::info!(run_id = %ctx.run_id, tables = tables.len(), "Wrote landmark tables");

        tracing::info!(
            run_id = %ctx.run_id,
            nan_counts = ?run.nan_counts,
            "Results persisted"
        );
        Ok(())
    }
}
