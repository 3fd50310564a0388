//! Stage 5: Gap filling and temporal smoothing

use super::Orchestrator;
use crate::arrays::{NumericArray, Skeleton3D};
use crate::context::RunContext;
use crate::filter::{self, FilterParameters};
use crate::npy;
use crate::run_state::{PipelineRun, StageOutcome};
use mocap_common::events::{ProgressSender, Stage};
use mocap_common::{Error, Result};
use std::sync::Arc;

impl Orchestrator {
    /// Stage 5: hand the normalized skeleton to the temporal filter
    ///
    /// Skipping loads a previously persisted filtered skeleton.
    pub(super) async fn phase_filter(
        &self,
        ctx: &RunContext,
        run: &mut PipelineRun,
        progress: &ProgressSender,
        normalized: Skeleton3D,
    ) -> Result<(Skeleton3D, StageOutcome)> {
        let filtered_path = ctx.filtered_3d_path();

        if ctx.config.post_processing.skip_filter {
            let filtered: Skeleton3D = npy::load(&filtered_path)?;
            self.announce_skip(ctx, Stage::Filter, &[filtered_path.as_path()], progress);
            run.nan_counts
                .insert("filtered 3D skeleton".to_string(), filtered.nan_count());
            return Ok((filtered, StageOutcome::Skipped));
        }

        tracing::info!(run_id = %ctx.run_id, filter = self.filter.name(), "Stage 5: Filtering skeleton");

        let params = FilterParameters::from_config(&ctx.config.post_processing);
        let temporal_filter = Arc::clone(&self.filter);
        let filtered = tokio::task::spawn_blocking(move || {
            filter::apply_filter(temporal_filter.as_ref(), &normalized, &params)
        })
        .await
        .map_err(|e| Error::Internal(format!("Filter worker failed: {}", e)))??;

        run.nan_counts
            .insert("filtered 3D skeleton".to_string(), filtered.nan_count());
        Ok((filtered, StageOutcome::Executed))
    }
}
