//! Stage 4: Coordinate normalization

use super::Orchestrator;
use crate::arrays::Skeleton3D;
use crate::context::RunContext;
use crate::normalize;

impl Orchestrator {
    /// Stage 4: swap y and z; runs even when triangulation was skipped
    pub(super) fn phase_normalize(&self, ctx: &RunContext, skeleton: &Skeleton3D) -> Skeleton3D {
        tracing::info!(
            run_id = %ctx.run_id,
            frames = skeleton.frames(),
            points = skeleton.points(),
            "Stage 4: Normalizing coordinates"
        );
        normalize::normalize(skeleton)
    }
}
