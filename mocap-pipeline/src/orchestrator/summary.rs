//! Run summary JSON

use crate::run_state::PipelineRun;
use mocap_common::Result;
use std::path::Path;

/// Write the final run record as pretty JSON
///
/// Written for every terminal state, so a failed or cancelled run leaves a
/// record of how far it got.
pub fn write_run_summary(path: &Path, run: &PipelineRun) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(run)?)?;
    tracing::debug!(path = %path.display(), "Wrote run summary");
    Ok(())
}
