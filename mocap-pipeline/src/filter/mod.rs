//! Temporal smoothing boundary
//!
//! The pipeline hands the normalized skeleton to a `TemporalFilter` and only
//! checks that the array coming back has the shape it sent. `ButterworthFilter`
//! is the shipped implementation.

pub mod butterworth;

use crate::arrays::{NumericArray, Skeleton3D};
use mocap_common::config::PostProcessingConfig;
use mocap_common::{Error, Result};
use serde::{Deserialize, Serialize};

pub use butterworth::ButterworthFilter;

/// Parameters handed to the filter collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterParameters {
    /// Frames per second of the skeleton
    pub sampling_rate: f64,
    pub cutoff_frequency: f64,
    pub order: usize,
    /// Longest NaN run (frames) that may be interpolated
    pub max_gap_to_fill: usize,
    /// Reference frame for re-orienting the skeleton, when rotating
    pub find_good_frame: Option<usize>,
    pub rotate_data: bool,
}

impl FilterParameters {
    /// Parameters for a pipeline run; the pipeline never rotates
    pub fn from_config(config: &PostProcessingConfig) -> Self {
        Self {
            sampling_rate: config.framerate,
            cutoff_frequency: config.cutoff_frequency,
            order: config.filter_order,
            max_gap_to_fill: config.max_gap_to_fill,
            find_good_frame: None,
            rotate_data: false,
        }
    }
}

/// Gap filling and smoothing of a 3D skeleton over time
pub trait TemporalFilter: Send + Sync {
    fn name(&self) -> &str;

    fn filter(&self, skeleton: &Skeleton3D, params: &FilterParameters) -> anyhow::Result<Skeleton3D>;
}

/// Run `filter` and reject output whose shape differs from the input
pub fn apply_filter(
    filter: &dyn TemporalFilter,
    skeleton: &Skeleton3D,
    params: &FilterParameters,
) -> Result<Skeleton3D> {
    tracing::info!(
        filter = filter.name(),
        sampling_rate = params.sampling_rate,
        cutoff_frequency = params.cutoff_frequency,
        order = params.order,
        max_gap_to_fill = params.max_gap_to_fill,
        "Filtering skeleton"
    );
    let filtered = filter
        .filter(skeleton, params)
        .map_err(|e| Error::Collaborator(format!("{} filter failed: {:#}", filter.name(), e)))?;

    if filtered.shape() != skeleton.shape() {
        return Err(Error::ShapeMismatch(format!(
            "{} filter returned shape {:?} for input {:?}",
            filter.name(),
            filtered.shape(),
            skeleton.shape()
        )));
    }
    Ok(filtered)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DropsFrame;

    impl TemporalFilter for DropsFrame {
        fn name(&self) -> &str {
            "drops-frame"
        }

        fn filter(&self, skeleton: &Skeleton3D, _params: &FilterParameters) -> anyhow::Result<Skeleton3D> {
            Ok(Skeleton3D::new_nan(skeleton.frames() - 1, skeleton.points()))
        }
    }

    #[test]
    fn test_parameters_never_rotate() {
        let params = FilterParameters::from_config(&PostProcessingConfig::default());
        assert!(!params.rotate_data);
        assert_eq!(params.sampling_rate, 30.0);
        assert_eq!(params.order, 4);
    }

    #[test]
    fn test_shape_change_rejected() {
        let skeleton = Skeleton3D::new_nan(10, 3);
        let params = FilterParameters::from_config(&PostProcessingConfig::default());
        let result = apply_filter(&DropsFrame, &skeleton, &params);
        assert!(matches!(result, Err(Error::ShapeMismatch(_))));
    }
}
