//! Reprojection-error outlier removal
//!
//! Points whose reprojection error exceeds `median + k·MAD` over the whole
//! recording are replaced by NaN. Only applied when
//! `triangulation.reprojection_outlier_filter.enabled` is set.

use crate::arrays::{ReprojectionError, Skeleton3D};
use mocap_common::{Error, Result};

/// Statistics of one outlier pass
#[derive(Debug, Clone, PartialEq)]
pub struct OutlierReport {
    pub median: f64,
    pub median_absolute_deviation: f64,
    pub threshold: f64,
    pub removed_points: usize,
}

fn nan_median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    Some(if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    })
}

/// NaN-out every point whose error exceeds `median + k·MAD`
///
/// Returns a new skeleton; the input is untouched. With no finite errors
/// nothing is removed and the report carries NaN statistics.
pub fn remove_high_reprojection_error(
    skeleton: &Skeleton3D,
    error: &ReprojectionError,
    k: f64,
) -> Result<(Skeleton3D, OutlierReport)> {
    if skeleton.frames() != error.frames() || skeleton.points() != error.points() {
        return Err(Error::ShapeMismatch(format!(
            "skeleton is {}x{}, reprojection error is {}x{}",
            skeleton.frames(),
            skeleton.points(),
            error.frames(),
            error.points()
        )));
    }

    let mut finite: Vec<f64> = (0..error.frames())
        .flat_map(|f| (0..error.points()).map(move |p| (f, p)))
        .map(|(f, p)| error.get(f, p))
        .filter(|e| e.is_finite())
        .collect();

    let Some(median) = nan_median(&mut finite) else {
        return Ok((
            skeleton.clone(),
            OutlierReport {
                median: f64::NAN,
                median_absolute_deviation: f64::NAN,
                threshold: f64::NAN,
                removed_points: 0,
            },
        ));
    };
    let mut deviations: Vec<f64> = finite.iter().map(|e| (e - median).abs()).collect();
    let mad = nan_median(&mut deviations).unwrap_or(0.0);
    let threshold = median + k * mad;

    let mut cleaned = skeleton.clone();
    let mut removed_points = 0;
    for frame in 0..error.frames() {
        for point in 0..error.points() {
            if error.get(frame, point) > threshold && !skeleton.get(frame, point)[0].is_nan() {
                cleaned.set(frame, point, [f64::NAN; 3]);
                removed_points += 1;
            }
        }
    }

    tracing::info!(
        median,
        median_absolute_deviation = mad,
        threshold,
        removed_points,
        "Removed points with high reprojection error"
    );

    Ok((
        cleaned,
        OutlierReport {
            median,
            median_absolute_deviation: mad,
            threshold,
            removed_points,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_removes_only_far_outliers() {
        let mut skeleton = Skeleton3D::new_nan(4, 2);
        let mut error = ReprojectionError::zeros(4, 2);
        for f in 0..4 {
            for p in 0..2 {
                skeleton.set(f, p, [f as f64, p as f64, 1.0]);
                error.set(f, p, 2.0 + 0.1 * (f + p) as f64);
            }
        }
        error.set(3, 1, 500.0);

        let (cleaned, report) = remove_high_reprojection_error(&skeleton, &error, 3.0).unwrap();
        assert_eq!(report.removed_points, 1);
        assert!(cleaned.get(3, 1)[0].is_nan());
        assert_eq!(cleaned.get(3, 0), [3.0, 0.0, 1.0]);
        // Input untouched
        assert_eq!(skeleton.get(3, 1), [3.0, 1.0, 1.0]);
    }

    #[test]
    fn test_all_nan_errors_remove_nothing() {
        let skeleton = Skeleton3D::new_nan(2, 2);
        let error = ReprojectionError::new_nan(2, 2);
        let (_, report) = remove_high_reprojection_error(&skeleton, &error, 3.0).unwrap();
        assert_eq!(report.removed_points, 0);
        assert!(report.threshold.is_nan());
    }
}
