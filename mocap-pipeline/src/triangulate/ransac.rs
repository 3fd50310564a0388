//! Pairwise-hypothesis RANSAC over camera rays
//!
//! Every camera pair proposes a point by DLT. A ray supports the hypothesis
//! when its reprojection error is below the threshold. The largest support
//! set wins (ties go to the lower mean error) and the point is re-solved by
//! DLT on that set alone.

use super::dlt;
use nalgebra::{Matrix3x4, Vector2, Vector3};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Parameters of the consensus search
#[derive(Debug, Clone)]
pub struct RansacOptions {
    /// Inlier reprojection threshold in pixels
    pub threshold_px: f64,
    /// Upper bound on camera pairs evaluated per point
    pub max_pairs: usize,
    /// Seed; combined with the point index so results do not depend on
    /// how points are split across workers
    pub seed: u64,
}

impl Default for RansacOptions {
    fn default() -> Self {
        Self {
            threshold_px: 20.0,
            max_pairs: 64,
            seed: 1_234_567,
        }
    }
}

/// Winning hypothesis after refitting on its inliers
#[derive(Debug, Clone)]
pub struct Consensus {
    pub point: Vector3<f64>,
    /// Indices into the observation slice
    pub inliers: Vec<usize>,
    /// Mean reprojection error over the inliers only
    pub inlier_error: f64,
}

#[derive(Debug)]
struct Hypothesis {
    inliers: Vec<usize>,
    mean_error: f64,
}

impl Hypothesis {
    fn beats(&self, other: &Hypothesis) -> bool {
        self.inliers.len() > other.inliers.len()
            || (self.inliers.len() == other.inliers.len() && self.mean_error < other.mean_error)
    }
}

/// Camera pairs `(i, j)` with `i < j`, subsampled to at most `max_pairs`
fn candidate_pairs(views: usize, max_pairs: usize, rng: &mut StdRng) -> Vec<(usize, usize)> {
    let mut pairs: Vec<(usize, usize)> = (0..views)
        .flat_map(|i| (i + 1..views).map(move |j| (i, j)))
        .collect();
    if pairs.len() > max_pairs {
        pairs.shuffle(rng);
        pairs.truncate(max_pairs);
    }
    pairs
}

/// Robust triangulation of one point
///
/// Returns `None` when no pair reaches a two-ray consensus.
pub fn triangulate_point(
    projections: &[&Matrix3x4<f64>],
    pixels: &[Vector2<f64>],
    options: &RansacOptions,
    point_index: u64,
) -> Option<Consensus> {
    let views = projections.len();
    if views < 2 || views != pixels.len() {
        return None;
    }

    let mut rng = StdRng::seed_from_u64(options.seed.wrapping_add(point_index));
    let mut best: Option<Hypothesis> = None;

    for (i, j) in candidate_pairs(views, options.max_pairs.max(1), &mut rng) {
        let Some(candidate) =
            dlt::triangulate_point(&[projections[i], projections[j]], &[pixels[i], pixels[j]])
        else {
            continue;
        };

        let mut inliers = Vec::new();
        let mut error_sum = 0.0;
        for (k, (p, px)) in projections.iter().zip(pixels).enumerate() {
            let err = dlt::reprojection_distance(p, &candidate, px);
            if err < options.threshold_px {
                inliers.push(k);
                error_sum += err;
            }
        }
        if inliers.len() < 2 {
            continue;
        }

        let hypothesis = Hypothesis {
            mean_error: error_sum / inliers.len() as f64,
            inliers,
        };
        if best.as_ref().map_or(true, |b| hypothesis.beats(b)) {
            best = Some(hypothesis);
        }
    }

    let best = best?;
    let used_p: Vec<&Matrix3x4<f64>> = best.inliers.iter().map(|&k| projections[k]).collect();
    let used_px: Vec<Vector2<f64>> = best.inliers.iter().map(|&k| pixels[k]).collect();
    let point = dlt::triangulate_point(&used_p, &used_px)?;
    let inlier_error = dlt::mean_reprojection_error(&used_p, &used_px, &point);

    Some(Consensus {
        point,
        inliers: best.inliers,
        inlier_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::{project_with, CameraModel};
    use nalgebra::Matrix3;

    fn ring_cameras(n: usize) -> Vec<Matrix3x4<f64>> {
        let k = Matrix3::new(800.0, 0.0, 640.0, 0.0, 800.0, 360.0, 0.0, 0.0, 1.0);
        (0..n)
            .map(|i| {
                let yaw = (i as f64 - (n as f64 - 1.0) / 2.0) * 0.3;
                CameraModel::pinhole(
                    format!("cam_{}", i),
                    k,
                    Vector3::new(0.0, yaw, 0.0),
                    Vector3::new(0.0, 0.0, 3.0),
                )
                .projection_matrix()
            })
            .collect()
    }

    #[test]
    fn test_outlier_ray_rejected() {
        let cameras = ring_cameras(4);
        let refs: Vec<&Matrix3x4<f64>> = cameras.iter().collect();
        let world = Vector3::new(0.1, -0.2, 0.3);
        let mut pixels: Vec<Vector2<f64>> = cameras.iter().map(|p| project_with(p, &world)).collect();
        // Wildly wrong detection on camera 2
        pixels[2] += Vector2::new(250.0, -180.0);

        let consensus = triangulate_point(&refs, &pixels, &RansacOptions::default(), 0).unwrap();
        assert_eq!(consensus.inliers, vec![0, 1, 3]);
        assert!((consensus.point - world).norm() < 1e-6);
        assert!(consensus.inlier_error < 1e-6);
    }

    #[test]
    fn test_same_seed_same_result() {
        let cameras = ring_cameras(6);
        let refs: Vec<&Matrix3x4<f64>> = cameras.iter().collect();
        let world = Vector3::new(-0.3, 0.1, 0.2);
        let pixels: Vec<Vector2<f64>> = cameras
            .iter()
            .enumerate()
            .map(|(i, p)| project_with(p, &world) + Vector2::new(i as f64 * 0.7, -(i as f64) * 0.4))
            .collect();
        let options = RansacOptions {
            max_pairs: 4,
            ..Default::default()
        };

        let a = triangulate_point(&refs, &pixels, &options, 17).unwrap();
        let b = triangulate_point(&refs, &pixels, &options, 17).unwrap();
        assert_eq!(a.inliers, b.inliers);
        assert_eq!(a.point, b.point);
    }
}
