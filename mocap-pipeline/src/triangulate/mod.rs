//! 2D → 3D reconstruction
//!
//! The `[camera, frame, point, 2]` keypoint array is flattened to one
//! `frame·points + point` axis and every entry is solved on its own:
//! observations are undistorted, NaN cameras dropped, and the remaining rays
//! solved by DLT (or RANSAC over camera pairs). Fewer than two rays leave the
//! point and its error NaN.

pub mod dlt;
pub mod outliers;
pub mod ransac;

use crate::arrays::{Keypoints2D, ReprojectionError, Skeleton3D};
use crate::calibration::CalibrationBundle;
use mocap_common::config::TriangulationConfig;
use mocap_common::{Error, Result};
use nalgebra::{Matrix3x4, Vector2};
use ransac::RansacOptions;
use std::ops::Range;
use std::sync::Arc;

/// Flattened points handed to one blocking worker
const CHUNK_SIZE: usize = 4096;

/// Solver selection
#[derive(Debug, Clone)]
pub struct TriangulationOptions {
    pub use_ransac: bool,
    pub ransac: RansacOptions,
}

impl From<&TriangulationConfig> for TriangulationOptions {
    fn from(config: &TriangulationConfig) -> Self {
        Self {
            use_ransac: config.use_ransac_triangulation,
            ransac: RansacOptions {
                threshold_px: config.ransac_threshold_px,
                max_pairs: config.ransac_max_pairs,
                seed: config.ransac_seed,
            },
        }
    }
}

/// Solution for one flattened index
#[derive(Debug, Clone, Copy)]
struct PointSolution {
    xyz: [f64; 3],
    error: f64,
    /// Valid rays available before solving
    rays: usize,
}

impl PointSolution {
    fn unsolved(rays: usize) -> Self {
        Self {
            xyz: [f64::NAN; 3],
            error: f64::NAN,
            rays,
        }
    }
}

/// Triangulated skeleton with its error array
#[derive(Debug, Clone)]
pub struct TriangulationOutput {
    pub skeleton: Skeleton3D,
    pub error: ReprojectionError,
    /// Points left NaN for lack of two valid rays or a consensus
    pub underdetermined_points: usize,
}

/// Multi-view triangulator bound to one calibration bundle
pub struct Triangulator {
    bundle: CalibrationBundle,
    projections: Vec<Matrix3x4<f64>>,
    options: TriangulationOptions,
}

impl Triangulator {
    pub fn new(bundle: CalibrationBundle, options: TriangulationOptions) -> Self {
        let projections = bundle.projection_matrices();
        Self {
            bundle,
            projections,
            options,
        }
    }

    fn check_cameras(&self, keypoints: &Keypoints2D) -> Result<()> {
        if keypoints.cameras() != self.bundle.len() {
            return Err(Error::ShapeMismatch(format!(
                "2D data has {} cameras, calibration has {}",
                keypoints.cameras(),
                self.bundle.len()
            )));
        }
        Ok(())
    }

    fn solve(&self, keypoints: &Keypoints2D, flat_index: usize) -> PointSolution {
        let mut projections: Vec<&Matrix3x4<f64>> = Vec::with_capacity(self.projections.len());
        let mut pixels: Vec<Vector2<f64>> = Vec::with_capacity(self.projections.len());

        for (camera, (model, projection)) in self.bundle.cameras.iter().zip(&self.projections).enumerate() {
            let [u, v] = keypoints.get_flat(camera, flat_index);
            if u.is_nan() || v.is_nan() {
                continue;
            }
            let (u, v) = model.undistort_pixel(u, v);
            projections.push(projection);
            pixels.push(Vector2::new(u, v));
        }

        let rays = pixels.len();
        if rays < 2 {
            return PointSolution::unsolved(rays);
        }

        let solved = if self.options.use_ransac {
            ransac::triangulate_point(&projections, &pixels, &self.options.ransac, flat_index as u64)
                .map(|consensus| consensus.point)
        } else {
            dlt::triangulate_point(&projections, &pixels)
        };

        // Error covers every valid ray, including those RANSAC rejected
        match solved {
            Some(point) => PointSolution {
                xyz: point.into(),
                error: dlt::mean_reprojection_error(&projections, &pixels, &point),
                rays,
            },
            None => PointSolution::unsolved(rays),
        }
    }

    fn solve_range(&self, keypoints: &Keypoints2D, range: Range<usize>) -> Vec<PointSolution> {
        range.map(|i| self.solve(keypoints, i)).collect()
    }

    fn assemble(
        keypoints: &Keypoints2D,
        solutions: impl IntoIterator<Item = PointSolution>,
    ) -> TriangulationOutput {
        let (frames, points) = (keypoints.frames(), keypoints.points());
        let mut skeleton = Skeleton3D::new_nan(frames, points);
        let mut error = ReprojectionError::new_nan(frames, points);
        let mut underdetermined_points = 0;

        for (i, solution) in solutions.into_iter().enumerate() {
            let (frame, point) = (i / points, i % points);
            if solution.xyz[0].is_nan() {
                underdetermined_points += 1;
                if underdetermined_points == 1 {
                    let condition = Error::UnderDeterminedTriangulation {
                        frame,
                        point,
                        rays: solution.rays,
                    };
                    tracing::debug!(%condition, "First unsolved point");
                }
                continue;
            }
            skeleton.set(frame, point, solution.xyz);
            error.set(frame, point, solution.error);
        }

        if underdetermined_points > 0 {
            tracing::warn!(
                underdetermined_points,
                total_points = frames * points,
                "Points left NaN after triangulation"
            );
        }

        TriangulationOutput {
            skeleton,
            error,
            underdetermined_points,
        }
    }

    /// Triangulate every point on the calling thread
    pub fn triangulate(&self, keypoints: &Keypoints2D) -> Result<TriangulationOutput> {
        self.check_cameras(keypoints)?;
        let total = keypoints.frames() * keypoints.points();
        Ok(Self::assemble(keypoints, self.solve_range(keypoints, 0..total)))
    }

    /// Triangulate in chunks on the blocking pool
    ///
    /// `on_chunk` receives (completed, total) flattened point counts after
    /// each chunk.
    pub async fn triangulate_parallel(
        self: Arc<Self>,
        keypoints: Arc<Keypoints2D>,
        mut on_chunk: impl FnMut(usize, usize),
    ) -> Result<TriangulationOutput> {
        self.check_cameras(&keypoints)?;
        let total = keypoints.frames() * keypoints.points();

        let mut handles = Vec::new();
        for start in (0..total).step_by(CHUNK_SIZE) {
            let range = start..(start + CHUNK_SIZE).min(total);
            let triangulator = Arc::clone(&self);
            let keypoints = Arc::clone(&keypoints);
            handles.push(tokio::task::spawn_blocking(move || {
                triangulator.solve_range(&keypoints, range)
            }));
        }

        let mut solutions = Vec::with_capacity(total);
        for handle in handles {
            let chunk = handle
                .await
                .map_err(|e| Error::Internal(format!("Triangulation worker failed: {}", e)))?;
            solutions.extend(chunk);
            on_chunk(solutions.len(), total);
        }

        Ok(Self::assemble(&keypoints, solutions))
    }
}

/// One-camera fallback: `(x, y, 0)` and zero error for every point
pub fn single_camera_skeleton(keypoints: &Keypoints2D) -> Result<TriangulationOutput> {
    if keypoints.cameras() != 1 {
        return Err(Error::ShapeMismatch(format!(
            "single-camera fallback needs 1 camera, got {}",
            keypoints.cameras()
        )));
    }
    let (frames, points) = (keypoints.frames(), keypoints.points());
    let mut skeleton = Skeleton3D::new_nan(frames, points);
    for frame in 0..frames {
        for point in 0..points {
            let [x, y] = keypoints.get(0, frame, point);
            skeleton.set(frame, point, [x, y, 0.0]);
        }
    }
    Ok(TriangulationOutput {
        skeleton,
        error: ReprojectionError::zeros(frames, points),
        underdetermined_points: 0,
    })
}
