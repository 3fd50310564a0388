//! Linear (DLT) triangulation from multiple views

use crate::calibration::project_with;
use nalgebra::{DMatrix, Matrix3x4, Vector2, Vector3};

/// Least-squares DLT triangulation
///
/// Each view contributes the rows `u·P₂ − P₀` and `v·P₂ − P₁`; the solution is
/// the right singular vector of the smallest singular value. Returns `None`
/// with fewer than two views or when the homogeneous solution sits at
/// infinity.
pub fn triangulate_point(projections: &[&Matrix3x4<f64>], pixels: &[Vector2<f64>]) -> Option<Vector3<f64>> {
    if projections.len() < 2 || projections.len() != pixels.len() {
        return None;
    }

    let mut a = DMatrix::<f64>::zeros(2 * projections.len(), 4);
    for (i, (p, px)) in projections.iter().zip(pixels).enumerate() {
        let row0 = p.row(0);
        let row1 = p.row(1);
        let row2 = p.row(2);
        a.row_mut(2 * i).copy_from(&(px.x * row2 - row0));
        a.row_mut(2 * i + 1).copy_from(&(px.y * row2 - row1));
    }

    let svd = a.svd(false, true);
    let v_t = svd.v_t?;
    let x_h = v_t.row(v_t.nrows() - 1);

    let w = x_h[3];
    if w.abs() <= f64::EPSILON {
        return None;
    }
    let point = Vector3::new(x_h[0] / w, x_h[1] / w, x_h[2] / w);
    point.iter().all(|v| v.is_finite()).then_some(point)
}

/// Pixel distance between an observation and the projection of `point`
pub fn reprojection_distance(projection: &Matrix3x4<f64>, point: &Vector3<f64>, pixel: &Vector2<f64>) -> f64 {
    (project_with(projection, point) - pixel).norm()
}

/// Mean reprojection distance over the given views
pub fn mean_reprojection_error(
    projections: &[&Matrix3x4<f64>],
    pixels: &[Vector2<f64>],
    point: &Vector3<f64>,
) -> f64 {
    if pixels.is_empty() {
        return f64::NAN;
    }
    let total: f64 = projections
        .iter()
        .zip(pixels)
        .map(|(p, px)| reprojection_distance(p, point, px))
        .sum();
    total / pixels.len() as f64
}
