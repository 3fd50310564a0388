//! Coordinate convention change applied once after triangulation
//!
//! `x' = x, y' = z, z' = y`. No sign flip, so applying it twice gives the
//! input back bit for bit.

use crate::arrays::Skeleton3D;

pub fn swap_y_z(xyz: [f64; 3]) -> [f64; 3] {
    [xyz[0], xyz[2], xyz[1]]
}

/// New skeleton in the normalized convention
pub fn normalize(skeleton: &Skeleton3D) -> Skeleton3D {
    skeleton.map_points(swap_y_z)
}
