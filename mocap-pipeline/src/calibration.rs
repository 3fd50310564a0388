//! Camera calibration bundle
//!
//! Reads the anipose-style TOML produced by the calibration step:
//!
//! ```toml
//! [cam_0]
//! name = "cam_0"
//! size = [1280, 720]
//! matrix = [[fx, 0, cx], [0, fy, cy], [0, 0, 1]]
//! distortions = [k1, k2, p1, p2, k3]
//! rotation = [rx, ry, rz]        # Rodrigues vector
//! translation = [tx, ty, tz]
//!
//! [metadata]
//! ```
//!
//! Cameras are ordered by the numeric suffix of their table name.

use mocap_common::{Error, Result};
use nalgebra::{Matrix3, Matrix3x4, Vector2, Vector3, Vector4};
use serde::Deserialize;
use std::path::{Path, PathBuf};

const UNDISTORT_ITERATIONS: usize = 30;

#[derive(Debug, Deserialize)]
struct CameraEntry {
    name: Option<String>,
    size: [f64; 2],
    matrix: [[f64; 3]; 3],
    #[serde(default)]
    distortions: Vec<f64>,
    rotation: [f64; 3],
    translation: [f64; 3],
}

/// Intrinsics and extrinsics of one camera
#[derive(Debug, Clone, PartialEq)]
pub struct CameraModel {
    pub name: String,
    pub image_size: [f64; 2],
    pub intrinsic: Matrix3<f64>,
    /// k1, k2, p1, p2, k3
    pub distortion: [f64; 5],
    pub rotation: Vector3<f64>,
    pub translation: Vector3<f64>,
}

impl CameraModel {
    /// Camera without lens distortion
    pub fn pinhole(
        name: impl Into<String>,
        intrinsic: Matrix3<f64>,
        rotation: Vector3<f64>,
        translation: Vector3<f64>,
    ) -> Self {
        Self {
            name: name.into(),
            image_size: [2.0 * intrinsic[(0, 2)], 2.0 * intrinsic[(1, 2)]],
            intrinsic,
            distortion: [0.0; 5],
            rotation,
            translation,
        }
    }

    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        rodrigues(&self.rotation)
    }

    /// `P = K[R|t]`
    pub fn projection_matrix(&self) -> Matrix3x4<f64> {
        let r = self.rotation_matrix();
        let mut rt = Matrix3x4::zeros();
        rt.fixed_view_mut::<3, 3>(0, 0).copy_from(&r);
        rt.set_column(3, &self.translation);
        self.intrinsic * rt
    }

    fn has_distortion(&self) -> bool {
        self.distortion.iter().any(|c| *c != 0.0)
    }

    /// Project a world point with the full lens model
    ///
    /// Points behind the camera project to NaN.
    pub fn project(&self, world: &Vector3<f64>) -> Vector2<f64> {
        let cam = self.rotation_matrix() * world + self.translation;
        if cam.z <= 0.0 {
            return Vector2::new(f64::NAN, f64::NAN);
        }
        let (x, y) = self.distort(cam.x / cam.z, cam.y / cam.z);
        let k = &self.intrinsic;
        Vector2::new(
            k[(0, 0)] * x + k[(0, 1)] * y + k[(0, 2)],
            k[(1, 1)] * y + k[(1, 2)],
        )
    }

    /// Project a world point with `P` only, ignoring distortion
    pub fn project_ideal(&self, world: &Vector3<f64>) -> Vector2<f64> {
        project_with(&self.projection_matrix(), world)
    }

    fn distort(&self, x: f64, y: f64) -> (f64, f64) {
        let [k1, k2, p1, p2, k3] = self.distortion;
        let r2 = x * x + y * y;
        let radial = 1.0 + k1 * r2 + k2 * r2 * r2 + k3 * r2 * r2 * r2;
        (
            x * radial + 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x),
            y * radial + p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y,
        )
    }

    /// Map an observed (distorted) pixel to the ideal pinhole pixel
    ///
    /// Newton-Raphson inversion of the distortion model; NaN passes through.
    pub fn undistort_pixel(&self, u: f64, v: f64) -> (f64, f64) {
        if !self.has_distortion() || u.is_nan() || v.is_nan() {
            return (u, v);
        }
        let k = &self.intrinsic;
        let (fx, fy, skew, cx, cy) = (k[(0, 0)], k[(1, 1)], k[(0, 1)], k[(0, 2)], k[(1, 2)]);
        let [k1, k2, p1, p2, k3] = self.distortion;

        let yd = (v - cy) / fy;
        let xd = (u - cx - skew * yd) / fx;

        let mut x = xd;
        let mut y = yd;
        let mut best = (x, y);
        let mut best_residual = f64::MAX;

        for _ in 0..UNDISTORT_ITERATIONS {
            let r2 = x * x + y * y;
            let radial = 1.0 + k1 * r2 + k2 * r2 * r2 + k3 * r2 * r2 * r2;
            let dradial = k1 + 2.0 * k2 * r2 + 3.0 * k3 * r2 * r2;

            let (dx, dy) = self.distort(x, y);
            let (ex, ey) = (dx - xd, dy - yd);
            let residual = ex * ex + ey * ey;
            if residual < best_residual {
                best_residual = residual;
                best = (x, y);
            }
            if residual < 1e-24 {
                break;
            }

            let j11 = radial + 2.0 * x * x * dradial + 2.0 * p1 * y + 6.0 * p2 * x;
            let j12 = 2.0 * x * y * dradial + 2.0 * p1 * x + 2.0 * p2 * y;
            let j21 = j12;
            let j22 = radial + 2.0 * y * y * dradial + 6.0 * p1 * y + 2.0 * p2 * x;
            let det = j11 * j22 - j12 * j21;
            if det.abs() < 1e-15 {
                break;
            }
            x -= (j22 * ex - j12 * ey) / det;
            y -= (-j21 * ex + j11 * ey) / det;
        }

        let (x, y) = best;
        (fx * x + skew * y + cx, fy * y + cy)
    }
}

/// Homogeneous projection through a 3×4 matrix
pub fn project_with(p: &Matrix3x4<f64>, world: &Vector3<f64>) -> Vector2<f64> {
    let h = p * Vector4::new(world.x, world.y, world.z, 1.0);
    Vector2::new(h.x / h.z, h.y / h.z)
}

/// Rotation matrix from a Rodrigues vector
pub fn rodrigues(rvec: &Vector3<f64>) -> Matrix3<f64> {
    let theta = rvec.norm();
    if theta < 1e-12 {
        return Matrix3::identity();
    }
    let k = rvec / theta;
    let (kx, ky, kz) = (k.x, k.y, k.z);
    let ct = theta.cos();
    let st = theta.sin();
    let vt = 1.0 - ct;
    Matrix3::new(
        ct + kx * kx * vt,
        kx * ky * vt - kz * st,
        kx * kz * vt + ky * st,
        ky * kx * vt + kz * st,
        ct + ky * ky * vt,
        ky * kz * vt - kx * st,
        kz * kx * vt - ky * st,
        kz * ky * vt + kx * st,
        ct + kz * kz * vt,
    )
}

/// All cameras of one calibrated capture volume, in camera order
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationBundle {
    pub cameras: Vec<CameraModel>,
}

impl CalibrationBundle {
    pub fn new(cameras: Vec<CameraModel>) -> Self {
        Self { cameras }
    }

    pub fn len(&self) -> usize {
        self.cameras.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cameras.is_empty()
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::missing("calibration", path));
        }
        tracing::info!(path = %path.display(), "Loading camera calibration");
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
            .map_err(|e| Error::Calibration(format!("{}: {}", path.display(), e)))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let table: toml::Table = toml::from_str(content)
            .map_err(|e| Error::Calibration(format!("unreadable calibration TOML: {}", e)))?;

        let mut indexed = Vec::new();
        for (key, value) in table {
            let Some(index) = key.strip_prefix("cam_").and_then(|n| n.parse::<usize>().ok())
            else {
                continue;
            };
            let entry: CameraEntry = value
                .try_into()
                .map_err(|e| Error::Calibration(format!("[{}]: {}", key, e)))?;
            indexed.push((index, key, entry));
        }
        if indexed.is_empty() {
            return Err(Error::Calibration("no [cam_N] tables found".into()));
        }
        indexed.sort_by_key(|(index, _, _)| *index);

        let cameras = indexed
            .into_iter()
            .map(|(_, key, entry)| {
                if entry.distortions.len() > 5 {
                    return Err(Error::Calibration(format!(
                        "[{}] has {} distortion coefficients, at most 5 supported",
                        key,
                        entry.distortions.len()
                    )));
                }
                let mut distortion = [0.0; 5];
                distortion[..entry.distortions.len()].copy_from_slice(&entry.distortions);
                let m = entry.matrix;
                Ok(CameraModel {
                    name: entry.name.unwrap_or(key),
                    image_size: entry.size,
                    intrinsic: Matrix3::new(
                        m[0][0], m[0][1], m[0][2], m[1][0], m[1][1], m[1][2], m[2][0], m[2][1],
                        m[2][2],
                    ),
                    distortion,
                    rotation: Vector3::from(entry.rotation),
                    translation: Vector3::from(entry.translation),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { cameras })
    }

    /// Subtract camera 0's translation vector from every camera's
    pub fn pin_camera_0_to_origin(&mut self) {
        let Some(origin) = self.cameras.first().map(|c| c.translation) else {
            return;
        };
        for camera in &mut self.cameras {
            let before = camera.translation;
            camera.translation -= origin;
            tracing::debug!(
                camera = %camera.name,
                before = ?before.as_slice(),
                after = ?camera.translation.as_slice(),
                "Pinned translation to camera 0"
            );
        }
    }

    pub fn projection_matrices(&self) -> Vec<Matrix3x4<f64>> {
        self.cameras.iter().map(CameraModel::projection_matrix).collect()
    }
}

/// First `*calibration*.toml` directly inside the session folder, by name
pub fn find_in_session(session_folder: &Path) -> Option<PathBuf> {
    let mut candidates: Vec<PathBuf> = std::fs::read_dir(session_folder)
        .ok()?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path.extension().and_then(|e| e.to_str()) == Some("toml")
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map_or(false, |n| n.contains("calibration"))
        })
        .collect();
    candidates.sort();
    candidates.into_iter().next()
}

/// Copy the calibration file into the session folder
///
/// Copies only when the session has no file of that name or its bytes
/// differ. Returns the session-local path.
pub fn copy_into_session(source: &Path, session_folder: &Path) -> Result<PathBuf> {
    let file_name = source
        .file_name()
        .ok_or_else(|| Error::InvalidInput(format!("{} is not a file path", source.display())))?;
    let destination = session_folder.join(file_name);
    if destination == source {
        return Ok(destination);
    }

    let needs_copy = if destination.is_file() {
        std::fs::read(&destination)? != std::fs::read(source)?
    } else {
        true
    };

    if needs_copy {
        std::fs::create_dir_all(session_folder)?;
        std::fs::copy(source, &destination)?;
        tracing::info!(
            source = %source.display(),
            destination = %destination.display(),
            "Copied calibration into session"
        );
    }
    Ok(destination)
}
