//! Typed numeric arrays passed between stages
//!
//! Each array is a flat `Vec<f64>` in C order plus its dimensions. Missing
//! values are NaN, never removed, so shapes stay fixed across stages. Stages
//! produce new arrays instead of editing their inputs.

use mocap_common::{Error, Result};

/// Shape-checked conversion to and from a flat buffer
pub trait NumericArray: Sized {
    /// Artifact description used in error messages
    const NAME: &'static str;

    fn shape(&self) -> Vec<usize>;

    fn data(&self) -> &[f64];

    fn from_shape_vec(shape: &[usize], data: Vec<f64>) -> Result<Self>;

    /// Number of NaN entries
    fn nan_count(&self) -> usize {
        self.data().iter().filter(|v| v.is_nan()).count()
    }
}

fn check_shape(name: &str, shape: &[usize], ndim: usize, len: usize) -> Result<()> {
    if shape.len() != ndim {
        return Err(Error::ShapeMismatch(format!(
            "{} expects {} dimensions, got shape {:?}",
            name, ndim, shape
        )));
    }
    let expected: usize = shape.iter().product();
    if expected != len {
        return Err(Error::ShapeMismatch(format!(
            "{} shape {:?} needs {} values, got {}",
            name, shape, expected, len
        )));
    }
    Ok(())
}

/// Aggregated 2D keypoints `[camera, frame, point, 2]` in pixels
#[derive(Debug, Clone, PartialEq)]
pub struct Keypoints2D {
    cameras: usize,
    frames: usize,
    points: usize,
    data: Vec<f64>,
}

impl Keypoints2D {
    pub fn new_nan(cameras: usize, frames: usize, points: usize) -> Self {
        Self {
            cameras,
            frames,
            points,
            data: vec![f64::NAN; cameras * frames * points * 2],
        }
    }

    /// Stack per-camera `[frame, point, 2]` buffers
    ///
    /// Every camera must report the same frame count; anything else would
    /// break indexing downstream.
    pub fn from_cameras(per_camera: Vec<CameraKeypoints>) -> Result<Self> {
        let first = per_camera
            .first()
            .ok_or_else(|| Error::InvalidInput("no camera keypoints to aggregate".into()))?;
        let (frames, points) = (first.frames, first.points);

        let mut data = Vec::with_capacity(per_camera.len() * frames * points * 2);
        for (idx, cam) in per_camera.iter().enumerate() {
            if cam.frames != frames || cam.points != points {
                return Err(Error::ShapeMismatch(format!(
                    "camera {} has {} frames x {} points, camera 0 has {} x {}",
                    idx, cam.frames, cam.points, frames, points
                )));
            }
            data.extend_from_slice(&cam.data);
        }

        Ok(Self {
            cameras: per_camera.len(),
            frames,
            points,
            data,
        })
    }

    pub fn cameras(&self) -> usize {
        self.cameras
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn points(&self) -> usize {
        self.points
    }

    fn offset(&self, camera: usize, frame: usize, point: usize) -> usize {
        ((camera * self.frames + frame) * self.points + point) * 2
    }

    pub fn get(&self, camera: usize, frame: usize, point: usize) -> [f64; 2] {
        let o = self.offset(camera, frame, point);
        [self.data[o], self.data[o + 1]]
    }

    pub fn set(&mut self, camera: usize, frame: usize, point: usize, xy: [f64; 2]) {
        let o = self.offset(camera, frame, point);
        self.data[o] = xy[0];
        self.data[o + 1] = xy[1];
    }

    /// Observation of one flattened (frame·points + point) index
    pub fn get_flat(&self, camera: usize, flat_index: usize) -> [f64; 2] {
        let o = (camera * self.frames * self.points + flat_index) * 2;
        [self.data[o], self.data[o + 1]]
    }
}

impl NumericArray for Keypoints2D {
    const NAME: &'static str = "2D keypoints";

    fn shape(&self) -> Vec<usize> {
        vec![self.cameras, self.frames, self.points, 2]
    }

    fn data(&self) -> &[f64] {
        &self.data
    }

    fn from_shape_vec(shape: &[usize], data: Vec<f64>) -> Result<Self> {
        check_shape(Self::NAME, shape, 4, data.len())?;
        if shape[3] != 2 {
            return Err(Error::ShapeMismatch(format!(
                "{} last axis must be 2 (x, y), got {}",
                Self::NAME,
                shape[3]
            )));
        }
        Ok(Self {
            cameras: shape[0],
            frames: shape[1],
            points: shape[2],
            data,
        })
    }
}

/// One camera's `[frame, point, 2]` keypoints, before aggregation
#[derive(Debug, Clone, PartialEq)]
pub struct CameraKeypoints {
    pub frames: usize,
    pub points: usize,
    pub data: Vec<f64>,
}

impl CameraKeypoints {
    pub fn new_nan(frames: usize, points: usize) -> Self {
        Self {
            frames,
            points,
            data: vec![f64::NAN; frames * points * 2],
        }
    }

    pub fn set(&mut self, frame: usize, point: usize, xy: [f64; 2]) {
        let o = (frame * self.points + point) * 2;
        self.data[o] = xy[0];
        self.data[o + 1] = xy[1];
    }

    pub fn get(&self, frame: usize, point: usize) -> [f64; 2] {
        let o = (frame * self.points + point) * 2;
        [self.data[o], self.data[o + 1]]
    }
}

/// 3D skeleton `[frame, point, 3]`
#[derive(Debug, Clone, PartialEq)]
pub struct Skeleton3D {
    frames: usize,
    points: usize,
    data: Vec<f64>,
}

impl Skeleton3D {
    pub fn new_nan(frames: usize, points: usize) -> Self {
        Self {
            frames,
            points,
            data: vec![f64::NAN; frames * points * 3],
        }
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn points(&self) -> usize {
        self.points
    }

    pub fn get(&self, frame: usize, point: usize) -> [f64; 3] {
        let o = (frame * self.points + point) * 3;
        [self.data[o], self.data[o + 1], self.data[o + 2]]
    }

    pub fn set(&mut self, frame: usize, point: usize, xyz: [f64; 3]) {
        let o = (frame * self.points + point) * 3;
        self.data[o..o + 3].copy_from_slice(&xyz);
    }

    /// Point trajectory along one axis, one value per frame
    pub fn channel(&self, point: usize, axis: usize) -> Vec<f64> {
        (0..self.frames)
            .map(|f| self.data[(f * self.points + point) * 3 + axis])
            .collect()
    }

    pub fn set_channel(&mut self, point: usize, axis: usize, values: &[f64]) {
        for (f, v) in values.iter().enumerate().take(self.frames) {
            self.data[(f * self.points + point) * 3 + axis] = *v;
        }
    }

    /// New array with `f` applied to every point
    pub fn map_points(&self, f: impl Fn([f64; 3]) -> [f64; 3]) -> Self {
        let data = self
            .data
            .chunks_exact(3)
            .flat_map(|c| f([c[0], c[1], c[2]]))
            .collect();
        Self {
            frames: self.frames,
            points: self.points,
            data,
        }
    }
}

impl NumericArray for Skeleton3D {
    const NAME: &'static str = "3D skeleton";

    fn shape(&self) -> Vec<usize> {
        vec![self.frames, self.points, 3]
    }

    fn data(&self) -> &[f64] {
        &self.data
    }

    fn from_shape_vec(shape: &[usize], data: Vec<f64>) -> Result<Self> {
        check_shape(Self::NAME, shape, 3, data.len())?;
        if shape[2] != 3 {
            return Err(Error::ShapeMismatch(format!(
                "{} last axis must be 3 (x, y, z), got {}",
                Self::NAME,
                shape[2]
            )));
        }
        Ok(Self {
            frames: shape[0],
            points: shape[1],
            data,
        })
    }
}

/// Mean reprojection error `[frame, point]` in pixels
#[derive(Debug, Clone, PartialEq)]
pub struct ReprojectionError {
    frames: usize,
    points: usize,
    data: Vec<f64>,
}

impl ReprojectionError {
    pub fn zeros(frames: usize, points: usize) -> Self {
        Self {
            frames,
            points,
            data: vec![0.0; frames * points],
        }
    }

    pub fn new_nan(frames: usize, points: usize) -> Self {
        Self {
            frames,
            points,
            data: vec![f64::NAN; frames * points],
        }
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn points(&self) -> usize {
        self.points
    }

    pub fn get(&self, frame: usize, point: usize) -> f64 {
        self.data[frame * self.points + point]
    }

    pub fn set(&mut self, frame: usize, point: usize, value: f64) {
        self.data[frame * self.points + point] = value;
    }
}

impl NumericArray for ReprojectionError {
    const NAME: &'static str = "reprojection error";

    fn shape(&self) -> Vec<usize> {
        vec![self.frames, self.points]
    }

    fn data(&self) -> &[f64] {
        &self.data
    }

    fn from_shape_vec(shape: &[usize], data: Vec<f64>) -> Result<Self> {
        check_shape(Self::NAME, shape, 2, data.len())?;
        Ok(Self {
            frames: shape[0],
            points: shape[1],
            data,
        })
    }
}

/// Per-segment center of mass `[frame, segment, 3]`
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentCom {
    frames: usize,
    segments: usize,
    data: Vec<f64>,
}

impl SegmentCom {
    pub fn new_nan(frames: usize, segments: usize) -> Self {
        Self {
            frames,
            segments,
            data: vec![f64::NAN; frames * segments * 3],
        }
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn segments(&self) -> usize {
        self.segments
    }

    pub fn get(&self, frame: usize, segment: usize) -> [f64; 3] {
        let o = (frame * self.segments + segment) * 3;
        [self.data[o], self.data[o + 1], self.data[o + 2]]
    }

    pub fn set(&mut self, frame: usize, segment: usize, xyz: [f64; 3]) {
        let o = (frame * self.segments + segment) * 3;
        self.data[o..o + 3].copy_from_slice(&xyz);
    }
}

impl NumericArray for SegmentCom {
    const NAME: &'static str = "segment center of mass";

    fn shape(&self) -> Vec<usize> {
        vec![self.frames, self.segments, 3]
    }

    fn data(&self) -> &[f64] {
        &self.data
    }

    fn from_shape_vec(shape: &[usize], data: Vec<f64>) -> Result<Self> {
        check_shape(Self::NAME, shape, 3, data.len())?;
        if shape[2] != 3 {
            return Err(Error::ShapeMismatch(format!(
                "{} last axis must be 3, got {}",
                Self::NAME,
                shape[2]
            )));
        }
        Ok(Self {
            frames: shape[0],
            segments: shape[1],
            data,
        })
    }
}

/// Whole-body center of mass `[frame, 3]`
#[derive(Debug, Clone, PartialEq)]
pub struct WholeBodyCom {
    frames: usize,
    data: Vec<f64>,
}

impl WholeBodyCom {
    pub fn new_nan(frames: usize) -> Self {
        Self {
            frames,
            data: vec![f64::NAN; frames * 3],
        }
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn get(&self, frame: usize) -> [f64; 3] {
        let o = frame * 3;
        [self.data[o], self.data[o + 1], self.data[o + 2]]
    }

    pub fn set(&mut self, frame: usize, xyz: [f64; 3]) {
        let o = frame * 3;
        self.data[o..o + 3].copy_from_slice(&xyz);
    }
}

impl NumericArray for WholeBodyCom {
    const NAME: &'static str = "whole-body center of mass";

    fn shape(&self) -> Vec<usize> {
        vec![self.frames, 3]
    }

    fn data(&self) -> &[f64] {
        &self.data
    }

    fn from_shape_vec(shape: &[usize], data: Vec<f64>) -> Result<Self> {
        check_shape(Self::NAME, shape, 2, data.len())?;
        if shape[1] != 3 {
            return Err(Error::ShapeMismatch(format!(
                "{} last axis must be 3, got {}",
                Self::NAME,
                shape[1]
            )));
        }
        Ok(Self {
            frames: shape[0],
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypoints_indexing_is_c_order() {
        let mut kp = Keypoints2D::new_nan(2, 3, 4);
        kp.set(1, 2, 3, [10.0, 20.0]);
        assert_eq!(kp.get(1, 2, 3), [10.0, 20.0]);
        // Last element of the buffer
        let data = kp.data();
        assert_eq!(data[data.len() - 2], 10.0);
        assert_eq!(kp.get_flat(1, 2 * 4 + 3), [10.0, 20.0]);
    }

    #[test]
    fn test_from_cameras_rejects_frame_mismatch() {
        let a = CameraKeypoints::new_nan(10, 5);
        let b = CameraKeypoints::new_nan(9, 5);
        let result = Keypoints2D::from_cameras(vec![a, b]);
        assert!(matches!(result, Err(Error::ShapeMismatch(_))));
    }

    #[test]
    fn test_from_cameras_stacks_in_order() {
        let mut a = CameraKeypoints::new_nan(2, 1);
        let mut b = CameraKeypoints::new_nan(2, 1);
        a.set(1, 0, [1.0, 2.0]);
        b.set(1, 0, [3.0, 4.0]);
        let kp = Keypoints2D::from_cameras(vec![a, b]).unwrap();
        assert_eq!(kp.shape(), vec![2, 2, 1, 2]);
        assert_eq!(kp.get(0, 1, 0), [1.0, 2.0]);
        assert_eq!(kp.get(1, 1, 0), [3.0, 4.0]);
    }

    #[test]
    fn test_shape_validation() {
        assert!(Skeleton3D::from_shape_vec(&[2, 2, 3], vec![0.0; 12]).is_ok());
        assert!(Skeleton3D::from_shape_vec(&[2, 2, 3], vec![0.0; 11]).is_err());
        assert!(Skeleton3D::from_shape_vec(&[2, 3, 2], vec![0.0; 12]).is_err());
        assert!(ReprojectionError::from_shape_vec(&[4], vec![0.0; 4]).is_err());
    }

    #[test]
    fn test_channel_round_trip() {
        let mut skel = Skeleton3D::new_nan(4, 2);
        skel.set_channel(1, 2, &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(skel.channel(1, 2), vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(skel.get(2, 1)[2], 3.0);
        assert!(skel.get(2, 0)[2].is_nan());
    }

    #[test]
    fn test_nan_count() {
        let mut err = ReprojectionError::new_nan(2, 2);
        err.set(0, 0, 1.5);
        assert_eq!(err.nan_count(), 3);
    }
}
