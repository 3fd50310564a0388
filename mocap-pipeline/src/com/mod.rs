//! Segment and whole-body center of mass

pub mod lengths;
pub mod segments;

use crate::arrays::{SegmentCom, Skeleton3D, WholeBodyCom};
use crate::schema::BODY_POINT_COUNT;
use mocap_common::{Error, Result};
use segments::ResolvedSegment;

/// Center-of-mass arrays for one skeleton
#[derive(Debug, Clone)]
pub struct ComResult {
    pub segment: SegmentCom,
    pub whole_body: WholeBodyCom,
}

/// Segment table bound to a validated landmark schema
#[derive(Debug, Clone)]
pub struct ComEngine {
    segments: Vec<ResolvedSegment>,
}

impl ComEngine {
    /// Fails with `SchemaMismatch` unless `landmark_names` lists the
    /// expected body landmarks in order
    pub fn new(landmark_names: &[&str]) -> Result<Self> {
        Ok(Self {
            segments: segments::resolve_segments(landmark_names)?,
        })
    }

    pub fn segments(&self) -> &[ResolvedSegment] {
        &self.segments
    }

    fn check_skeleton(skeleton: &Skeleton3D) -> Result<()> {
        if skeleton.points() < BODY_POINT_COUNT {
            return Err(Error::ShapeMismatch(format!(
                "skeleton has {} points, body landmarks need {}",
                skeleton.points(),
                BODY_POINT_COUNT
            )));
        }
        Ok(())
    }

    /// `proximal + com_fraction · (distal − proximal)` per segment and frame
    pub fn segment_com(&self, skeleton: &Skeleton3D) -> Result<SegmentCom> {
        Self::check_skeleton(skeleton)?;
        let mut out = SegmentCom::new_nan(skeleton.frames(), self.segments.len());
        for frame in 0..skeleton.frames() {
            let point = |index: usize| skeleton.get(frame, index);
            for (s, segment) in self.segments.iter().enumerate() {
                let proximal = segment.proximal.evaluate(point);
                let distal = segment.distal.evaluate(point);
                let mut com = [0.0; 3];
                for axis in 0..3 {
                    com[axis] = proximal[axis] + segment.com_fraction * (distal[axis] - proximal[axis]);
                }
                out.set(frame, s, com);
            }
        }
        Ok(out)
    }

    /// Mass-weighted sum of segment COMs
    ///
    /// NaN segments contribute nothing; a frame with no finite segment is
    /// NaN.
    pub fn whole_body_com(&self, segment_com: &SegmentCom) -> Result<WholeBodyCom> {
        if segment_com.segments() != self.segments.len() {
            return Err(Error::ShapeMismatch(format!(
                "segment COM has {} segments, table has {}",
                segment_com.segments(),
                self.segments.len()
            )));
        }
        let mut out = WholeBodyCom::new_nan(segment_com.frames());
        for frame in 0..segment_com.frames() {
            let mut total = [0.0; 3];
            let mut any = false;
            for (s, segment) in self.segments.iter().enumerate() {
                let com = segment_com.get(frame, s);
                if com.iter().any(|v| v.is_nan()) {
                    continue;
                }
                any = true;
                for axis in 0..3 {
                    total[axis] += com[axis] * segment.mass_fraction;
                }
            }
            if any {
                out.set(frame, total);
            }
        }
        Ok(out)
    }

    pub fn compute(&self, skeleton: &Skeleton3D) -> Result<ComResult> {
        let segment = self.segment_com(skeleton)?;
        let whole_body = self.whole_body_com(&segment)?;
        tracing::info!(
            frames = skeleton.frames(),
            segments = self.segments.len(),
            "Computed center of mass"
        );
        Ok(ComResult { segment, whole_body })
    }
}
