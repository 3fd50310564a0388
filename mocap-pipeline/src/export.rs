//! CSV export of the final skeleton
//!
//! One table per landmark group (body, right hand, left hand, face): a row per
//! frame and `<name>_x`, `<name>_y`, `<name>_z` columns per landmark. NaN is
//! written as an empty field.

use crate::arrays::Skeleton3D;
use crate::context::RunContext;
use crate::schema::{
    BODY_LANDMARK_NAMES, BODY_POINT_COUNT, FACE_OFFSET, FACE_POINT_COUNT, HAND_LANDMARK_NAMES,
    HAND_POINT_COUNT, LEFT_HAND_OFFSET, RIGHT_HAND_OFFSET,
};
use mocap_common::{Error, Result};
use std::ops::Range;
use std::path::{Path, PathBuf};

/// A contiguous block of tracked points written to its own table
#[derive(Debug, Clone)]
pub struct LandmarkGroup {
    pub name: &'static str,
    pub points: Range<usize>,
    pub landmark_names: Vec<String>,
}

/// Body, hands and face, in array order
pub fn landmark_groups() -> Vec<LandmarkGroup> {
    let hand = |prefix: &str| -> Vec<String> {
        HAND_LANDMARK_NAMES
            .iter()
            .map(|n| format!("{}_{}", prefix, n))
            .collect()
    };
    vec![
        LandmarkGroup {
            name: "body",
            points: 0..BODY_POINT_COUNT,
            landmark_names: BODY_LANDMARK_NAMES.iter().map(|n| n.to_string()).collect(),
        },
        LandmarkGroup {
            name: "right_hand",
            points: RIGHT_HAND_OFFSET..RIGHT_HAND_OFFSET + HAND_POINT_COUNT,
            landmark_names: hand("right_hand"),
        },
        LandmarkGroup {
            name: "left_hand",
            points: LEFT_HAND_OFFSET..LEFT_HAND_OFFSET + HAND_POINT_COUNT,
            landmark_names: hand("left_hand"),
        },
        LandmarkGroup {
            name: "face",
            points: FACE_OFFSET..FACE_OFFSET + FACE_POINT_COUNT,
            landmark_names: (0..FACE_POINT_COUNT).map(|i| format!("face_{:04}", i)).collect(),
        },
    ]
}

fn field(value: f64) -> String {
    if value.is_nan() {
        String::new()
    } else {
        value.to_string()
    }
}

/// Write one group of `skeleton` as a frame-by-column table
pub fn write_group_csv(path: &Path, skeleton: &Skeleton3D, group: &LandmarkGroup) -> Result<()> {
    if group.points.end > skeleton.points() {
        return Err(Error::ShapeMismatch(format!(
            "{} landmarks end at point {}, skeleton has {}",
            group.name,
            group.points.end,
            skeleton.points()
        )));
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut writer = csv::Writer::from_path(path).map_err(std::io::Error::from)?;
    let header = group
        .landmark_names
        .iter()
        .flat_map(|name| ["x", "y", "z"].map(|axis| format!("{}_{}", name, axis)));
    writer.write_record(header).map_err(std::io::Error::from)?;

    for frame in 0..skeleton.frames() {
        let row = group
            .points
            .clone()
            .flat_map(|point| skeleton.get(frame, point))
            .map(field);
        writer.write_record(row).map_err(std::io::Error::from)?;
    }
    writer.flush()?;

    tracing::debug!(
        path = %path.display(),
        group = group.name,
        frames = skeleton.frames(),
        "Wrote landmark table"
    );
    Ok(())
}

/// Write every group the skeleton covers; returns the files written
///
/// Groups beyond the skeleton's point count are skipped, so a body-only
/// skeleton yields only the body table.
pub fn write_landmark_csvs(ctx: &RunContext, skeleton: &Skeleton3D) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    for group in landmark_groups() {
        if group.points.end > skeleton.points() {
            tracing::debug!(group = group.name, "Skeleton does not cover landmark group, no table written");
            continue;
        }
        let path = ctx.landmark_csv_path(group.name);
        write_group_csv(&path, skeleton, &group)?;
        written.push(path);
    }
    Ok(written)
}
