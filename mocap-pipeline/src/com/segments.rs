//! Anthropometric segment table
//!
//! Segment endpoints are marker recipes: weighted sums of named body
//! landmarks. A plain landmark is a one-entry recipe with weight 1.

use crate::schema::BODY_LANDMARK_NAMES;
use crate::schema::VirtualMarkerDefinition;
use mocap_common::{Error, Result};
use std::collections::BTreeMap;

/// Weighted combination of body landmarks
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarkerRecipe {
    pub name: &'static str,
    pub components: &'static [(&'static str, f64)],
}

macro_rules! landmark {
    ($name:literal) => {
        MarkerRecipe {
            name: $name,
            components: &[($name, 1.0)],
        }
    };
}

const MID_CHEST: MarkerRecipe = MarkerRecipe {
    name: "mid_chest_marker",
    components: &[("left_shoulder", 0.5), ("right_shoulder", 0.5)],
};

const MID_HIP: MarkerRecipe = MarkerRecipe {
    name: "mid_hip_marker",
    components: &[("left_hip", 0.5), ("right_hip", 0.5)],
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentDefinition {
    pub name: &'static str,
    pub proximal: MarkerRecipe,
    pub distal: MarkerRecipe,
    /// COM position along proximal → distal, in [0, 1]
    pub com_fraction: f64,
    /// Share of total body mass
    pub mass_fraction: f64,
}

pub const SEGMENTS: [SegmentDefinition; 14] = [
    SegmentDefinition {
        name: "head",
        proximal: landmark!("left_ear"),
        distal: landmark!("right_ear"),
        com_fraction: 0.5,
        mass_fraction: 0.081,
    },
    SegmentDefinition {
        name: "trunk",
        proximal: MID_CHEST,
        distal: MID_HIP,
        com_fraction: 0.5,
        mass_fraction: 0.497,
    },
    SegmentDefinition {
        name: "right_upper_arm",
        proximal: landmark!("right_shoulder"),
        distal: landmark!("right_elbow"),
        com_fraction: 0.436,
        mass_fraction: 0.028,
    },
    SegmentDefinition {
        name: "left_upper_arm",
        proximal: landmark!("left_shoulder"),
        distal: landmark!("left_elbow"),
        com_fraction: 0.436,
        mass_fraction: 0.028,
    },
    SegmentDefinition {
        name: "right_forearm",
        proximal: landmark!("right_elbow"),
        distal: landmark!("right_wrist"),
        com_fraction: 0.430,
        mass_fraction: 0.016,
    },
    SegmentDefinition {
        name: "left_forearm",
        proximal: landmark!("left_elbow"),
        distal: landmark!("left_wrist"),
        com_fraction: 0.430,
        mass_fraction: 0.016,
    },
    SegmentDefinition {
        name: "right_hand",
        proximal: landmark!("right_wrist"),
        distal: landmark!("right_index"),
        com_fraction: 0.506,
        mass_fraction: 0.006,
    },
    SegmentDefinition {
        name: "left_hand",
        proximal: landmark!("left_wrist"),
        distal: landmark!("left_index"),
        com_fraction: 0.506,
        mass_fraction: 0.006,
    },
    SegmentDefinition {
        name: "right_thigh",
        proximal: landmark!("right_hip"),
        distal: landmark!("right_knee"),
        com_fraction: 0.433,
        mass_fraction: 0.1,
    },
    SegmentDefinition {
        name: "left_thigh",
        proximal: landmark!("left_hip"),
        distal: landmark!("left_knee"),
        com_fraction: 0.433,
        mass_fraction: 0.1,
    },
    SegmentDefinition {
        name: "right_shin",
        proximal: landmark!("right_knee"),
        distal: landmark!("right_ankle"),
        com_fraction: 0.433,
        mass_fraction: 0.0465,
    },
    SegmentDefinition {
        name: "left_shin",
        proximal: landmark!("left_knee"),
        distal: landmark!("left_ankle"),
        com_fraction: 0.433,
        mass_fraction: 0.0465,
    },
    SegmentDefinition {
        name: "right_foot",
        proximal: landmark!("right_ankle"),
        distal: landmark!("right_foot_index"),
        com_fraction: 0.5,
        mass_fraction: 0.0145,
    },
    SegmentDefinition {
        name: "left_foot",
        proximal: landmark!("left_ankle"),
        distal: landmark!("left_foot_index"),
        com_fraction: 0.5,
        mass_fraction: 0.0145,
    },
];

/// Recipe bound to point indices
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRecipe {
    pub terms: Vec<(usize, f64)>,
}

impl ResolvedRecipe {
    /// Weighted sum of the recipe's points; NaN if any term is NaN
    pub fn evaluate(&self, point: impl Fn(usize) -> [f64; 3]) -> [f64; 3] {
        let mut out = [0.0; 3];
        for (index, weight) in &self.terms {
            let p = point(*index);
            for axis in 0..3 {
                out[axis] += weight * p[axis];
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSegment {
    pub name: &'static str,
    pub proximal: ResolvedRecipe,
    pub distal: ResolvedRecipe,
    pub com_fraction: f64,
    pub mass_fraction: f64,
}

fn resolve_recipe(recipe: &MarkerRecipe, names: &[&str]) -> Result<ResolvedRecipe> {
    let terms = recipe
        .components
        .iter()
        .map(|(name, weight)| {
            names
                .iter()
                .position(|n| n == name)
                .map(|index| (index, *weight))
                .ok_or_else(|| {
                    Error::SchemaMismatch(format!("marker {} needs unknown landmark {}", recipe.name, name))
                })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(ResolvedRecipe { terms })
}

/// Check `landmark_names` against the expected body landmarks and bind the
/// segment table to their indices
pub fn resolve_segments(landmark_names: &[&str]) -> Result<Vec<ResolvedSegment>> {
    if landmark_names != BODY_LANDMARK_NAMES.as_slice() {
        let first_difference = landmark_names
            .iter()
            .zip(BODY_LANDMARK_NAMES.iter())
            .position(|(a, b)| a != b);
        return Err(Error::SchemaMismatch(match first_difference {
            Some(i) => format!(
                "body landmark {} is {:?}, expected {:?}",
                i, landmark_names[i], BODY_LANDMARK_NAMES[i]
            ),
            None => format!(
                "{} body landmarks given, expected {}",
                landmark_names.len(),
                BODY_LANDMARK_NAMES.len()
            ),
        }));
    }

    SEGMENTS
        .iter()
        .map(|segment| {
            Ok(ResolvedSegment {
                name: segment.name,
                proximal: resolve_recipe(&segment.proximal, landmark_names)?,
                distal: resolve_recipe(&segment.distal, landmark_names)?,
                com_fraction: segment.com_fraction,
                mass_fraction: segment.mass_fraction,
            })
        })
        .collect()
}

pub fn segment_names() -> Vec<&'static str> {
    SEGMENTS.iter().map(|s| s.name).collect()
}

/// Multi-landmark recipes, for the skeleton schema file
pub fn virtual_markers() -> BTreeMap<String, VirtualMarkerDefinition> {
    SEGMENTS
        .iter()
        .flat_map(|s| [s.proximal, s.distal])
        .filter(|recipe| recipe.components.len() > 1)
        .map(|recipe| {
            (
                recipe.name.to_string(),
                VirtualMarkerDefinition {
                    marker_names: recipe.components.iter().map(|(n, _)| n.to_string()).collect(),
                    marker_weights: recipe.components.iter().map(|(_, w)| *w).collect(),
                },
            )
        })
        .collect()
}
