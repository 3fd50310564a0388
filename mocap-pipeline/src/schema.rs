//! Tracked-point schema
//!
//! Point order in every keypoint and skeleton array: 33 body landmarks, 21
//! right-hand landmarks, 21 left-hand landmarks, then 478 face-mesh points.

use mocap_common::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

pub const BODY_POINT_COUNT: usize = 33;
pub const HAND_POINT_COUNT: usize = 21;
pub const FACE_POINT_COUNT: usize = 478;
pub const TOTAL_POINT_COUNT: usize = BODY_POINT_COUNT + 2 * HAND_POINT_COUNT + FACE_POINT_COUNT;

pub const RIGHT_HAND_OFFSET: usize = BODY_POINT_COUNT;
pub const LEFT_HAND_OFFSET: usize = BODY_POINT_COUNT + HAND_POINT_COUNT;
pub const FACE_OFFSET: usize = BODY_POINT_COUNT + 2 * HAND_POINT_COUNT;

pub const BODY_LANDMARK_NAMES: [&str; BODY_POINT_COUNT] = [
    "nose",
    "left_eye_inner",
    "left_eye",
    "left_eye_outer",
    "right_eye_inner",
    "right_eye",
    "right_eye_outer",
    "left_ear",
    "right_ear",
    "mouth_left",
    "mouth_right",
    "left_shoulder",
    "right_shoulder",
    "left_elbow",
    "right_elbow",
    "left_wrist",
    "right_wrist",
    "left_pinky",
    "right_pinky",
    "left_index",
    "right_index",
    "left_thumb",
    "right_thumb",
    "left_hip",
    "right_hip",
    "left_knee",
    "right_knee",
    "left_ankle",
    "right_ankle",
    "left_heel",
    "right_heel",
    "left_foot_index",
    "right_foot_index",
];

pub const BODY_CONNECTIONS: [(usize, usize); 35] = [
    (0, 1),
    (1, 2),
    (2, 3),
    (3, 7),
    (0, 4),
    (4, 5),
    (5, 6),
    (6, 8),
    (9, 10),
    (11, 12),
    (11, 13),
    (13, 15),
    (15, 17),
    (15, 19),
    (15, 21),
    (17, 19),
    (12, 14),
    (14, 16),
    (16, 18),
    (16, 20),
    (16, 22),
    (18, 20),
    (11, 23),
    (12, 24),
    (23, 24),
    (23, 25),
    (24, 26),
    (25, 27),
    (26, 28),
    (27, 29),
    (28, 30),
    (29, 31),
    (30, 32),
    (27, 31),
    (28, 32),
];

pub const HAND_LANDMARK_NAMES: [&str; HAND_POINT_COUNT] = [
    "wrist",
    "thumb_cmc",
    "thumb_mcp",
    "thumb_ip",
    "thumb_tip",
    "index_finger_mcp",
    "index_finger_pip",
    "index_finger_dip",
    "index_finger_tip",
    "middle_finger_mcp",
    "middle_finger_pip",
    "middle_finger_dip",
    "middle_finger_tip",
    "ring_finger_mcp",
    "ring_finger_pip",
    "ring_finger_dip",
    "ring_finger_tip",
    "pinky_mcp",
    "pinky_pip",
    "pinky_dip",
    "pinky_tip",
];

pub const HAND_CONNECTIONS: [(usize, usize); 21] = [
    (0, 1),
    (1, 2),
    (2, 3),
    (3, 4),
    (0, 5),
    (5, 6),
    (6, 7),
    (7, 8),
    (5, 9),
    (9, 10),
    (10, 11),
    (11, 12),
    (9, 13),
    (13, 14),
    (14, 15),
    (15, 16),
    (13, 17),
    (0, 17),
    (17, 18),
    (18, 19),
    (19, 20),
];

/// Index of a body landmark by name
pub fn body_index(name: &str) -> Option<usize> {
    BODY_LANDMARK_NAMES.iter().position(|n| *n == name)
}

/// Name of every tracked point, in array order
pub fn tracked_point_names() -> Vec<String> {
    let mut names: Vec<String> = BODY_LANDMARK_NAMES.iter().map(|n| n.to_string()).collect();
    names.extend(HAND_LANDMARK_NAMES.iter().map(|n| format!("right_hand_{}", n)));
    names.extend(HAND_LANDMARK_NAMES.iter().map(|n| format!("left_hand_{}", n)));
    names.extend((0..FACE_POINT_COUNT).map(|i| format!("face_{:04}", i)));
    names
}

#[derive(Debug, Clone, Serialize)]
pub struct VirtualMarkerDefinition {
    pub marker_names: Vec<String>,
    pub marker_weights: Vec<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupSchema {
    pub point_names: Vec<String>,
    pub connections: Vec<(usize, usize)>,
    pub virtual_marker_definitions: BTreeMap<String, VirtualMarkerDefinition>,
    pub parent: Option<String>,
}

/// Contents of the names-and-connections JSON
#[derive(Debug, Clone, Serialize)]
pub struct SkeletonSchema {
    pub body: GroupSchema,
    pub hands: BTreeMap<String, GroupSchema>,
    pub face: GroupSchema,
}

impl SkeletonSchema {
    /// Tracked-point schema, with the given virtual markers on the body group
    pub fn new(virtual_markers: BTreeMap<String, VirtualMarkerDefinition>) -> Self {
        let hand = |parent: &str| GroupSchema {
            point_names: HAND_LANDMARK_NAMES.iter().map(|n| n.to_string()).collect(),
            connections: HAND_CONNECTIONS.to_vec(),
            virtual_marker_definitions: BTreeMap::new(),
            parent: Some(parent.to_string()),
        };
        Self {
            body: GroupSchema {
                point_names: BODY_LANDMARK_NAMES.iter().map(|n| n.to_string()).collect(),
                connections: BODY_CONNECTIONS.to_vec(),
                virtual_marker_definitions: virtual_markers,
                parent: None,
            },
            hands: BTreeMap::from([
                ("right".to_string(), hand("right_wrist")),
                ("left".to_string(), hand("left_wrist")),
            ]),
            face: GroupSchema {
                point_names: (0..FACE_POINT_COUNT).map(|i| format!("face_{:04}", i)).collect(),
                connections: Vec::new(),
                virtual_marker_definitions: BTreeMap::new(),
                parent: Some("nose".to_string()),
            },
        }
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}
