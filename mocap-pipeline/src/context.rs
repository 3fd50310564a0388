//! Per-run context
//!
//! Every folder and artifact path a run touches, derived once from the
//! session folder and handed to each stage by reference.

use mocap_common::config::PipelineConfig;
use std::path::PathBuf;
use uuid::Uuid;

pub const SYNCHRONIZED_VIDEOS_FOLDER_NAME: &str = "synchronized_videos";
pub const ANNOTATED_VIDEOS_FOLDER_NAME: &str = "annotated_videos";
pub const OUTPUT_DATA_FOLDER_NAME: &str = "output_data";
pub const RAW_DATA_FOLDER_NAME: &str = "raw_data";
pub const CENTER_OF_MASS_FOLDER_NAME: &str = "center_of_mass";

pub const SYNCHRONIZATION_DEBUG_TOML_FILENAME: &str = "synchronization_debug.toml";
pub const RAW_2D_NPY_FILENAME: &str =
    "mediapipe_2dData_numCams_numFrames_numTrackedPoints_pixelXY.npy";
pub const RAW_3D_NPY_FILENAME: &str =
    "mediapipe_3dData_numFrames_numTrackedPoints_spatialXYZ.npy";
pub const REPROJECTION_ERROR_NPY_FILENAME: &str =
    "mediapipe_3dData_numFrames_numTrackedPoints_reprojectionError.npy";
pub const FILTERED_3D_NPY_FILENAME: &str = "mediaPipeSkel_3d_body_hands_face.npy";
pub const SEGMENT_COM_NPY_FILENAME: &str = "segmentCOM_frame_joint_xyz.npy";
pub const TOTAL_BODY_COM_NPY_FILENAME: &str = "total_body_center_of_mass_xyz.npy";
pub const SEGMENT_LENGTHS_JSON_FILENAME: &str = "mediapipe_skeleton_segment_lengths.json";
pub const NAMES_AND_CONNECTIONS_JSON_FILENAME: &str = "mediapipe_names_and_connections_dict.json";
pub const RUN_SUMMARY_JSON_FILENAME: &str = "run_summary.json";

/// Paths and settings for one pipeline run
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: Uuid,
    pub session_folder: PathBuf,
    pub config: PipelineConfig,
    /// Calibration TOML, required only when triangulating two or more cameras
    pub calibration_path: Option<PathBuf>,
}

impl RunContext {
    pub fn new(
        session_folder: impl Into<PathBuf>,
        config: PipelineConfig,
        calibration_path: Option<PathBuf>,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            session_folder: session_folder.into(),
            config,
            calibration_path,
        }
    }

    pub fn raw_videos_folder(&self) -> PathBuf {
        let configured = &self.config.synchronization.raw_videos_folder;
        if configured.is_absolute() {
            configured.clone()
        } else {
            self.session_folder.join(configured)
        }
    }

    pub fn synchronized_videos_folder(&self) -> PathBuf {
        self.session_folder.join(SYNCHRONIZED_VIDEOS_FOLDER_NAME)
    }

    pub fn annotated_videos_folder(&self) -> PathBuf {
        self.session_folder.join(ANNOTATED_VIDEOS_FOLDER_NAME)
    }

    pub fn output_data_folder(&self) -> PathBuf {
        self.session_folder.join(OUTPUT_DATA_FOLDER_NAME)
    }

    pub fn raw_data_folder(&self) -> PathBuf {
        self.output_data_folder().join(RAW_DATA_FOLDER_NAME)
    }

    pub fn center_of_mass_folder(&self) -> PathBuf {
        self.output_data_folder().join(CENTER_OF_MASS_FOLDER_NAME)
    }

    pub fn synchronization_debug_path(&self) -> PathBuf {
        self.synchronized_videos_folder()
            .join(SYNCHRONIZATION_DEBUG_TOML_FILENAME)
    }

    pub fn raw_2d_path(&self) -> PathBuf {
        self.raw_data_folder().join(RAW_2D_NPY_FILENAME)
    }

    pub fn raw_3d_path(&self) -> PathBuf {
        self.raw_data_folder().join(RAW_3D_NPY_FILENAME)
    }

    pub fn reprojection_error_path(&self) -> PathBuf {
        self.raw_data_folder().join(REPROJECTION_ERROR_NPY_FILENAME)
    }

    pub fn filtered_3d_path(&self) -> PathBuf {
        self.output_data_folder().join(FILTERED_3D_NPY_FILENAME)
    }

    pub fn segment_com_path(&self) -> PathBuf {
        self.center_of_mass_folder().join(SEGMENT_COM_NPY_FILENAME)
    }

    pub fn total_body_com_path(&self) -> PathBuf {
        self.center_of_mass_folder().join(TOTAL_BODY_COM_NPY_FILENAME)
    }

    pub fn segment_lengths_path(&self) -> PathBuf {
        self.output_data_folder().join(SEGMENT_LENGTHS_JSON_FILENAME)
    }

    pub fn names_and_connections_path(&self) -> PathBuf {
        self.output_data_folder()
            .join(NAMES_AND_CONNECTIONS_JSON_FILENAME)
    }

    /// Per-group 3D table, e.g. `mediapipe_body_3d_xyz.csv`
    pub fn landmark_csv_path(&self, group: &str) -> PathBuf {
        self.output_data_folder()
            .join(format!("mediapipe_{}_3d_xyz.csv", group))
    }

    pub fn run_summary_path(&self) -> PathBuf {
        self.output_data_folder().join(RUN_SUMMARY_JSON_FILENAME)
    }
}
