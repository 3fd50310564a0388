//! Configuration records and TOML loading
//!
//! Every option the pipeline consumes lives in one typed record. Missing keys
//! fall back to built-in defaults, a missing config file falls back to the
//! defaults for the whole record (with a warning), and `validate` rejects
//! values that would make a stage meaningless.
//!
//! # Config file priority
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (`MOCAP_CONFIG`)
//! 3. User config file (`<config_dir>/mocap/config.toml`)
//! 4. Built-in defaults

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming a config file
pub const CONFIG_ENV_VAR: &str = "MOCAP_CONFIG";

/// Environment variable naming the session folder
pub const SESSION_FOLDER_ENV_VAR: &str = "MOCAP_SESSION_FOLDER";

/// Complete pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    #[serde(default)]
    pub synchronization: SynchronizationConfig,

    #[serde(default)]
    pub detection_2d: Detection2dConfig,

    #[serde(default)]
    pub triangulation: TriangulationConfig,

    #[serde(default)]
    pub post_processing: PostProcessingConfig,

    #[serde(default)]
    pub center_of_mass: CenterOfMassConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Bounded progress channel size
    #[serde(default = "default_progress_channel_capacity")]
    pub progress_channel_capacity: usize,
}

/// How per-camera lags are estimated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// FFT cross-correlation of the audio tracks
    #[default]
    Audio,
    /// One user-marked frame per camera
    Manual,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SynchronizationConfig {
    #[serde(default)]
    pub skip_synchronization: bool,

    #[serde(default)]
    pub mode: SyncMode,

    /// Frame index of the shared sync event, one per camera (manual mode)
    #[serde(default)]
    pub manual_frames: Vec<u64>,

    /// Folder (relative to the session) holding the unsynchronized videos
    #[serde(default = "default_raw_videos_folder")]
    pub raw_videos_folder: PathBuf,

    /// Export trimmed mono audio next to the synchronized videos
    #[serde(default = "default_true")]
    pub export_trimmed_audio: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Detection2dConfig {
    #[serde(default)]
    pub skip_2d_image_tracking: bool,

    /// Detector model size, 0 (fast) to 2 (accurate)
    #[serde(default = "default_model_complexity")]
    pub model_complexity: u8,

    #[serde(default = "default_half")]
    pub min_detection_confidence: f64,

    #[serde(default = "default_half")]
    pub min_tracking_confidence: f64,

    /// Body landmarks with lower visibility become NaN
    #[serde(default = "default_half")]
    pub body_confidence_threshold: f64,

    /// Ask the detector to write annotated videos
    #[serde(default = "default_true")]
    pub save_annotated_videos: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TriangulationConfig {
    /// Accepted for compatibility with existing session configs; 2D
    /// observations are gated by `detection_2d.body_confidence_threshold`
    #[serde(default = "default_half")]
    pub confidence_threshold_cutoff: f64,

    #[serde(default)]
    pub use_ransac_triangulation: bool,

    #[serde(default)]
    pub skip_3d_triangulation: bool,

    /// Reprojection error (pixels) separating inlier from outlier rays
    #[serde(default = "default_ransac_threshold_px")]
    pub ransac_threshold_px: f64,

    /// Upper bound on camera pairs tried per point
    #[serde(default = "default_ransac_max_pairs")]
    pub ransac_max_pairs: usize,

    #[serde(default = "default_ransac_seed")]
    pub ransac_seed: u64,

    /// Subtract camera 0's translation from every camera's at load time
    ///
    /// Off by default: calibrations are pinned when they are produced, and
    /// re-pinning a file that was not pinned then moves every camera.
    #[serde(default)]
    pub pin_camera_0_to_origin: bool,

    #[serde(default)]
    pub reprojection_outlier_filter: OutlierFilterConfig,
}

/// Median + k·MAD reprojection-error outlier policy, off unless enabled
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutlierFilterConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_outlier_k")]
    pub k: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PostProcessingConfig {
    /// Sampling rate handed to the temporal filter (frames per second)
    #[serde(default = "default_framerate")]
    pub framerate: f64,

    #[serde(default = "default_cutoff_frequency")]
    pub cutoff_frequency: f64,

    #[serde(default = "default_filter_order")]
    pub filter_order: usize,

    #[serde(default = "default_max_gap_to_fill")]
    pub max_gap_to_fill: usize,

    #[serde(default)]
    pub skip_filter: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CenterOfMassConfig {
    #[serde(default)]
    pub skip_center_of_mass: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

fn default_half() -> f64 {
    0.5
}

fn default_progress_channel_capacity() -> usize {
    256
}

fn default_raw_videos_folder() -> PathBuf {
    PathBuf::from("raw_videos")
}

fn default_model_complexity() -> u8 {
    2
}

fn default_ransac_threshold_px() -> f64 {
    20.0
}

fn default_ransac_max_pairs() -> usize {
    64
}

fn default_ransac_seed() -> u64 {
    1_234_567
}

fn default_outlier_k() -> f64 {
    3.0
}

fn default_framerate() -> f64 {
    30.0
}

fn default_cutoff_frequency() -> f64 {
    7.0
}

fn default_filter_order() -> usize {
    4
}

fn default_max_gap_to_fill() -> usize {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            synchronization: SynchronizationConfig::default(),
            detection_2d: Detection2dConfig::default(),
            triangulation: TriangulationConfig::default(),
            post_processing: PostProcessingConfig::default(),
            center_of_mass: CenterOfMassConfig::default(),
            logging: LoggingConfig::default(),
            progress_channel_capacity: default_progress_channel_capacity(),
        }
    }
}

impl Default for SynchronizationConfig {
    fn default() -> Self {
        Self {
            skip_synchronization: false,
            mode: SyncMode::Audio,
            manual_frames: Vec::new(),
            raw_videos_folder: default_raw_videos_folder(),
            export_trimmed_audio: true,
        }
    }
}

impl Default for Detection2dConfig {
    fn default() -> Self {
        Self {
            skip_2d_image_tracking: false,
            model_complexity: default_model_complexity(),
            min_detection_confidence: default_half(),
            min_tracking_confidence: default_half(),
            body_confidence_threshold: default_half(),
            save_annotated_videos: true,
        }
    }
}

impl Default for TriangulationConfig {
    fn default() -> Self {
        Self {
            confidence_threshold_cutoff: default_half(),
            use_ransac_triangulation: false,
            skip_3d_triangulation: false,
            ransac_threshold_px: default_ransac_threshold_px(),
            ransac_max_pairs: default_ransac_max_pairs(),
            ransac_seed: default_ransac_seed(),
            pin_camera_0_to_origin: false,
            reprojection_outlier_filter: OutlierFilterConfig::default(),
        }
    }
}

impl Default for OutlierFilterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            k: default_outlier_k(),
        }
    }
}

impl Default for PostProcessingConfig {
    fn default() -> Self {
        Self {
            framerate: default_framerate(),
            cutoff_frequency: default_cutoff_frequency(),
            filter_order: default_filter_order(),
            max_gap_to_fill: default_max_gap_to_fill(),
            skip_filter: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl PipelineConfig {
    /// Parse a TOML document and validate it
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: PipelineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Load from the highest-priority source, falling back to defaults
    ///
    /// A config file that exists but fails to parse is an error; an absent
    /// one only produces a warning.
    pub fn load_or_default(cli_path: Option<&Path>) -> Result<Self> {
        match resolve_config_path(cli_path) {
            Some(path) if path.exists() => {
                tracing::info!(config = %path.display(), "Loading pipeline configuration");
                Self::load(&path)
            }
            Some(path) => {
                tracing::warn!(
                    config = %path.display(),
                    "Config file not found, using built-in defaults"
                );
                Ok(Self::default())
            }
            None => {
                tracing::info!("No config file found, using built-in defaults");
                Ok(Self::default())
            }
        }
    }

    /// Reject values no stage can work with
    pub fn validate(&self) -> Result<()> {
        let d = &self.detection_2d;
        if d.model_complexity > 2 {
            return Err(Error::Config(format!(
                "detection_2d.model_complexity must be 0, 1 or 2 (got {})",
                d.model_complexity
            )));
        }
        for (name, value) in [
            ("detection_2d.min_detection_confidence", d.min_detection_confidence),
            ("detection_2d.min_tracking_confidence", d.min_tracking_confidence),
            ("detection_2d.body_confidence_threshold", d.body_confidence_threshold),
            (
                "triangulation.confidence_threshold_cutoff",
                self.triangulation.confidence_threshold_cutoff,
            ),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::Config(format!("{} must lie in [0, 1] (got {})", name, value)));
            }
        }

        let t = &self.triangulation;
        if !(t.ransac_threshold_px > 0.0) {
            return Err(Error::Config(format!(
                "triangulation.ransac_threshold_px must be positive (got {})",
                t.ransac_threshold_px
            )));
        }
        if t.ransac_max_pairs == 0 {
            return Err(Error::Config("triangulation.ransac_max_pairs must be at least 1".into()));
        }
        if !(t.reprojection_outlier_filter.k > 0.0) {
            return Err(Error::Config(format!(
                "triangulation.reprojection_outlier_filter.k must be positive (got {})",
                t.reprojection_outlier_filter.k
            )));
        }

        let p = &self.post_processing;
        if !(p.framerate > 0.0) {
            return Err(Error::Config(format!(
                "post_processing.framerate must be positive (got {})",
                p.framerate
            )));
        }
        if !(p.cutoff_frequency > 0.0 && p.cutoff_frequency < p.framerate / 2.0) {
            return Err(Error::Config(format!(
                "post_processing.cutoff_frequency must lie in (0, framerate/2) (got {} at {} fps)",
                p.cutoff_frequency, p.framerate
            )));
        }
        if p.filter_order == 0 {
            return Err(Error::Config("post_processing.filter_order must be at least 1".into()));
        }

        if self.synchronization.mode == SyncMode::Manual
            && !self.synchronization.skip_synchronization
            && self.synchronization.manual_frames.is_empty()
        {
            return Err(Error::Config(
                "synchronization.manual_frames is required in manual mode".into(),
            ));
        }

        if self.progress_channel_capacity == 0 {
            return Err(Error::Config("progress_channel_capacity must be at least 1".into()));
        }

        Ok(())
    }
}

/// Config file resolution following the documented priority order
///
/// Returns `None` only when no source names a file and no user config file
/// exists.
pub fn resolve_config_path(cli_path: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_path {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: User config file
    dirs::config_dir()
        .map(|d| d.join("mocap").join("config.toml"))
        .filter(|p| p.exists())
}

/// Session folder resolution: command-line argument, then environment variable
pub fn resolve_session_folder(cli_arg: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = cli_arg {
        return Ok(path.to_path_buf());
    }
    match std::env::var(SESSION_FOLDER_ENV_VAR) {
        Ok(path) if !path.is_empty() => Ok(PathBuf::from(path)),
        _ => Err(Error::Config(format!(
            "No session folder given (pass --session-folder or set {})",
            SESSION_FOLDER_ENV_VAR
        ))),
    }
}
