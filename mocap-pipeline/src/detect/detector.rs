//! Pose-landmark detector boundary
//!
//! A detector turns one video into per-frame landmark groups in normalized
//! image coordinates (0..1 of width and height). `CommandPoseDetector` runs an
//! external program that writes those frames as JSON.

use crate::schema::BODY_LANDMARK_NAMES;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Command;

/// One landmark in normalized image coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f64,
    pub y: f64,
    /// Only body landmarks report visibility
    #[serde(default)]
    pub visibility: Option<f64>,
}

/// Landmark groups found in one frame; absent groups were not detected
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LandmarkFrame {
    #[serde(default)]
    pub body: Option<Vec<Landmark>>,
    #[serde(default)]
    pub right_hand: Option<Vec<Landmark>>,
    #[serde(default)]
    pub left_hand: Option<Vec<Landmark>>,
    #[serde(default)]
    pub face: Option<Vec<Landmark>>,
}

/// Settings forwarded to the detector
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorSettings {
    pub model_complexity: u8,
    pub min_detection_confidence: f64,
    pub min_tracking_confidence: f64,
    /// Folder for annotated videos, when requested
    pub annotated_videos_folder: Option<PathBuf>,
}

/// 2D pose-landmark detection over a whole video
pub trait PoseDetector: Send + Sync {
    fn name(&self) -> &str;

    /// Names of the body landmarks, in the order `detect` reports them
    fn body_landmark_names(&self) -> Vec<String> {
        BODY_LANDMARK_NAMES.iter().map(|n| n.to_string()).collect()
    }

    /// One entry per decoded frame, in frame order
    fn detect(&self, video: &Path, settings: &DetectorSettings) -> Result<Vec<LandmarkFrame>>;
}

#[derive(Debug, Deserialize)]
struct DetectorOutput {
    frames: Vec<LandmarkFrame>,
}

/// Runs `<program> [args…] <video> <output.json> --model-complexity N …`
///
/// The program writes `{"frames": [...]}` to the output path.
pub struct CommandPoseDetector {
    program: String,
    args: Vec<String>,
}

impl CommandPoseDetector {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Split a command line such as `"python3 detect_pose.py"` on whitespace
    pub fn from_command_line(command: &str) -> Result<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next().context("Empty detector command")?;
        Ok(Self::new(program, parts.collect()))
    }
}

impl PoseDetector for CommandPoseDetector {
    fn name(&self) -> &str {
        &self.program
    }

    fn detect(&self, video: &Path, settings: &DetectorSettings) -> Result<Vec<LandmarkFrame>> {
        if !video.is_file() {
            bail!("Video not found: {}", video.display());
        }

        let output_file = std::env::temp_dir().join(format!("landmarks_{}.json", uuid::Uuid::new_v4()));

        tracing::debug!(
            video = %video.display(),
            output_file = %output_file.display(),
            "Running pose detector"
        );

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(video)
            .arg(&output_file)
            .arg("--model-complexity")
            .arg(settings.model_complexity.to_string())
            .arg("--min-detection-confidence")
            .arg(settings.min_detection_confidence.to_string())
            .arg("--min-tracking-confidence")
            .arg(settings.min_tracking_confidence.to_string());
        if let Some(folder) = &settings.annotated_videos_folder {
            command.arg("--annotated-videos-folder").arg(folder);
        }

        let output = command
            .output()
            .with_context(|| format!("Failed to run pose detector {}", self.program))?;

        if !output.status.success() {
            let _ = std::fs::remove_file(&output_file);
            bail!(
                "Pose detector failed on {} (exit code {:?}): {}",
                video.display(),
                output.status.code(),
                String::from_utf8_lossy(&output.stderr)
            );
        }

        let json = std::fs::read_to_string(&output_file)
            .with_context(|| format!("Pose detector wrote no output for {}", video.display()))?;
        let _ = std::fs::remove_file(&output_file);

        let parsed: DetectorOutput = serde_json::from_str(&json)
            .with_context(|| format!("Unreadable pose detector output for {}", video.display()))?;

        tracing::debug!(video = %video.display(), frames = parsed.frames.len(), "Pose detection complete");
        Ok(parsed.frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_json_with_missing_groups() {
        let json = r#"{"frames": [
            {"body": [{"x": 0.5, "y": 0.25, "visibility": 0.9}], "face": null},
            {}
        ]}"#;
        let parsed: DetectorOutput = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.frames.len(), 2);
        let body = parsed.frames[0].body.as_ref().unwrap();
        assert_eq!(body[0].visibility, Some(0.9));
        assert!(parsed.frames[0].right_hand.is_none());
        assert_eq!(parsed.frames[1], LandmarkFrame::default());
    }

    #[test]
    fn test_command_line_split() {
        let detector = CommandPoseDetector::from_command_line("python3  detect_pose.py --fast").unwrap();
        assert_eq!(detector.name(), "python3");
        assert_eq!(detector.args, vec!["detect_pose.py", "--fast"]);
        assert!(CommandPoseDetector::from_command_line("  ").is_err());
    }

    #[test]
    fn test_missing_video_rejected() {
        let detector = CommandPoseDetector::new("true", Vec::new());
        let settings = DetectorSettings {
            model_complexity: 2,
            min_detection_confidence: 0.5,
            min_tracking_confidence: 0.5,
            annotated_videos_folder: None,
        };
        assert!(detector.detect(Path::new("/nonexistent/cam_0.mp4"), &settings).is_err());
    }
}
