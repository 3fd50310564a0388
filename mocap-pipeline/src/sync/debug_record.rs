//! Synchronization audit record
//!
//! Written next to the synchronized videos so a run's alignment can be
//! checked after the fact: raw and trimmed video facts per camera, audio
//! facts, and the normalized lag of every camera.

use crate::video::VideoInfo;
use mocap_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoRecord {
    pub path: String,
    pub fps: f64,
    pub frame_count: u64,
    pub duration_seconds: f64,
}

impl From<&VideoInfo> for VideoRecord {
    fn from(info: &VideoInfo) -> Self {
        Self {
            path: info.path.display().to_string(),
            fps: info.fps,
            frame_count: info.frame_count,
            duration_seconds: info.duration_seconds(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AudioRecord {
    /// Shared sample rate after unification, absent in manual mode
    pub sample_rate: Option<u32>,
    /// Audio duration per camera before trimming
    pub durations_seconds: BTreeMap<String, f64>,
}

/// Contents of `synchronization_debug.toml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncDebugRecord {
    pub mode: String,
    pub reference_camera: String,
    pub raw_video_information: BTreeMap<String, VideoRecord>,
    pub synchronized_video_information: BTreeMap<String, VideoRecord>,
    pub audio_information: AudioRecord,
    /// Normalized lag per camera, seconds
    pub lag_dictionary: BTreeMap<String, f64>,
}

impl SyncDebugRecord {
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Internal(format!("Failed to serialize sync record: {}", e)))?;
        std::fs::write(path, content)?;
        tracing::info!(path = %path.display(), "Wrote synchronization debug record");
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::missing("synchronization debug record", path));
        }
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }
}
