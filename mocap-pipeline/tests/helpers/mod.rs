//! Test Helper Utilities
//!
//! Shared fixtures for mocap-pipeline integration tests

#![allow(dead_code)]

pub mod audio_fixtures;
pub mod fakes;
pub mod log_capture;
pub mod scene;

pub use audio_fixtures::{noise_burst, write_mono_wav};
pub use fakes::{FakeVideoIo, IdentityFilter, SceneDetector};
pub use log_capture::{capture_test_logs, LogCapture};
pub use scene::{body_point, landmark_frames, scene_bundle, SCENE_CALIBRATION_TOML};
