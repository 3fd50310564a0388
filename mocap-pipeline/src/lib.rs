//! mocap-pipeline library interface
//!
//! Multi-camera markerless motion capture: synchronize cameras, detect 2D
//! landmarks, triangulate, normalize, filter and compute center of mass for
//! one recording session. Exposed as a library for the binary and for
//! integration tests.

pub mod arrays;
pub mod calibration;
pub mod com;
pub mod context;
pub mod detect;
pub mod export;
pub mod filter;
pub mod normalize;
pub mod npy;
pub mod orchestrator;
pub mod run_state;
pub mod schema;
pub mod sync;
pub mod triangulate;
pub mod video;

pub use context::RunContext;
pub use orchestrator::Orchestrator;
pub use run_state::{PipelineRun, RunState};
