//! Common error types for the mocap pipeline

use std::path::PathBuf;
use thiserror::Error;

/// Common result type for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy shared by every pipeline stage
///
/// Structural errors (anything that would break array indexing) abort a run.
/// `ShapeMismatch` raised by a QA check is logged by the caller and the run
/// continues; raised while indexing it is fatal.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Expected folder or file is absent
    #[error("Missing input: {artifact} not found at {}", path.display())]
    MissingInput { artifact: String, path: PathBuf },

    /// A camera recording has no audio track to synchronize on
    #[error("No audio track found for camera {camera}")]
    NoAudioTrack { camera: String },

    /// Frame, point or camera counts diverge between paired arrays
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    /// Fewer than two valid rays for a point (resolved per point as NaN)
    #[error("Under-determined triangulation at frame {frame}, point {point}: {rays} valid ray(s)")]
    UnderDeterminedTriangulation { frame: usize, point: usize, rays: usize },

    /// Landmark names do not match the segment table's expectations
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Calibration bundle could not be loaded or is inconsistent
    #[error("Calibration error: {0}")]
    Calibration(String),

    /// External collaborator (detector, video tool, filter) failed
    #[error("Collaborator error: {0}")]
    Collaborator(String),

    /// Run stopped by the cancellation token
    #[error("Run cancelled")]
    Cancelled,

    /// Invalid user input or parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for a missing artifact
    pub fn missing(artifact: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Error::MissingInput {
            artifact: artifact.into(),
            path: path.into(),
        }
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Internal(format!("JSON error: {}", err))
    }
}
