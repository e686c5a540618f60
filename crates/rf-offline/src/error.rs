//! Error types for background editing jobs

use rf_ml::MlError;
use rf_pitch::PitchError;
use thiserror::Error;

/// Editor pipeline errors
#[derive(Error, Debug)]
pub enum OfflineError {
    /// A required model artifact is absent
    #[error("Missing model file {name}: {path}")]
    MissingModel { name: String, path: String },

    /// A model produced an empty or unusable result
    #[error("Inference failed: {0}")]
    InferenceFailure(String),

    #[error("Job cancelled")]
    Cancelled,

    /// A side effect after a successful job failed
    #[error("Downstream failure: {0}")]
    Downstream(String),

    #[error("Nothing to synthesize")]
    NothingToSynthesize,

    /// Project, analysis or model not ready for the request
    #[error("Not ready: {0}")]
    NotReady(String),

    #[error("Failed to read audio file: {0}")]
    Decode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0} worker panicked")]
    WorkerPanicked(String),

    #[error(transparent)]
    Ml(#[from] MlError),

    #[error(transparent)]
    Pitch(#[from] PitchError),
}

impl OfflineError {
    pub fn missing_model(name: impl Into<String>, path: &std::path::Path) -> Self {
        Self::MissingModel {
            name: name.into(),
            path: path.display().to_string(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, OfflineError::Cancelled)
    }
}

/// Result type for editor operations
pub type OfflineResult<T> = Result<T, OfflineError>;
