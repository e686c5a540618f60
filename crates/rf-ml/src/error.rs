//! Error types for ML inference

use rf_pitch::PitchError;
use thiserror::Error;

/// ML inference error types
#[derive(Error, Debug)]
pub enum MlError {
    /// Model file not found
    #[error("Model not found: {path}")]
    ModelNotFound { path: String },

    /// Model loading failed
    #[error("Failed to load model: {reason}")]
    ModelLoadFailed { reason: String },

    /// Inference requested before a model was loaded
    #[error("Model not loaded: {model}")]
    NotLoaded { model: &'static str },

    /// Inference failed or produced an unusable result
    #[error("Inference failed: {reason}")]
    InferenceFailed { reason: String },

    /// Invalid input shape
    #[error("Invalid input shape: expected {expected}, got {got}")]
    InvalidInputShape { expected: String, got: String },

    /// Invalid output shape
    #[error("Invalid output shape: expected {expected}, got {got}")]
    InvalidOutputShape { expected: String, got: String },

    /// Tract error
    #[error("Tract error: {0}")]
    TractError(String),

    /// Feature extraction error
    #[error("Feature extraction failed: {0}")]
    Pitch(#[from] PitchError),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type for ML operations
pub type MlResult<T> = Result<T, MlError>;
