//! Error types for the pitch core

use thiserror::Error;

/// Pitch core errors
#[derive(Debug, Error)]
pub enum PitchError {
    /// Input too short for analysis
    #[error("Input too short: {0} samples, need at least {1}")]
    InputTooShort(usize, usize),

    /// Invalid sample rate
    #[error("Invalid sample rate: {0}")]
    InvalidSampleRate(u32),

    /// Invalid frequency range
    #[error("Invalid frequency range: {min} - {max} Hz")]
    InvalidFrequencyRange { min: f32, max: f32 },

    /// Invalid STFT / mel configuration
    #[error("Invalid spectral configuration: {0}")]
    InvalidConfig(String),

    /// Filterbank shape does not match the FFT size
    #[error("Filterbank shape mismatch: expected {expected_mels}x{expected_bins}, got {mels}x{bins}")]
    FilterbankShape {
        expected_mels: usize,
        expected_bins: usize,
        mels: usize,
        bins: usize,
    },

    /// Frame range outside of the analysis grid
    #[error("Frame range {start}..{end} out of bounds (total {total})")]
    FrameRange {
        start: usize,
        end: usize,
        total: usize,
    },

    /// Note index out of range
    #[error("Note index {0} out of range")]
    NoteIndex(usize),

    /// Split point too close to the note edges
    #[error("Cannot split note {index} at frame {frame}")]
    InvalidSplit { index: usize, frame: usize },

    /// FFT error
    #[error("FFT error: {0}")]
    FftError(String),
}

/// Result type for pitch operations
pub type PitchResult<T> = Result<T, PitchError>;
