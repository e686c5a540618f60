//! Neural F0 estimation
//!
//! Two detectors share one capability surface:
//! - RMVPE: robust waveform-to-F0 model (default)
//! - FCPE: mel-input contour estimator decoded with a cent table
//!
//! Both run at 16 kHz with a 160-sample hop. Input audio at any rate is
//! resampled internally; the output is one Hz value per model frame with
//! 0 for unvoiced frames.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rf_ml::pitch::{PitchDetector, PitchModelFiles, RmvpeDetector};
//!
//! let detector = RmvpeDetector::new();
//! detector.load_model(&PitchModelFiles::new("models/rmvpe.onnx"), ExecutionProvider::Cpu, 0)?;
//! let f0 = detector.extract_f0(&samples, 44100, 0.03)?;
//! ```

mod fcpe;
mod rmvpe;

pub use fcpe::FcpeDetector;
pub use rmvpe::RmvpeDetector;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::MlResult;
use crate::inference::ExecutionProvider;

/// Native sample rate of the pitch models
pub const MODEL_SAMPLE_RATE: u32 = 16000;

/// Hop of the pitch models at their native rate
pub const MODEL_HOP_SIZE: usize = 160;

/// Artifact bundle for one detector
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PitchModelFiles {
    /// Primary ONNX weights
    pub model: PathBuf,
    /// Raw f32 mel filterbank `[128, n_fft / 2 + 1]`
    pub mel_filterbank: Option<PathBuf>,
    /// Raw f32 cent table `[360]`
    pub cent_table: Option<PathBuf>,
}

impl PitchModelFiles {
    pub fn new(model: impl Into<PathBuf>) -> Self {
        Self {
            model: model.into(),
            mel_filterbank: None,
            cent_table: None,
        }
    }

    pub fn with_tables(mut self, mel_filterbank: impl Into<PathBuf>, cent_table: impl Into<PathBuf>) -> Self {
        self.mel_filterbank = Some(mel_filterbank.into());
        self.cent_table = Some(cent_table.into());
        self
    }

    /// Every listed file that does not exist
    pub fn missing(&self) -> Vec<PathBuf> {
        std::iter::once(&self.model)
            .chain(self.mel_filterbank.iter())
            .chain(self.cent_table.iter())
            .filter(|p| !p.exists())
            .cloned()
            .collect()
    }
}

/// Common trait for F0 estimators
pub trait PitchDetector: Send + Sync {
    /// Load (or reload) the model for the given provider
    fn load_model(
        &self,
        files: &PitchModelFiles,
        provider: ExecutionProvider,
        device_id: i32,
    ) -> MlResult<()>;

    fn is_loaded(&self) -> bool;

    /// Per-frame F0 in Hz (0 = unvoiced), one value per model frame.
    /// An empty result is reported as an error.
    fn extract_f0(&self, samples: &[f32], sample_rate: u32, threshold: f32) -> MlResult<Vec<f32>>;

    /// Seconds between output frames
    fn frame_period(&self) -> f64 {
        MODEL_HOP_SIZE as f64 / MODEL_SAMPLE_RATE as f64
    }

    /// Display name
    fn name(&self) -> &'static str;
}

/// Selectable detector implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PitchDetectorKind {
    #[default]
    Rmvpe,
    Fcpe,
}

impl PitchDetectorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PitchDetectorKind::Rmvpe => "RMVPE",
            PitchDetectorKind::Fcpe => "FCPE",
        }
    }

    /// Default confidence threshold for this detector
    pub fn default_threshold(&self) -> f32 {
        match self {
            PitchDetectorKind::Rmvpe => 0.03,
            PitchDetectorKind::Fcpe => 0.05,
        }
    }
}

/// Anything other than "FCPE" selects RMVPE
impl FromStr for PitchDetectorKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(if s.trim().eq_ignore_ascii_case("fcpe") {
            PitchDetectorKind::Fcpe
        } else {
            PitchDetectorKind::Rmvpe
        })
    }
}

impl fmt::Display for PitchDetectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read a little-endian f32 table from disk
pub(crate) fn read_f32_table(path: &Path) -> MlResult<Vec<f32>> {
    let bytes = std::fs::read(path)?;
    if bytes.len() % 4 != 0 {
        return Err(crate::MlError::ModelLoadFailed {
            reason: format!("{}: length {} is not a multiple of 4", path.display(), bytes.len()),
        });
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// Downmix-free resample to the model rate
pub(crate) fn to_model_rate(samples: &[f32], sample_rate: u32) -> Vec<f32> {
    rf_pitch::resample::resample_linear(samples, sample_rate, MODEL_SAMPLE_RATE)
}
