//! # ReelForge Vocal Inference Services
//!
//! Neural models behind the vocal pitch editor:
//! - F0 estimation (RMVPE, FCPE)
//! - Note segmentation (SOME)
//! - Waveform synthesis (PC-NSF-HiFiGAN)
//!
//! ## Architecture
//!
//! Every model runs through the pure Rust `tract` ONNX runtime. Execution
//! providers (CUDA, DirectML, CoreML) can be requested by name; requests
//! that cannot be served are logged and run on CPU.
//!
//! Services are `Send + Sync` with interior locking so a model can be
//! reloaded from one thread while another thread holds a reference.

#![allow(missing_docs)]

pub mod pitch;
pub mod segment;
pub mod vocoder;

mod error;
mod inference;

pub use error::{MlError, MlResult};
pub use inference::{ExecutionProvider, InferenceConfig, InferenceEngine};
pub use pitch::{FcpeDetector, PitchDetector, PitchDetectorKind, PitchModelFiles, RmvpeDetector};
pub use segment::{NoteSegmentationModel, SomeSegmenter};
pub use vocoder::{NsfHifiganVocoder, Vocoder};

/// Model artifact file names inside the models directory
pub mod models {
    /// RMVPE pitch model
    pub const RMVPE: &str = "rmvpe.onnx";

    /// FCPE pitch model
    pub const FCPE: &str = "fcpe.onnx";

    /// FCPE mel filterbank table
    pub const FCPE_MEL_FILTERBANK: &str = "mel_filterbank.bin";

    /// FCPE cent table
    pub const FCPE_CENT_TABLE: &str = "cent_table.bin";

    /// SOME note segmentation model
    pub const SOME: &str = "some.onnx";

    /// PC-NSF-HiFiGAN vocoder
    pub const VOCODER: &str = "pc_nsf_hifigan.onnx";
}
