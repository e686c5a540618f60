//! Neural vocoder service
//!
//! PC-NSF-HiFiGAN turns a log-mel matrix `[1, T, 128]` and an F0 curve
//! `[1, T]` on the 44.1 kHz / 512-hop grid back into a waveform of
//! `T * 512` samples.

use std::path::Path;

use ndarray::{ArrayD, IxDyn};
use parking_lot::RwLock;

use rf_pitch::MelSpectrogram;

use crate::error::{MlError, MlResult};
use crate::inference::{ExecutionProvider, InferenceConfig, InferenceEngine, first_output};

/// Mel frame to waveform synthesis
pub trait Vocoder: Send + Sync {
    fn load_model(&self, path: &Path, provider: ExecutionProvider, device_id: i32) -> MlResult<()>;

    fn is_loaded(&self) -> bool;

    /// Samples per mel frame in the output
    fn hop_size(&self) -> usize {
        rf_pitch::HOP_SIZE
    }

    /// Synthesize `mel.num_frames() * hop_size()` samples. `f0` has one value
    /// per mel frame. An empty result is an error.
    fn infer(&self, mel: &MelSpectrogram, f0: &[f32]) -> MlResult<Vec<f32>>;
}

/// PC-NSF-HiFiGAN vocoder
#[derive(Default)]
pub struct NsfHifiganVocoder {
    engine: RwLock<Option<InferenceEngine>>,
}

impl NsfHifiganVocoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Vocoder for NsfHifiganVocoder {
    fn load_model(&self, path: &Path, provider: ExecutionProvider, device_id: i32) -> MlResult<()> {
        let engine = InferenceEngine::new(path, InferenceConfig::new(provider, device_id))?;
        log::info!("Vocoder loaded from {}", path.display());
        *self.engine.write() = Some(engine);
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        self.engine.read().is_some()
    }

    fn infer(&self, mel: &MelSpectrogram, f0: &[f32]) -> MlResult<Vec<f32>> {
        let guard = self.engine.read();
        let engine = guard.as_ref().ok_or(MlError::NotLoaded { model: "vocoder" })?;

        let frames = mel.num_frames();
        if frames == 0 {
            return Err(MlError::InferenceFailed {
                reason: "vocoder: empty mel input".into(),
            });
        }
        if f0.len() != frames {
            return Err(MlError::InvalidInputShape {
                expected: format!("{} F0 frames", frames),
                got: format!("{} F0 frames", f0.len()),
            });
        }

        let mel_input = mel
            .as_array()
            .clone()
            .into_shape_with_order(IxDyn(&[1, frames, mel.num_mels()]))
            .map_err(|e| MlError::InvalidInputShape {
                expected: format!("[1, {}, {}]", frames, mel.num_mels()),
                got: e.to_string(),
            })?;
        let f0_input = ArrayD::from_shape_vec(IxDyn(&[1, frames]), f0.to_vec()).map_err(|e| {
            MlError::InvalidInputShape {
                expected: format!("[1, {}]", frames),
                got: e.to_string(),
            }
        })?;

        let audio = first_output(engine.run_f32(&[mel_input, f0_input])?, "vocoder")?;
        log::debug!("Vocoder rendered {} frames -> {} samples", frames, audio.len());
        Ok(audio)
    }
}
