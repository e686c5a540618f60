//! RMVPE - Robust Model for Vocal Pitch Estimation
//!
//! Waveform in, F0 out. The exported graph takes the 16 kHz waveform
//! `[1, N]` and, in most exports, a scalar voicing threshold. The first
//! output is F0 in Hz per 10 ms frame with 0 marking unvoiced frames.

use ndarray::{ArrayD, IxDyn};
use parking_lot::RwLock;

use super::{PitchDetector, PitchModelFiles, to_model_rate};
use crate::error::{MlError, MlResult};
use crate::inference::{ExecutionProvider, InferenceConfig, InferenceEngine, first_output};

/// RMVPE detector
#[derive(Default)]
pub struct RmvpeDetector {
    engine: RwLock<Option<InferenceEngine>>,
}

impl RmvpeDetector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PitchDetector for RmvpeDetector {
    fn load_model(
        &self,
        files: &PitchModelFiles,
        provider: ExecutionProvider,
        device_id: i32,
    ) -> MlResult<()> {
        let engine = InferenceEngine::new(&files.model, InferenceConfig::new(provider, device_id))?;
        log::info!("RMVPE loaded from {}", files.model.display());
        *self.engine.write() = Some(engine);
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        self.engine.read().is_some()
    }

    fn extract_f0(&self, samples: &[f32], sample_rate: u32, threshold: f32) -> MlResult<Vec<f32>> {
        let guard = self.engine.read();
        let engine = guard.as_ref().ok_or(MlError::NotLoaded { model: "RMVPE" })?;

        let audio = to_model_rate(samples, sample_rate);
        if audio.is_empty() {
            return Err(MlError::InferenceFailed {
                reason: "RMVPE: empty input".into(),
            });
        }

        let waveform = ArrayD::from_shape_vec(IxDyn(&[1, audio.len()]), audio)
            .map_err(|e| MlError::InvalidInputShape {
                expected: "[1, samples]".into(),
                got: e.to_string(),
            })?;

        let mut inputs = vec![waveform];
        if engine.num_inputs() > 1 {
            inputs.push(ArrayD::from_elem(IxDyn(&[]), threshold));
        }

        let f0 = first_output(engine.run_f32(&inputs)?, "RMVPE")?;
        Ok(f0.into_iter().map(|f| if f.is_finite() && f > 0.0 { f } else { 0.0 }).collect())
    }

    fn name(&self) -> &'static str {
        "RMVPE"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unloaded_detector() {
        let detector = RmvpeDetector::new();
        assert!(!detector.is_loaded());
        let result = detector.extract_f0(&[0.0; 1600], 16000, 0.03);
        assert!(matches!(result, Err(MlError::NotLoaded { .. })));
    }

    #[test]
    fn test_load_missing_model_keeps_unloaded() {
        let detector = RmvpeDetector::new();
        let files = PitchModelFiles::new("/nonexistent/rmvpe.onnx");
        assert!(detector.load_model(&files, ExecutionProvider::Cpu, 0).is_err());
        assert!(!detector.is_loaded());
    }

    #[test]
    fn test_frame_period() {
        assert!((RmvpeDetector::new().frame_period() - 0.01).abs() < 1e-12);
    }
}
