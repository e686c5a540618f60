//! FCPE - Fast Context-aware Pitch Estimation
//!
//! The model maps a 16 kHz log-mel spectrogram `[1, T, 128]` to a latent
//! salience map `[1, T, 360]` over a cent grid. F0 is decoded per frame with
//! a local argmax: the salience-weighted mean cent of the 9 bins around the
//! peak, converted with `f0 = 10 * 2^(cent / 1200)`.

use ndarray::{Array2, ArrayD, IxDyn};
use parking_lot::RwLock;

use rf_pitch::{CenteredSpectralEngine, MelConfig, MelFilterbank};

use super::{MODEL_HOP_SIZE, MODEL_SAMPLE_RATE, PitchDetector, PitchModelFiles, read_f32_table, to_model_rate};
use crate::error::{MlError, MlResult};
use crate::inference::{ExecutionProvider, InferenceConfig, InferenceEngine};

pub const F0_MIN: f32 = 32.7;
pub const F0_MAX: f32 = 1975.5;
/// Cent bins in the model output
pub const OUT_DIMS: usize = 360;
/// Mel bands fed to the model
pub const INPUT_CHANNELS: usize = 128;
pub const N_FFT: usize = 1024;
pub const WIN_SIZE: usize = 1024;
pub const FMIN: f32 = 0.0;
pub const FMAX: f32 = 8000.0;
pub const CLIP_VAL: f32 = 1e-5;

/// Half-width of the local argmax window
const DECODE_RADIUS: usize = 4;

pub fn cent_to_f0(cent: f32) -> f32 {
    10.0 * 2f32.powf(cent / 1200.0)
}

pub fn f0_to_cent(f0: f32) -> f32 {
    1200.0 * (f0 / 10.0).log2()
}

/// Mel analysis parameters the model was trained with
pub fn mel_config() -> MelConfig {
    MelConfig {
        sample_rate: MODEL_SAMPLE_RATE,
        n_fft: N_FFT,
        win_size: WIN_SIZE,
        hop_size: MODEL_HOP_SIZE,
        num_mels: INPUT_CHANNELS,
        fmin: FMIN,
        fmax: FMAX,
        log_floor: CLIP_VAL,
    }
}

/// Evenly spaced cents between `F0_MIN` and `F0_MAX`
pub fn default_cent_table() -> Vec<f32> {
    let lo = f0_to_cent(F0_MIN);
    let hi = f0_to_cent(F0_MAX);
    (0..OUT_DIMS)
        .map(|i| lo + (hi - lo) * i as f32 / (OUT_DIMS - 1) as f32)
        .collect()
}

/// Local argmax decoding of a `[frames, bins]` salience map
pub fn decode_f0(latent: &Array2<f32>, cent_table: &[f32], threshold: f32) -> Vec<f32> {
    let bins = latent.ncols().min(cent_table.len());
    if bins == 0 {
        return vec![0.0; latent.nrows()];
    }

    latent
        .rows()
        .into_iter()
        .map(|row| {
            let (peak, peak_val) = row
                .iter()
                .take(bins)
                .enumerate()
                .fold((0usize, f32::NEG_INFINITY), |best, (i, &v)| {
                    if v > best.1 { (i, v) } else { best }
                });

            if peak_val.is_nan() || peak_val <= threshold {
                return 0.0;
            }

            let lo = peak.saturating_sub(DECODE_RADIUS);
            let hi = (peak + DECODE_RADIUS + 1).min(bins);
            let (weighted, total) = (lo..hi).fold((0.0f32, 0.0f32), |(w, t), i| {
                (w + row[i] * cent_table[i], t + row[i])
            });
            if total <= 0.0 {
                return 0.0;
            }

            let f0 = cent_to_f0(weighted / total);
            if f0 < F0_MIN { 0.0 } else { f0 }
        })
        .collect()
}

struct FcpeState {
    engine: InferenceEngine,
    spectral: CenteredSpectralEngine,
    cent_table: Vec<f32>,
}

/// FCPE detector
#[derive(Default)]
pub struct FcpeDetector {
    state: RwLock<Option<FcpeState>>,
}

impl FcpeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of model frames produced for `num_samples` at `sample_rate`
    pub fn num_frames(num_samples: usize, sample_rate: u32) -> usize {
        if sample_rate == 0 {
            return 0;
        }
        let resampled = (num_samples as u64 * MODEL_SAMPLE_RATE as u64 / sample_rate as u64) as usize;
        resampled / MODEL_HOP_SIZE + 1
    }
}

impl PitchDetector for FcpeDetector {
    fn load_model(
        &self,
        files: &PitchModelFiles,
        provider: ExecutionProvider,
        device_id: i32,
    ) -> MlResult<()> {
        let config = mel_config();

        let filterbank = match &files.mel_filterbank {
            Some(path) => {
                if !path.exists() {
                    return Err(MlError::ModelNotFound {
                        path: path.display().to_string(),
                    });
                }
                MelFilterbank::from_raw(read_f32_table(path)?, INPUT_CHANNELS, config.num_bins())?
            }
            None => MelFilterbank::slaney(
                config.sample_rate,
                config.n_fft,
                config.num_mels,
                config.fmin,
                config.fmax,
            )?,
        };

        let cent_table = match &files.cent_table {
            Some(path) => {
                if !path.exists() {
                    return Err(MlError::ModelNotFound {
                        path: path.display().to_string(),
                    });
                }
                let table = read_f32_table(path)?;
                if table.len() != OUT_DIMS {
                    return Err(MlError::ModelLoadFailed {
                        reason: format!("cent table has {} entries, expected {}", table.len(), OUT_DIMS),
                    });
                }
                table
            }
            None => default_cent_table(),
        };

        let spectral = CenteredSpectralEngine::with_filterbank(config, filterbank)?;
        let engine = InferenceEngine::new(&files.model, InferenceConfig::new(provider, device_id))?;
        log::info!("FCPE loaded from {}", files.model.display());

        *self.state.write() = Some(FcpeState {
            engine,
            spectral,
            cent_table,
        });
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        self.state.read().is_some()
    }

    fn extract_f0(&self, samples: &[f32], sample_rate: u32, threshold: f32) -> MlResult<Vec<f32>> {
        let guard = self.state.read();
        let state = guard.as_ref().ok_or(MlError::NotLoaded { model: "FCPE" })?;

        let audio = to_model_rate(samples, sample_rate);
        if audio.is_empty() {
            return Err(MlError::InferenceFailed {
                reason: "FCPE: empty input".into(),
            });
        }

        // Frames centered on multiples of the hop, reflect-padded at the edges
        let num_frames = audio.len() / MODEL_HOP_SIZE + 1;
        let centers: Vec<f64> = (0..num_frames)
            .map(|i| (i * MODEL_HOP_SIZE) as f64)
            .collect();
        let mel = state.spectral.compute_at_centers(&audio, &centers)?;

        let (frames, mels) = (mel.num_frames(), mel.num_mels());
        let input = mel
            .into_array()
            .into_shape_with_order(IxDyn(&[1, frames, mels]))
            .map_err(|e| MlError::InvalidInputShape {
                expected: format!("[1, {}, {}]", frames, mels),
                got: e.to_string(),
            })?;

        let outputs = state.engine.run_f32(&[input])?;
        let latent = outputs.into_iter().next().ok_or_else(|| MlError::InferenceFailed {
            reason: "FCPE: model produced no output".into(),
        })?;
        let latent = latent_to_2d(latent)?;

        let f0 = decode_f0(&latent, &state.cent_table, threshold);
        if f0.is_empty() {
            return Err(MlError::InferenceFailed {
                reason: "FCPE: empty output".into(),
            });
        }
        Ok(f0)
    }

    fn name(&self) -> &'static str {
        "FCPE"
    }
}

/// `[1, T, 360]` or `[T, 360]` to `[T, 360]`
fn latent_to_2d(latent: ArrayD<f32>) -> MlResult<Array2<f32>> {
    let shape = latent.shape().to_vec();
    let bins = shape.last().copied().unwrap_or(0);
    if bins != OUT_DIMS {
        return Err(MlError::InvalidOutputShape {
            expected: format!("[1, T, {}]", OUT_DIMS),
            got: format!("{:?}", shape),
        });
    }
    let frames = latent.len() / bins;
    latent
        .into_shape_with_order((frames, bins))
        .map_err(|e| MlError::InvalidOutputShape {
            expected: format!("[1, T, {}]", OUT_DIMS),
            got: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_cent_conversion() {
        assert_relative_eq!(cent_to_f0(f0_to_cent(440.0)), 440.0, epsilon = 1e-2);
        assert_relative_eq!(cent_to_f0(0.0), 10.0);
    }

    #[test]
    fn test_default_cent_table_spans_range() {
        let table = default_cent_table();
        assert_eq!(table.len(), OUT_DIMS);
        assert_relative_eq!(cent_to_f0(table[0]), F0_MIN, epsilon = 0.01);
        assert_relative_eq!(cent_to_f0(table[OUT_DIMS - 1]), F0_MAX, epsilon = 0.5);
    }

    #[test]
    fn test_decode_local_argmax() {
        let table = default_cent_table();
        let mut latent = Array2::<f32>::zeros((3, OUT_DIMS));
        // Frame 0: single clean peak
        latent[[0, 100]] = 0.9;
        // Frame 1: symmetric shoulders keep the peak cent
        latent[[1, 199]] = 0.4;
        latent[[1, 200]] = 0.8;
        latent[[1, 201]] = 0.4;
        // Frame 2: below threshold
        latent[[2, 50]] = 0.01;

        let f0 = decode_f0(&latent, &table, 0.05);
        assert_relative_eq!(f0[0], cent_to_f0(table[100]), epsilon = 1e-2);
        assert_relative_eq!(f0[1], cent_to_f0(table[200]), epsilon = 1e-1);
        assert_eq!(f0[2], 0.0);
    }

    #[test]
    fn test_decode_ignores_far_bins() {
        let table = default_cent_table();
        let mut latent = Array2::<f32>::zeros((1, OUT_DIMS));
        latent[[0, 100]] = 0.9;
        latent[[0, 300]] = 0.5;
        let f0 = decode_f0(&latent, &table, 0.05);
        assert_relative_eq!(f0[0], cent_to_f0(table[100]), epsilon = 1e-2);
    }

    #[test]
    fn test_mel_config_valid() {
        let config = mel_config();
        config.validate().unwrap();
        assert_eq!(config.num_bins(), 513);
    }

    #[test]
    fn test_num_frames() {
        assert_eq!(FcpeDetector::num_frames(16000, 16000), 101);
        assert_eq!(FcpeDetector::num_frames(44100, 44100), 101);
        assert_eq!(FcpeDetector::num_frames(100, 0), 0);
    }

    #[test]
    fn test_missing_tables_rejected() {
        let detector = FcpeDetector::new();
        let files = PitchModelFiles::new("/nonexistent/fcpe.onnx")
            .with_tables("/nonexistent/mel_filterbank.bin", "/nonexistent/cent_table.bin");
        let result = detector.load_model(&files, ExecutionProvider::Cpu, 0);
        assert!(matches!(result, Err(MlError::ModelNotFound { .. })));
        assert!(!detector.is_loaded());
    }

    #[test]
    fn test_latent_shape_checked() {
        let bad = ArrayD::<f32>::zeros(IxDyn(&[1, 4, 10]));
        assert!(latent_to_2d(bad).is_err());
        let good = ArrayD::<f32>::zeros(IxDyn(&[1, 4, OUT_DIMS]));
        assert_eq!(latent_to_2d(good).unwrap().dim(), (4, OUT_DIMS));
    }
}
