//! Slaney mel filterbank
//!
//! Piecewise linear below 1 kHz, logarithmic above (librosa `htk=False`),
//! each triangle scaled by `2 / (f_high - f_low)`.

use ndarray::Array2;

use crate::{PitchError, PitchResult};

const F_SP: f32 = 200.0 / 3.0;
const MIN_LOG_HZ: f32 = 1000.0;
const MIN_LOG_MEL: f32 = MIN_LOG_HZ / F_SP;

fn log_step() -> f32 {
    6.4f32.ln() / 27.0
}

/// Hz to mel (Slaney)
pub fn hz_to_mel(hz: f32) -> f32 {
    if hz < MIN_LOG_HZ {
        hz / F_SP
    } else {
        MIN_LOG_MEL + (hz / MIN_LOG_HZ).ln() / log_step()
    }
}

/// Mel to Hz (Slaney)
pub fn mel_to_hz(mel: f32) -> f32 {
    if mel < MIN_LOG_MEL {
        F_SP * mel
    } else {
        MIN_LOG_HZ * (log_step() * (mel - MIN_LOG_MEL)).exp()
    }
}

/// Triangular mel filterbank, `[num_mels, n_fft / 2 + 1]`
#[derive(Debug, Clone)]
pub struct MelFilterbank {
    weights: Array2<f32>,
    /// Band edges (low, center, high) in Hz, one per filter
    edges: Vec<(f32, f32, f32)>,
}

impl MelFilterbank {
    /// Build the Slaney-normalized filterbank
    pub fn slaney(
        sample_rate: u32,
        n_fft: usize,
        num_mels: usize,
        fmin: f32,
        fmax: f32,
    ) -> PitchResult<Self> {
        if fmin < 0.0 || fmax <= fmin || fmax > sample_rate as f32 / 2.0 + 1.0 {
            return Err(PitchError::InvalidFrequencyRange {
                min: fmin,
                max: fmax,
            });
        }
        if num_mels == 0 || n_fft < 2 {
            return Err(PitchError::InvalidConfig(format!(
                "num_mels={} n_fft={}",
                num_mels, n_fft
            )));
        }

        let mel_min = hz_to_mel(fmin);
        let mel_max = hz_to_mel(fmax);

        let hz_points: Vec<f32> = (0..num_mels + 2)
            .map(|i| mel_to_hz(mel_min + (mel_max - mel_min) * i as f32 / (num_mels + 1) as f32))
            .collect();

        let num_bins = n_fft / 2 + 1;
        let bin_hz = sample_rate as f32 / n_fft as f32;
        let mut weights = Array2::<f32>::zeros((num_mels, num_bins));
        let mut edges = Vec::with_capacity(num_mels);

        for m in 0..num_mels {
            let f_low = hz_points[m];
            let f_center = hz_points[m + 1];
            let f_high = hz_points[m + 2];
            let enorm = 2.0 / (f_high - f_low);
            edges.push((f_low, f_center, f_high));

            for k in 0..num_bins {
                let freq = k as f32 * bin_hz;
                let w = if freq >= f_low && freq < f_center {
                    enorm * (freq - f_low) / (f_center - f_low)
                } else if freq >= f_center && freq <= f_high {
                    enorm * (f_high - freq) / (f_high - f_center)
                } else {
                    0.0
                };
                weights[[m, k]] = w;
            }
        }

        Ok(Self { weights, edges })
    }

    /// Wrap externally supplied weights (row-major `[num_mels, num_bins]`)
    pub fn from_raw(data: Vec<f32>, num_mels: usize, num_bins: usize) -> PitchResult<Self> {
        if data.len() != num_mels * num_bins {
            return Err(PitchError::FilterbankShape {
                expected_mels: num_mels,
                expected_bins: num_bins,
                mels: if num_bins > 0 { data.len() / num_bins } else { 0 },
                bins: num_bins,
            });
        }
        let weights = Array2::from_shape_vec((num_mels, num_bins), data)
            .map_err(|e| PitchError::InvalidConfig(e.to_string()))?;
        Ok(Self {
            weights,
            edges: Vec::new(),
        })
    }

    pub fn num_mels(&self) -> usize {
        self.weights.nrows()
    }

    pub fn num_bins(&self) -> usize {
        self.weights.ncols()
    }

    /// Filter weights, `[num_mels, num_bins]`
    pub fn weights(&self) -> &Array2<f32> {
        &self.weights
    }

    /// (low, center, high) edges in Hz. Empty for raw filterbanks.
    pub fn edges(&self) -> &[(f32, f32, f32)] {
        &self.edges
    }

    /// Project a magnitude spectrum onto the mel bands
    pub fn apply(&self, magnitude: &[f32]) -> Vec<f32> {
        self.weights
            .rows()
            .into_iter()
            .map(|row| row.iter().zip(magnitude).map(|(w, m)| w * m).sum())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_bank() -> MelFilterbank {
        MelFilterbank::slaney(44100, 2048, 128, 40.0, 16000.0).unwrap()
    }

    #[test]
    fn test_mel_scale_roundtrip() {
        for hz in [0.0, 440.0, 999.0, 1000.0, 4000.0, 16000.0] {
            let back = mel_to_hz(hz_to_mel(hz));
            assert!((back - hz).abs() < 0.05, "{} -> {}", hz, back);
        }
        // Linear region: 200/3 Hz per mel
        assert!((hz_to_mel(1000.0) - 15.0).abs() < 1e-4);
    }

    #[test]
    fn test_filters_non_negative() {
        let bank = default_bank();
        assert!(bank.weights().iter().all(|&w| w >= 0.0));
    }

    #[test]
    fn test_slaney_peak_normalization() {
        let bank = default_bank();
        for (m, row) in bank.weights().rows().into_iter().enumerate() {
            let (lo, _, hi) = bank.edges()[m];
            let enorm = 2.0 / (hi - lo);
            let peak = row.iter().cloned().fold(0.0f32, f32::max);
            assert!(peak <= enorm * (1.0 + 1e-4), "filter {} exceeds 2/(fHigh-fLow)", m);
        }
    }

    #[test]
    fn test_filters_are_triangular() {
        let bank = default_bank();
        for row in bank.weights().rows() {
            let nz: Vec<f32> = row.iter().cloned().filter(|&w| w > 0.0).collect();
            if nz.len() < 3 {
                continue;
            }
            let peak_idx = nz
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
                .map(|(i, _)| i)
                .unwrap();
            assert!(nz[..=peak_idx].windows(2).all(|w| w[1] >= w[0]));
            assert!(nz[peak_idx..].windows(2).all(|w| w[1] <= w[0]));
        }
    }

    #[test]
    fn test_invalid_range_rejected() {
        assert!(MelFilterbank::slaney(44100, 2048, 128, 500.0, 100.0).is_err());
    }

    #[test]
    fn test_from_raw_shape_checked() {
        assert!(MelFilterbank::from_raw(vec![0.0; 10], 2, 6).is_err());
        let bank = MelFilterbank::from_raw(vec![1.0; 12], 2, 6).unwrap();
        assert_eq!(bank.apply(&[1.0; 6]), vec![6.0, 6.0]);
    }
}
