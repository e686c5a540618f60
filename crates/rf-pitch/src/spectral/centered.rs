//! Centered STFT
//!
//! Frames are taken at arbitrary (fractional) sample centers of the original
//! waveform with reflect padding at both ends. Stretching a note samples the
//! STFT at warped positions instead of resampling the waveform first.

use rayon::prelude::*;

use super::{MelConfig, MelFilterbank, MelSpectrogram, StftCore};
use crate::PitchResult;

/// Sample offset between a vocoder frame index and its STFT center:
/// `-pad_left + (win - 1) / 2 + 1`, with `pad_left = (win - hop) / 2`.
pub fn vocoder_time_offset(win_size: usize, hop_size: usize) -> i64 {
    let win = win_size as i64;
    let pad_left = (win - hop_size as i64) / 2;
    -pad_left + (win - 1) / 2 + 1
}

/// Mirror an out-of-range index back into `0..len`
fn reflect_index(idx: i64, len: usize) -> usize {
    let n = len as i64;
    let mapped = if idx < 0 {
        (-idx - 1).min(n - 1)
    } else if idx >= n {
        n - 1 - (idx - n)
    } else {
        idx
    };
    mapped.max(0) as usize
}

/// Log-mel frames at arbitrary centers
pub struct CenteredSpectralEngine {
    core: StftCore,
}

impl CenteredSpectralEngine {
    pub fn new(config: MelConfig) -> PitchResult<Self> {
        Ok(Self {
            core: StftCore::new(config, None)?,
        })
    }

    pub fn with_filterbank(config: MelConfig, filterbank: MelFilterbank) -> PitchResult<Self> {
        Ok(Self {
            core: StftCore::new(config, Some(filterbank))?,
        })
    }

    pub fn config(&self) -> &MelConfig {
        &self.core.config
    }

    /// One frame per center. Empty audio or no centers yields an empty matrix.
    pub fn compute_at_centers(&self, audio: &[f32], centers: &[f64]) -> PitchResult<MelSpectrogram> {
        let num_mels = self.core.config.num_mels;
        if audio.is_empty() || centers.is_empty() {
            return Ok(MelSpectrogram::empty(num_mels));
        }

        let half_win = (self.core.config.win_size / 2) as i64;
        let len = audio.len();

        let rows: Vec<Vec<f32>> = centers
            .par_iter()
            .map_init(
                || self.core.scratch(),
                |(input, output), &center| {
                    let origin = center.round() as i64 - half_win;
                    self.core.mel_frame(input, output, 1e-9, |j| {
                        audio[reflect_index(origin + j as i64, len)]
                    })
                },
            )
            .collect::<PitchResult<_>>()?;

        Ok(MelSpectrogram::from_rows(&rows, num_mels))
    }

    /// Stretch source frames `start_frame..end_frame` to `new_length` frames.
    ///
    /// Output frame `i` is centered at `(start_frame + i / ratio) * hop + offset`
    /// in the original waveform, clamped to the signal.
    pub fn compute_time_stretched(
        &self,
        audio: &[f32],
        start_frame: usize,
        end_frame: usize,
        new_length: usize,
    ) -> PitchResult<MelSpectrogram> {
        let num_mels = self.core.config.num_mels;
        if audio.is_empty() || new_length == 0 || start_frame >= end_frame {
            return Ok(MelSpectrogram::empty(num_mels));
        }

        let hop = self.core.config.hop_size as f64;
        let ratio = new_length as f64 / (end_frame - start_frame) as f64;
        let offset = vocoder_time_offset(self.core.config.win_size, self.core.config.hop_size) as f64;
        let last = (audio.len() - 1) as f64;

        let centers: Vec<f64> = (0..new_length)
            .map(|i| {
                let src_frame = start_frame as f64 + i as f64 / ratio;
                (src_frame * hop + offset).clamp(0.0, last)
            })
            .collect();

        self.compute_at_centers(audio, &centers)
    }

    /// Warp `start_sample..end_sample` by a per-sample speed curve.
    ///
    /// `speeds[i]` is the playback speed at region sample `i` (1.0 = unchanged,
    /// 0.5 = twice as long). Speeds are floored at 0.01.
    pub fn compute_with_speed_curve(
        &self,
        audio: &[f32],
        start_sample: usize,
        end_sample: usize,
        speeds: &[f32],
        hop_size: usize,
    ) -> PitchResult<MelSpectrogram> {
        let num_mels = self.core.config.num_mels;
        let region_len = end_sample.saturating_sub(start_sample);
        if audio.is_empty() || region_len == 0 || hop_size == 0 || speeds.len() < region_len {
            return Ok(MelSpectrogram::empty(num_mels));
        }

        let mut t_new = Vec::with_capacity(region_len);
        let mut cum = 0.0f64;
        for &speed in &speeds[..region_len] {
            cum += 1.0 / speed.max(0.01) as f64;
            t_new.push(cum);
        }
        let shift = t_new[0] - 1.0;
        t_new.iter_mut().for_each(|t| *t -= shift);

        let total = t_new[region_len - 1];
        let num_out = (total / hop_size as f64) as usize + 1;
        let offset = vocoder_time_offset(self.core.config.win_size, hop_size) as f64;

        let centers: Vec<f64> = (0..num_out)
            .map(|i| {
                let target = (i * hop_size) as f64 + offset;
                let idx = t_new.partition_point(|&t| t < target);
                if idx == 0 {
                    start_sample as f64
                } else if idx >= region_len {
                    (end_sample - 1) as f64
                } else {
                    let t0 = t_new[idx - 1];
                    let t1 = t_new[idx];
                    let alpha = (target - t0) / (t1 - t0 + 1e-9);
                    start_sample as f64 + (idx - 1) as f64 + alpha
                }
            })
            .collect();

        self.compute_at_centers(audio, &centers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spectral::SpectralEngine;
    use std::f32::consts::PI;

    fn voice(len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| {
                let t = i as f32 / 44100.0;
                0.4 * (2.0 * PI * 220.0 * t).sin() + 0.2 * (2.0 * PI * 660.0 * t).sin()
            })
            .collect()
    }

    #[test]
    fn test_time_offset() {
        assert_eq!(vocoder_time_offset(2048, 512), 256);
    }

    #[test]
    fn test_reflect_index() {
        assert_eq!(reflect_index(-1, 10), 0);
        assert_eq!(reflect_index(-3, 10), 2);
        assert_eq!(reflect_index(10, 10), 9);
        assert_eq!(reflect_index(12, 10), 7);
        assert_eq!(reflect_index(-50, 10), 9);
        assert_eq!(reflect_index(50, 10), 0);
    }

    #[test]
    fn test_grid_centers_match_fixed_engine() {
        let audio = voice(44100);
        let fixed = SpectralEngine::new(MelConfig::default()).unwrap();
        let centered = CenteredSpectralEngine::new(MelConfig::default()).unwrap();

        let grid = fixed.compute(&audio).unwrap();
        let centers: Vec<f64> = (5..10).map(|i| (i * 512 + 1024) as f64).collect();
        let at = centered.compute_at_centers(&audio, &centers).unwrap();

        for (k, i) in (5..10).enumerate() {
            for m in 0..128 {
                let a = grid.frame(i)[m];
                let b = at.frame(k)[m];
                // Leakage-only bands sit near the floor where the magnitude epsilon dominates
                if a > -4.0 {
                    assert!((a - b).abs() < 1e-2, "frame {} band {}: {} vs {}", i, m, a, b);
                }
            }
        }
    }

    #[test]
    fn test_time_stretch_lengths() {
        let audio = voice(44100);
        let engine = CenteredSpectralEngine::new(MelConfig::default()).unwrap();
        assert_eq!(engine.compute_time_stretched(&audio, 10, 30, 20).unwrap().num_frames(), 20);
        assert_eq!(engine.compute_time_stretched(&audio, 10, 30, 40).unwrap().num_frames(), 40);
        assert_eq!(engine.compute_time_stretched(&audio, 10, 30, 7).unwrap().num_frames(), 7);
    }

    #[test]
    fn test_time_stretch_degenerate_inputs() {
        let audio = voice(4096);
        let engine = CenteredSpectralEngine::new(MelConfig::default()).unwrap();
        assert!(engine.compute_time_stretched(&audio, 5, 5, 10).unwrap().is_empty());
        assert!(engine.compute_time_stretched(&audio, 0, 5, 0).unwrap().is_empty());
        assert!(engine.compute_time_stretched(&[], 0, 5, 10).unwrap().is_empty());
    }

    #[test]
    fn test_centers_past_end_are_clamped() {
        let audio = voice(4096);
        let engine = CenteredSpectralEngine::new(MelConfig::default()).unwrap();
        // Source range far beyond the signal: every center clamps to the last sample
        let mel = engine.compute_time_stretched(&audio, 100, 110, 4).unwrap();
        assert_eq!(mel.num_frames(), 4);
        assert_eq!(mel.frame(0), mel.frame(3));
    }

    #[test]
    fn test_speed_curve_unit_speed() {
        let audio = voice(44100);
        let engine = CenteredSpectralEngine::new(MelConfig::default()).unwrap();
        let speeds = vec![1.0f32; 10240];
        let mel = engine
            .compute_with_speed_curve(&audio, 4096, 4096 + 10240, &speeds, 512)
            .unwrap();
        assert_eq!(mel.num_frames(), 10240 / 512 + 1);
    }

    #[test]
    fn test_speed_curve_half_speed_doubles_frames() {
        let audio = voice(44100);
        let engine = CenteredSpectralEngine::new(MelConfig::default()).unwrap();
        let speeds = vec![0.5f32; 5120];
        let mel = engine
            .compute_with_speed_curve(&audio, 0, 5120, &speeds, 512)
            .unwrap();
        // t_new spans 1..=10239 samples
        assert_eq!(mel.num_frames(), 10239 / 512 + 1);
    }

    #[test]
    fn test_speed_curve_too_short() {
        let audio = voice(8192);
        let engine = CenteredSpectralEngine::new(MelConfig::default()).unwrap();
        let mel = engine
            .compute_with_speed_curve(&audio, 0, 4096, &[1.0; 100], 512)
            .unwrap();
        assert!(mel.is_empty());
    }
}
