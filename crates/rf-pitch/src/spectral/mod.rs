//! Log-mel spectral analysis
//!
//! Provides:
//! - `SpectralEngine`: fixed-hop log-mel spectrogram (vocoder input grid)
//! - `CenteredSpectralEngine`: frames at arbitrary sample centers for time stretching
//! - `MelFilterbank`: Slaney-normalized triangular filters

mod centered;
mod filterbank;

pub use centered::{CenteredSpectralEngine, vocoder_time_offset};
pub use filterbank::{MelFilterbank, hz_to_mel, mel_to_hz};

use std::f32::consts::PI;
use std::sync::Arc;

use ndarray::{Array2, ArrayView1, ArrayView2, Axis, s};
use num_complex::Complex;
use rayon::prelude::*;
use realfft::{RealFftPlanner, RealToComplex};
use serde::{Deserialize, Serialize};

use crate::{PitchError, PitchResult};

/// STFT / mel configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MelConfig {
    /// Sample rate (Hz)
    pub sample_rate: u32,
    /// FFT size (samples)
    pub n_fft: usize,
    /// Window length (samples), zero-padded to `n_fft`
    pub win_size: usize,
    /// Hop between frames (samples)
    pub hop_size: usize,
    /// Number of mel bands
    pub num_mels: usize,
    /// Lowest filter edge (Hz)
    pub fmin: f32,
    /// Highest filter edge (Hz)
    pub fmax: f32,
    /// Floor applied before the natural log
    pub log_floor: f32,
}

impl Default for MelConfig {
    fn default() -> Self {
        Self {
            sample_rate: crate::SAMPLE_RATE,
            n_fft: crate::N_FFT,
            win_size: crate::WIN_SIZE,
            hop_size: crate::HOP_SIZE,
            num_mels: crate::NUM_MELS,
            fmin: crate::FMIN,
            fmax: crate::FMAX,
            log_floor: 1e-5,
        }
    }
}

impl MelConfig {
    pub fn with_hop_size(mut self, hop_size: usize) -> Self {
        self.hop_size = hop_size;
        self
    }

    pub fn with_log_floor(mut self, floor: f32) -> Self {
        self.log_floor = floor;
        self
    }

    /// Number of FFT bins (`n_fft / 2 + 1`)
    pub fn num_bins(&self) -> usize {
        self.n_fft / 2 + 1
    }

    pub fn validate(&self) -> PitchResult<()> {
        if self.sample_rate == 0 {
            return Err(PitchError::InvalidSampleRate(self.sample_rate));
        }
        if self.hop_size == 0 || self.n_fft == 0 || self.win_size == 0 {
            return Err(PitchError::InvalidConfig(format!(
                "hop={} n_fft={} win={}",
                self.hop_size, self.n_fft, self.win_size
            )));
        }
        if self.win_size > self.n_fft {
            return Err(PitchError::InvalidConfig(format!(
                "window {} longer than FFT {}",
                self.win_size, self.n_fft
            )));
        }
        if self.log_floor <= 0.0 {
            return Err(PitchError::InvalidConfig("log floor must be positive".into()));
        }
        Ok(())
    }
}

/// Log-mel matrix, shape `[frames, mels]`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MelSpectrogram(Array2<f32>);

impl MelSpectrogram {
    pub fn new(data: Array2<f32>) -> Self {
        Self(data)
    }

    /// Empty matrix with a fixed band count
    pub fn empty(num_mels: usize) -> Self {
        Self(Array2::zeros((0, num_mels)))
    }

    /// Build from per-frame rows. Rows must share one length.
    pub fn from_rows(rows: &[Vec<f32>], num_mels: usize) -> Self {
        Self(Array2::from_shape_fn((rows.len(), num_mels), |(i, m)| {
            rows[i].get(m).copied().unwrap_or(0.0)
        }))
    }

    pub fn num_frames(&self) -> usize {
        self.0.nrows()
    }

    pub fn num_mels(&self) -> usize {
        self.0.ncols()
    }

    pub fn is_empty(&self) -> bool {
        self.0.nrows() == 0
    }

    pub fn frame(&self, index: usize) -> ArrayView1<'_, f32> {
        self.0.row(index)
    }

    pub fn as_array(&self) -> &Array2<f32> {
        &self.0
    }

    pub fn into_array(self) -> Array2<f32> {
        self.0
    }

    /// View of frames `start..end`
    pub fn frames(&self, start: usize, end: usize) -> PitchResult<ArrayView2<'_, f32>> {
        if start > end || end > self.num_frames() {
            return Err(PitchError::FrameRange {
                start,
                end,
                total: self.num_frames(),
            });
        }
        Ok(self.0.slice(s![start..end, ..]))
    }

    /// Owned copy of frames `start..end`
    pub fn slice_frames(&self, start: usize, end: usize) -> PitchResult<Self> {
        Ok(Self(self.frames(start, end)?.to_owned()))
    }

    /// Overwrite frames starting at `start` with `other`, truncating at the end
    pub fn replace_frames(&mut self, start: usize, other: &MelSpectrogram) -> PitchResult<()> {
        if other.num_mels() != self.num_mels() {
            return Err(PitchError::InvalidConfig(format!(
                "mel band mismatch: {} vs {}",
                other.num_mels(),
                self.num_mels()
            )));
        }
        let end = (start + other.num_frames()).min(self.num_frames());
        if start >= end {
            return Ok(());
        }
        let n = end - start;
        self.0
            .slice_mut(s![start..end, ..])
            .assign(&other.0.slice(s![0..n, ..]));
        Ok(())
    }

    /// Concatenate along the time axis
    pub fn concat(parts: &[MelSpectrogram], num_mels: usize) -> PitchResult<Self> {
        if parts.is_empty() {
            return Ok(Self::empty(num_mels));
        }
        let views: Vec<_> = parts.iter().map(|p| p.0.view()).collect();
        ndarray::concatenate(Axis(0), &views)
            .map(Self)
            .map_err(|e| PitchError::InvalidConfig(e.to_string()))
    }
}

/// Periodic Hann window (librosa default)
pub fn hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / size as f32).cos()))
        .collect()
}

/// Windowed FFT, magnitude and mel projection shared by both engines
pub(crate) struct StftCore {
    config: MelConfig,
    window: Vec<f32>,
    filterbank: MelFilterbank,
    fft: Arc<dyn RealToComplex<f32>>,
}

impl StftCore {
    fn new(config: MelConfig, filterbank: Option<MelFilterbank>) -> PitchResult<Self> {
        config.validate()?;
        let filterbank = match filterbank {
            Some(fb) => fb,
            None => MelFilterbank::slaney(
                config.sample_rate,
                config.n_fft,
                config.num_mels,
                config.fmin,
                config.fmax,
            )?,
        };
        if filterbank.num_mels() != config.num_mels || filterbank.num_bins() != config.num_bins() {
            return Err(PitchError::FilterbankShape {
                expected_mels: config.num_mels,
                expected_bins: config.num_bins(),
                mels: filterbank.num_mels(),
                bins: filterbank.num_bins(),
            });
        }

        let mut planner = RealFftPlanner::new();
        let fft = planner.plan_fft_forward(config.n_fft);

        Ok(Self {
            config,
            window: hann_window(config.win_size),
            filterbank,
            fft,
        })
    }

    fn scratch(&self) -> (Vec<f32>, Vec<Complex<f32>>) {
        (self.fft.make_input_vec(), self.fft.make_output_vec())
    }

    /// One log-mel frame. `sample_at(j)` yields the unwindowed sample at window offset `j`.
    fn mel_frame(
        &self,
        input: &mut [f32],
        output: &mut [Complex<f32>],
        magnitude_eps: f32,
        sample_at: impl Fn(usize) -> f32,
    ) -> PitchResult<Vec<f32>> {
        input.fill(0.0);
        for (j, w) in self.window.iter().enumerate() {
            input[j] = sample_at(j) * w;
        }

        self.fft
            .process(input, output)
            .map_err(|e| PitchError::FftError(e.to_string()))?;

        let magnitude: Vec<f32> = output
            .iter()
            .map(|c| (c.re * c.re + c.im * c.im + magnitude_eps).sqrt())
            .collect();

        let floor = self.config.log_floor;
        Ok(self
            .filterbank
            .apply(&magnitude)
            .into_iter()
            .map(|v| v.max(floor).ln())
            .collect())
    }
}

/// Fixed-hop log-mel spectrogram
pub struct SpectralEngine {
    core: StftCore,
}

impl SpectralEngine {
    /// Engine with the Slaney filterbank built from `config`
    pub fn new(config: MelConfig) -> PitchResult<Self> {
        Ok(Self {
            core: StftCore::new(config, None)?,
        })
    }

    /// Engine with an externally supplied filterbank
    pub fn with_filterbank(config: MelConfig, filterbank: MelFilterbank) -> PitchResult<Self> {
        Ok(Self {
            core: StftCore::new(config, Some(filterbank))?,
        })
    }

    pub fn config(&self) -> &MelConfig {
        &self.core.config
    }

    pub fn filterbank(&self) -> &MelFilterbank {
        &self.core.filterbank
    }

    /// `floor((num_samples - n_fft) / hop) + 1`, at least 1
    pub fn num_frames(&self, num_samples: usize) -> usize {
        let cfg = &self.core.config;
        if num_samples < cfg.n_fft {
            1
        } else {
            (num_samples - cfg.n_fft) / cfg.hop_size + 1
        }
    }

    /// Compute the log-mel spectrogram. Frames past the end are zero-padded.
    pub fn compute(&self, audio: &[f32]) -> PitchResult<MelSpectrogram> {
        let num_frames = self.num_frames(audio.len());
        let hop = self.core.config.hop_size;

        let rows: Vec<Vec<f32>> = (0..num_frames)
            .into_par_iter()
            .map_init(
                || self.core.scratch(),
                |(input, output), i| {
                    let start = i * hop;
                    self.core.mel_frame(input, output, 0.0, |j| {
                        audio.get(start + j).copied().unwrap_or(0.0)
                    })
                },
            )
            .collect::<PitchResult<_>>()?;

        Ok(MelSpectrogram::from_rows(&rows, self.core.config.num_mels))
    }
}
