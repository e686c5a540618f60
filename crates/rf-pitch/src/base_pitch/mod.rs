//! Base pitch curve
//!
//! Provides:
//! - Step function over the note sequence, switching at midpoints between notes
//! - Cosine-window smoothing at 1 kHz (119 taps, 0.12 s window)
//! - Delta pitch decomposition and its inverse
//! - Selection preview weights (`preview`)

mod preview;

pub use preview::{BasePitchPreviewRange, compute_base_pitch_preview_range};

use std::f64::consts::PI;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::note::Note;
use crate::{HOP_SIZE, SAMPLE_RATE, freq_to_midi, midi_to_freq};

/// Kernel length at 1 kHz (±59 ms)
const KERNEL_SIZE: usize = 119;
/// Smoothing window (seconds)
const SMOOTH_WINDOW: f64 = 0.12;

/// Frame duration in milliseconds on the pipeline grid
pub(crate) fn ms_per_frame() -> f64 {
    1000.0 * HOP_SIZE as f64 / SAMPLE_RATE as f64
}

/// A note reduced to what the base curve needs
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoteSegment {
    pub start_frame: usize,
    pub end_frame: usize,
    pub midi_note: f32,
}

impl From<&Note> for NoteSegment {
    fn from(note: &Note) -> Self {
        Self {
            start_frame: note.start_frame(),
            end_frame: note.end_frame(),
            midi_note: note.adjusted_midi_note(),
        }
    }
}

/// Smoothed base pitch generation
pub struct BasePitchCurve;

impl BasePitchCurve {
    pub fn kernel_size() -> usize {
        KERNEL_SIZE
    }

    pub fn smooth_window_sec() -> f64 {
        SMOOTH_WINDOW
    }

    /// Normalized cosine kernel, `cos(pi * t / window)` over ±59 ms
    pub fn cosine_kernel() -> &'static [f64] {
        static KERNEL: OnceLock<Vec<f64>> = OnceLock::new();
        KERNEL.get_or_init(|| {
            let half = (KERNEL_SIZE / 2) as f64;
            let raw: Vec<f64> = (0..KERNEL_SIZE)
                .map(|i| (PI * 0.001 * (i as f64 - half) / SMOOTH_WINDOW).cos())
                .collect();
            let sum: f64 = raw.iter().sum();
            raw.into_iter().map(|v| v / sum).collect()
        })
    }

    /// Base pitch for a single note, `total_frames` long
    pub fn generate_for_note(
        start_frame: usize,
        end_frame: usize,
        midi_note: f32,
        total_frames: usize,
    ) -> Vec<f32> {
        Self::generate_for_notes(
            &[NoteSegment {
                start_frame,
                end_frame,
                midi_note,
            }],
            total_frames,
        )
    }

    /// Smoothed step curve over all notes, one value per frame.
    ///
    /// Before the first and after the last note the curve holds that note's
    /// pitch. No notes gives all zeros.
    pub fn generate_for_notes(notes: &[NoteSegment], total_frames: usize) -> Vec<f32> {
        let mut segments: Vec<NoteSegment> = notes
            .iter()
            .copied()
            .filter(|n| n.end_frame > n.start_frame)
            .collect();
        if segments.is_empty() || total_frames == 0 {
            return vec![0.0; total_frames];
        }
        segments.sort_by_key(|n| (n.start_frame, n.end_frame));

        let ms_per_frame = ms_per_frame();
        let last_end = segments.iter().map(|n| n.end_frame).max().unwrap_or(0);
        let timeline_sec = last_end.max(total_frames) as f64 * ms_per_frame / 1000.0;
        let total_ms = (1000.0 * (timeline_sec + SMOOTH_WINDOW)).round() as usize + 1;

        let midpoints: Vec<f64> = segments
            .windows(2)
            .map(|w| 0.5 * (w[0].end_frame + w[1].start_frame) as f64 * ms_per_frame / 1000.0)
            .collect();

        let mut step = Vec::with_capacity(total_ms);
        let mut note_idx = 0;
        for ms in 0..total_ms {
            let t = 0.001 * ms as f64;
            while note_idx < midpoints.len() && t > midpoints[note_idx] {
                note_idx += 1;
            }
            step.push(segments[note_idx].midi_note as f64);
        }

        let smoothed = convolve_clamped(&step, Self::cosine_kernel());

        (0..total_frames)
            .map(|f| sample_ms(&smoothed, f as f64 * ms_per_frame))
            .collect()
    }

    /// Actual MIDI minus base pitch for `f0_values` starting at `start_frame`.
    /// Unvoiced frames and frames outside `base_pitch` are 0.
    pub fn calculate_delta_pitch(
        f0_values: &[f32],
        base_pitch: &[f32],
        start_frame: usize,
    ) -> Vec<f32> {
        f0_values
            .iter()
            .enumerate()
            .map(|(i, &f0)| match base_pitch.get(start_frame + i) {
                Some(&base) if f0 > 0.0 => freq_to_midi(f0) - base,
                _ => 0.0,
            })
            .collect()
    }

    /// F0 (Hz) for a new base pitch with the delta preserved
    pub fn apply_base_pitch_change(
        delta_pitch: &[f32],
        new_base_midi: f32,
        num_frames: usize,
    ) -> Vec<f32> {
        (0..num_frames)
            .map(|i| midi_to_freq(new_base_midi + delta_pitch.get(i).copied().unwrap_or(0.0)))
            .collect()
    }
}

/// Convolve with edge clamping, output length equals input length
pub(crate) fn convolve_clamped(input: &[f64], kernel: &[f64]) -> Vec<f64> {
    let half = kernel.len() / 2;
    let last = input.len().saturating_sub(1) as isize;
    (0..input.len())
        .map(|i| {
            kernel
                .iter()
                .enumerate()
                .map(|(j, k)| {
                    let idx = (i as isize - half as isize + j as isize).clamp(0, last);
                    input[idx as usize] * k
                })
                .sum()
        })
        .collect()
}

/// Linear interpolation into a 1 kHz series
fn sample_ms(series: &[f64], ms: f64) -> f32 {
    let idx = ms as usize;
    let frac = ms - idx as f64;
    let last = series.len() - 1;
    let a = series[idx.min(last)];
    let b = series[(idx + 1).min(last)];
    (a * (1.0 - frac) + b * frac) as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn seg(start: usize, end: usize, midi: f32) -> NoteSegment {
        NoteSegment {
            start_frame: start,
            end_frame: end,
            midi_note: midi,
        }
    }

    #[test]
    fn test_kernel_normalized() {
        let k = BasePitchCurve::cosine_kernel();
        assert_eq!(k.len(), 119);
        assert_relative_eq!(k.iter().sum::<f64>(), 1.0, epsilon = 1e-9);
        assert!(k[59] > k[0]);
        assert_relative_eq!(k[0], k[118], epsilon = 1e-12);
    }

    #[test]
    fn test_single_note_constant() {
        let curve = BasePitchCurve::generate_for_note(10, 50, 62.0, 80);
        assert_eq!(curve.len(), 80);
        assert!(curve.iter().all(|&v| (v - 62.0).abs() < 1e-4));
    }

    #[test]
    fn test_two_notes_smooth_transition() {
        let curve = BasePitchCurve::generate_for_notes(&[seg(0, 40, 60.0), seg(50, 90, 64.0)], 100);
        assert_relative_eq!(curve[10], 60.0, epsilon = 1e-4);
        assert_relative_eq!(curve[80], 64.0, epsilon = 1e-4);
        // Monotonic rise through the midpoint region
        assert!(curve[38..=52].windows(2).all(|w| w[1] >= w[0] - 1e-5));
        assert!((curve[45] - 62.0).abs() < 0.6);
    }

    #[test]
    fn test_unsorted_input() {
        let a = BasePitchCurve::generate_for_notes(&[seg(50, 90, 64.0), seg(0, 40, 60.0)], 100);
        let b = BasePitchCurve::generate_for_notes(&[seg(0, 40, 60.0), seg(50, 90, 64.0)], 100);
        assert_eq!(a, b);
    }

    #[test]
    fn test_no_notes() {
        assert_eq!(BasePitchCurve::generate_for_notes(&[], 5), vec![0.0; 5]);
    }

    #[test]
    fn test_delta_pitch_unvoiced_zero() {
        let base = vec![69.0; 4];
        let delta = BasePitchCurve::calculate_delta_pitch(&[440.0, 0.0, 466.16], &base, 1);
        assert_relative_eq!(delta[0], 0.0, epsilon = 1e-4);
        assert_eq!(delta[1], 0.0);
        assert_relative_eq!(delta[2], 1.0, epsilon = 1e-3);
    }

    #[test]
    fn test_base_pitch_change_roundtrip() {
        let delta = vec![0.3, -0.2, 0.0, 1.1, -0.75];
        let f0 = BasePitchCurve::apply_base_pitch_change(&delta, 62.0, delta.len());
        let base = vec![62.0; delta.len()];
        let back = BasePitchCurve::calculate_delta_pitch(&f0, &base, 0);
        for (a, b) in delta.iter().zip(&back) {
            assert_relative_eq!(a, b, epsilon = 1e-3);
        }
    }
}
