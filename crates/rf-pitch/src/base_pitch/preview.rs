//! Selection preview for pending base pitch edits
//!
//! Only the millisecond window touched by the selection (plus one kernel
//! width) is smoothed, so the preview stays cheap on long takes.

use serde::{Deserialize, Serialize};

use super::{BasePitchCurve, ms_per_frame};
use crate::note::Note;

/// Smoothed selection weights over `start_frame..end_frame`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BasePitchPreviewRange {
    pub start_frame: usize,
    /// Exclusive
    pub end_frame: usize,
    /// One weight per frame in `[0, 1]`
    pub weights: Vec<f32>,
}

struct PreviewNote {
    start_frame: usize,
    end_frame: usize,
    selected: bool,
}

/// Weights approximating how strongly each frame follows the selected notes
/// after base pitch smoothing. `None` when nothing non-rest is selected.
pub fn compute_base_pitch_preview_range(
    notes: &[Note],
    total_frames: usize,
    is_selected: impl Fn(&Note) -> bool,
) -> Option<BasePitchPreviewRange> {
    if notes.is_empty() || total_frames == 0 {
        return None;
    }

    let mut segments: Vec<PreviewNote> = notes
        .iter()
        .filter(|n| !n.is_rest())
        .map(|n| PreviewNote {
            start_frame: n.start_frame(),
            end_frame: n.end_frame(),
            selected: is_selected(n),
        })
        .collect();
    if segments.is_empty() {
        return None;
    }
    segments.sort_by_key(|s| (s.start_frame, s.end_frame));

    let ms_per_frame = ms_per_frame();
    let smooth_window = BasePitchCurve::smooth_window_sec();
    let last_end = segments.iter().map(|s| s.end_frame).max().unwrap_or(0);
    let last_end_sec = last_end as f64 * ms_per_frame / 1000.0;
    let total_ms = (1000.0 * (last_end_sec + smooth_window)).round() as i64 + 1;
    if total_ms <= 1 {
        return None;
    }
    let max_ms = total_ms - 1;

    let midpoints: Vec<f64> = segments
        .windows(2)
        .map(|w| 0.5 * (w[0].end_frame + w[1].start_frame) as f64 * ms_per_frame / 1000.0)
        .collect();

    let count = segments.len();
    let end_padding_sec = last_end_sec + smooth_window;
    let mut selected_ms: Option<(i64, i64)> = None;
    for (i, seg) in segments.iter().enumerate() {
        if !seg.selected {
            continue;
        }
        let region_start = if i == 0 { 0.0 } else { midpoints[i - 1] };
        let region_end = if i == count - 1 {
            end_padding_sec
        } else {
            midpoints[i]
        };
        let start_ms = ((region_start * 1000.0).floor() as i64).clamp(0, max_ms);
        let end_ms = ((region_end * 1000.0).ceil() as i64).clamp(0, max_ms);
        selected_ms = Some(match selected_ms {
            Some((lo, hi)) => (lo.min(start_ms), hi.max(end_ms)),
            None => (start_ms, end_ms),
        });
    }
    let (min_sel, max_sel) = selected_ms?;

    let kernel = BasePitchCurve::cosine_kernel();
    let kernel_size = kernel.len() as i64;
    let half_kernel = kernel_size / 2;

    let buffer_start = (min_sel - kernel_size).max(0);
    let buffer_end = (max_sel + kernel_size).min(max_ms);
    let affect_start = (min_sel - half_kernel).max(0);
    let affect_end = (max_sel + half_kernel).min(max_ms);
    if buffer_end <= buffer_start || affect_end < affect_start {
        return None;
    }

    // Selection indicator at 1 kHz over the buffer window
    let mut indicator = Vec::with_capacity((buffer_end - buffer_start + 1) as usize);
    let mut note_idx = 0;
    for ms in buffer_start..=buffer_end {
        let t = 0.001 * ms as f64;
        while note_idx < midpoints.len() && t > midpoints[note_idx] {
            note_idx += 1;
        }
        let selected = segments.get(note_idx).is_some_and(|s| s.selected);
        indicator.push(if selected { 1.0f64 } else { 0.0 });
    }

    let smoothed: Vec<f32> = (affect_start..=affect_end)
        .map(|ms| {
            kernel
                .iter()
                .enumerate()
                .map(|(j, k)| {
                    let src = (ms - half_kernel + j as i64).clamp(buffer_start, buffer_end);
                    indicator[(src - buffer_start) as usize] * k
                })
                .sum::<f64>() as f32
        })
        .collect();

    let frame_start = (affect_start as f64 / ms_per_frame).floor().max(0.0) as usize;
    let frame_end =
        (((affect_end as f64 + 1.0) / ms_per_frame).ceil() as usize + 1).min(total_frames);
    if frame_end <= frame_start {
        return None;
    }

    let sample = |ms: i64| -> f32 {
        if ms < affect_start || ms > affect_end {
            0.0
        } else {
            smoothed[(ms - affect_start) as usize]
        }
    };

    let weights = (frame_start..frame_end)
        .map(|frame| {
            let ms = frame as f64 * ms_per_frame;
            let idx = ms as i64;
            let frac = (ms - idx as f64) as f32;
            sample(idx) * (1.0 - frac) + sample(idx + 1) * frac
        })
        .collect();

    Some(BasePitchPreviewRange {
        start_frame: frame_start,
        end_frame: frame_end,
        weights,
    })
}
