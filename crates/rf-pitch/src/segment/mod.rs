//! Note segmentation
//!
//! Two strategies turn (F0, voicing) into notes:
//! - `HysteresisSegmenter`: single pass state machine over the F0 track
//! - `StreamingCollector`: gathers neural segmenter events chunk by chunk
//!
//! Both produce notes sorted by start frame with `f0_values` filled in.

mod heuristic;
mod streaming;

pub use heuristic::HysteresisSegmenter;
pub use streaming::{SegmentEvent, StreamingCollector};

use serde::{Deserialize, Serialize};

/// Segmentation parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SegmenterConfig {
    /// Distance from the current note (semitones) that counts as a pitch change
    pub pitch_split_threshold: f32,
    /// Consecutive changed frames required before splitting
    pub min_frames_for_split: usize,
    /// Shorter notes are discarded
    pub min_note_frames: usize,
    /// Unvoiced run length that closes a note. `None` never closes on gaps.
    pub max_unvoiced_gap: Option<usize>,
    /// Neural events shorter than this (grid frames) are discarded
    pub min_event_frames: usize,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            pitch_split_threshold: 0.5,
            min_frames_for_split: 3,
            min_note_frames: 5,
            max_unvoiced_gap: None,
            min_event_frames: 3,
        }
    }
}

impl SegmenterConfig {
    pub fn with_max_unvoiced_gap(mut self, gap: Option<usize>) -> Self {
        self.max_unvoiced_gap = gap;
        self
    }

    pub fn with_pitch_split_threshold(mut self, semitones: f32) -> Self {
        self.pitch_split_threshold = semitones;
        self
    }
}
