//! Hysteresis note segmenter
//!
//! States: no voice / in note. A note starts on the first voiced frame at
//! its rounded MIDI value. A pitch change only splits the note after it has
//! persisted for `min_frames_for_split` frames; shorter deviations (vibrato,
//! scoops) reset the counter.

use super::SegmenterConfig;
use crate::freq_to_midi;
use crate::note::Note;

#[derive(Debug, Clone, Copy)]
enum State {
    NoVoice,
    InNote {
        start: usize,
        /// Rounded MIDI the note was opened at
        midi: i32,
        change_count: usize,
        change_start: usize,
        unvoiced: usize,
    },
}

/// Heuristic (F0, voicing) → notes segmenter
#[derive(Debug, Clone, Default)]
pub struct HysteresisSegmenter {
    config: SegmenterConfig,
}

impl HysteresisSegmenter {
    pub fn new(config: SegmenterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SegmenterConfig {
        &self.config
    }

    /// Segment the full track
    pub fn segment(&self, f0: &[f32], voiced: &[bool]) -> Vec<Note> {
        self.segment_with_cancel(f0, voiced, || false)
            .unwrap_or_default()
    }

    /// Segment, polling `is_cancelled` at every finalized note.
    /// Returns `None` when cancelled.
    pub fn segment_with_cancel(
        &self,
        f0: &[f32],
        voiced: &[bool],
        is_cancelled: impl Fn() -> bool,
    ) -> Option<Vec<Note>> {
        let mut notes = Vec::new();
        let mut state = State::NoVoice;
        let is_voiced = |i: usize| voiced.get(i).copied().unwrap_or(false);

        for i in 0..f0.len() {
            let frame_voiced = is_voiced(i);
            state = match (state, frame_voiced) {
                (State::NoVoice, false) => State::NoVoice,
                (State::NoVoice, true) => State::InNote {
                    start: i,
                    midi: freq_to_midi(f0[i]).round() as i32,
                    change_count: 0,
                    change_start: i,
                    unvoiced: 0,
                },
                (
                    State::InNote {
                        start,
                        midi,
                        change_count,
                        change_start,
                        ..
                    },
                    true,
                ) => {
                    let current = freq_to_midi(f0[i]);
                    let quantized = current.round() as i32;
                    let changed = quantized != midi
                        && (current - midi as f32).abs() > self.config.pitch_split_threshold;

                    if !changed {
                        State::InNote {
                            start,
                            midi,
                            change_count: 0,
                            change_start,
                            unvoiced: 0,
                        }
                    } else {
                        let change_start = if change_count == 0 { i } else { change_start };
                        let change_count = change_count + 1;
                        if change_count >= self.config.min_frames_for_split {
                            if is_cancelled() {
                                return None;
                            }
                            notes.extend(self.finalize(f0, voiced, start, change_start));
                            State::InNote {
                                start: change_start,
                                midi: quantized,
                                change_count: 0,
                                change_start,
                                unvoiced: 0,
                            }
                        } else {
                            State::InNote {
                                start,
                                midi,
                                change_count,
                                change_start,
                                unvoiced: 0,
                            }
                        }
                    }
                }
                (
                    State::InNote {
                        start,
                        midi,
                        change_count,
                        change_start,
                        unvoiced,
                    },
                    false,
                ) => {
                    let unvoiced = unvoiced + 1;
                    match self.config.max_unvoiced_gap {
                        Some(gap) if unvoiced > gap => {
                            if is_cancelled() {
                                return None;
                            }
                            let gap_start = i + 1 - unvoiced;
                            notes.extend(self.finalize(f0, voiced, start, gap_start));
                            State::NoVoice
                        }
                        _ => State::InNote {
                            start,
                            midi,
                            change_count,
                            change_start,
                            unvoiced,
                        },
                    }
                }
            };
        }

        if let State::InNote { start, .. } = state {
            if is_cancelled() {
                return None;
            }
            notes.extend(self.finalize(f0, voiced, start, f0.len()));
        }

        log::debug!("Heuristic segmentation produced {} notes", notes.len());
        Some(notes)
    }

    /// Close `start..end` as a note. Too short or fully unvoiced spans yield nothing.
    fn finalize(&self, f0: &[f32], voiced: &[bool], start: usize, end: usize) -> Option<Note> {
        if end < start + self.config.min_note_frames {
            return None;
        }

        let (sum, count) = (start..end)
            .filter(|&j| voiced.get(j).copied().unwrap_or(false) && f0[j] > 0.0)
            .fold((0.0f32, 0usize), |(s, c), j| (s + freq_to_midi(f0[j]), c + 1));
        if count == 0 {
            return None;
        }

        let mut note = Note::new(start, end, sum / count as f32);
        note.set_f0_values(f0[start..end].to_vec());
        Some(note)
    }
}
