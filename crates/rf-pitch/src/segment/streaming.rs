//! Collector for streamed neural segmentation events
//!
//! The neural segmenter reports events per processed chunk in its own
//! frame rate. Each chunk is mapped onto the F0 grid, clamped, filtered and
//! appended; the caller notifies listeners once per chunk.

use super::SegmenterConfig;
use crate::note::Note;

/// One note event as reported by a segmentation model
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentEvent {
    /// Start frame in the model's frame rate
    pub start_frame: usize,
    /// End frame (exclusive) in the model's frame rate
    pub end_frame: usize,
    /// Note pitch (MIDI, fractional)
    pub midi: f32,
    pub is_rest: bool,
}

/// Accumulates notes from streamed event chunks
pub struct StreamingCollector<'a> {
    f0: &'a [f32],
    /// Grid frames per model frame
    scale: f64,
    min_event_frames: usize,
    notes: Vec<Note>,
    chunks: usize,
}

impl<'a> StreamingCollector<'a> {
    /// `event_frame_period` and `grid_frame_period` are in seconds
    pub fn new(
        f0: &'a [f32],
        event_frame_period: f64,
        grid_frame_period: f64,
        config: &SegmenterConfig,
    ) -> Self {
        let scale = if grid_frame_period > 0.0 {
            event_frame_period / grid_frame_period
        } else {
            1.0
        };
        Self {
            f0,
            scale,
            min_event_frames: config.min_event_frames,
            notes: Vec::new(),
            chunks: 0,
        }
    }

    /// Map, clamp and append one chunk. Returns the number of notes added.
    ///
    /// Rest events are skipped; events shorter than the minimum after
    /// clamping are discarded.
    pub fn push_chunk(&mut self, events: &[SegmentEvent]) -> usize {
        self.chunks += 1;
        let total = self.f0.len();
        if total == 0 {
            return 0;
        }

        let before = self.notes.len();
        for event in events.iter().filter(|e| !e.is_rest) {
            let start = ((event.start_frame as f64 * self.scale).round() as usize).min(total - 1);
            let end = ((event.end_frame as f64 * self.scale).round() as usize)
                .min(total)
                .max(start + 1);

            if end - start < self.min_event_frames {
                continue;
            }

            let mut note = Note::new(start, end, event.midi);
            note.set_f0_values(self.f0[start..end].to_vec());
            self.notes.push(note);
        }
        self.notes.len() - before
    }

    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    /// Chunks received so far
    pub fn chunk_count(&self) -> usize {
        self.chunks
    }

    /// Collected notes sorted by start frame
    pub fn into_notes(mut self) -> Vec<Note> {
        self.notes.sort_by_key(|n| n.start_frame());
        log::debug!(
            "Streaming segmentation collected {} notes from {} chunks",
            self.notes.len(),
            self.chunks
        );
        self.notes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(start: usize, end: usize, midi: f32) -> SegmentEvent {
        SegmentEvent {
            start_frame: start,
            end_frame: end,
            midi,
            is_rest: false,
        }
    }

    #[test]
    fn test_rest_and_short_events_dropped() {
        let f0 = vec![220.0; 100];
        let mut c = StreamingCollector::new(&f0, 1.0, 1.0, &SegmenterConfig::default());
        let added = c.push_chunk(&[
            event(0, 10, 57.0),
            SegmentEvent {
                is_rest: true,
                ..event(10, 20, 0.0)
            },
            event(20, 22, 60.0),
        ]);
        assert_eq!(added, 1);
        assert_eq!(c.notes()[0].f0_values().len(), 10);
    }

    #[test]
    fn test_events_clamped_to_grid() {
        let f0 = vec![220.0; 50];
        let mut c = StreamingCollector::new(&f0, 1.0, 1.0, &SegmenterConfig::default());
        c.push_chunk(&[event(40, 80, 57.0), event(70, 90, 57.0)]);
        let notes = c.into_notes();
        // Second event collapses to a single frame at the end and is dropped
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].start_frame(), 40);
        assert_eq!(notes[0].end_frame(), 50);
    }

    #[test]
    fn test_frame_rate_conversion() {
        let f0 = vec![220.0; 200];
        // Model frames twice as long as grid frames
        let mut c = StreamingCollector::new(&f0, 0.02, 0.01, &SegmenterConfig::default());
        c.push_chunk(&[event(10, 20, 57.0)]);
        assert_eq!(c.notes()[0].start_frame(), 20);
        assert_eq!(c.notes()[0].end_frame(), 40);
    }

    #[test]
    fn test_chunks_counted_and_sorted() {
        let f0 = vec![220.0; 100];
        let mut c = StreamingCollector::new(&f0, 1.0, 1.0, &SegmenterConfig::default());
        c.push_chunk(&[event(50, 60, 57.0)]);
        c.push_chunk(&[event(10, 20, 57.0)]);
        c.push_chunk(&[]);
        assert_eq!(c.chunk_count(), 3);
        let notes = c.into_notes();
        assert_eq!(notes[0].start_frame(), 10);
    }
}
