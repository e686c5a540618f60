//! SOME - neural note segmentation
//!
//! The model takes a 44.1 kHz waveform `[1, N]` and returns three parallel
//! sequences per note: MIDI pitch, rest flag and duration in seconds.
//! Audio is processed in fixed chunks so callers can show notes while the
//! rest of the file is still being segmented.

use std::path::Path;

use ndarray::{ArrayD, IxDyn};
use parking_lot::RwLock;

use rf_pitch::SegmentEvent;

use crate::error::{MlError, MlResult};
use crate::inference::{ExecutionProvider, InferenceConfig, InferenceEngine};

/// Native sample rate of the segmentation model
pub const SOME_SAMPLE_RATE: u32 = 44100;

/// Frame hop used to express event positions (samples at 44.1 kHz)
pub const SOME_HOP_SIZE: usize = 512;

/// Default chunk length (seconds)
pub const DEFAULT_CHUNK_SECONDS: f64 = 20.0;

/// Streaming note segmentation service
pub trait NoteSegmentationModel: Send + Sync {
    fn load_model(&self, path: &Path, provider: ExecutionProvider, device_id: i32) -> MlResult<()>;

    fn is_loaded(&self) -> bool;

    /// Seconds per event frame
    fn event_frame_period(&self) -> f64 {
        SOME_HOP_SIZE as f64 / SOME_SAMPLE_RATE as f64
    }

    /// Segment `samples`, calling `on_chunk` once per processed chunk with
    /// that chunk's events in absolute event frames. Returns early without
    /// error once `is_cancelled` reports true.
    fn segment_streaming(
        &self,
        samples: &[f32],
        sample_rate: u32,
        on_chunk: &mut dyn FnMut(&[SegmentEvent]),
        is_cancelled: &dyn Fn() -> bool,
    ) -> MlResult<()>;
}

/// Convert per-note durations into absolute event frames.
///
/// `offset_frames` is the position of the chunk start; durations accumulate
/// in seconds so rounding does not drift across a long chunk.
pub fn durations_to_events(
    midi: &[f32],
    rest: &[f32],
    durations: &[f32],
    offset_frames: usize,
    frame_period: f64,
) -> Vec<SegmentEvent> {
    let count = midi.len().min(rest.len()).min(durations.len());
    let mut events = Vec::with_capacity(count);
    let mut elapsed = 0.0f64;

    for i in 0..count {
        let start = offset_frames + (elapsed / frame_period).round() as usize;
        elapsed += durations[i].max(0.0) as f64;
        let end = offset_frames + (elapsed / frame_period).round() as usize;
        if end <= start {
            continue;
        }
        events.push(SegmentEvent {
            start_frame: start,
            end_frame: end,
            midi: midi[i],
            is_rest: rest[i] > 0.5,
        });
    }
    events
}

/// SOME model wrapper
pub struct SomeSegmenter {
    engine: RwLock<Option<InferenceEngine>>,
    chunk_seconds: f64,
}

impl Default for SomeSegmenter {
    fn default() -> Self {
        Self {
            engine: RwLock::new(None),
            chunk_seconds: DEFAULT_CHUNK_SECONDS,
        }
    }
}

impl SomeSegmenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chunk_seconds(mut self, seconds: f64) -> Self {
        self.chunk_seconds = seconds.max(1.0);
        self
    }

    /// Chunk length in samples, a whole number of hops
    fn chunk_samples(&self) -> usize {
        let raw = (self.chunk_seconds * SOME_SAMPLE_RATE as f64) as usize;
        (raw / SOME_HOP_SIZE).max(1) * SOME_HOP_SIZE
    }

    fn run_chunk(engine: &InferenceEngine, chunk: &[f32]) -> MlResult<(Vec<f32>, Vec<f32>, Vec<f32>)> {
        let input = ArrayD::from_shape_vec(IxDyn(&[1, chunk.len()]), chunk.to_vec()).map_err(|e| {
            MlError::InvalidInputShape {
                expected: "[1, samples]".into(),
                got: e.to_string(),
            }
        })?;

        let outputs = engine.run_f32(&[input])?;
        if outputs.len() < 3 {
            return Err(MlError::InvalidOutputShape {
                expected: "note_midi, note_rest, note_dur".into(),
                got: format!("{} outputs", outputs.len()),
            });
        }

        let flat = |i: usize| outputs[i].iter().copied().collect::<Vec<f32>>();
        Ok((flat(0), flat(1), flat(2)))
    }
}

impl NoteSegmentationModel for SomeSegmenter {
    fn load_model(&self, path: &Path, provider: ExecutionProvider, device_id: i32) -> MlResult<()> {
        let engine = InferenceEngine::new(path, InferenceConfig::new(provider, device_id))?;
        log::info!("SOME loaded from {}", path.display());
        *self.engine.write() = Some(engine);
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        self.engine.read().is_some()
    }

    fn segment_streaming(
        &self,
        samples: &[f32],
        sample_rate: u32,
        on_chunk: &mut dyn FnMut(&[SegmentEvent]),
        is_cancelled: &dyn Fn() -> bool,
    ) -> MlResult<()> {
        let guard = self.engine.read();
        let engine = guard.as_ref().ok_or(MlError::NotLoaded { model: "SOME" })?;

        let audio = rf_pitch::resample::resample_linear(samples, sample_rate, SOME_SAMPLE_RATE);
        let period = self.event_frame_period();
        let chunk_len = self.chunk_samples();

        for (index, chunk) in audio.chunks(chunk_len).enumerate() {
            if is_cancelled() {
                log::debug!("SOME segmentation cancelled at chunk {}", index);
                return Ok(());
            }
            // Sub-hop tails carry no complete frame
            if chunk.len() < SOME_HOP_SIZE {
                continue;
            }

            let (midi, rest, dur) = Self::run_chunk(engine, chunk)?;
            let offset = index * chunk_len / SOME_HOP_SIZE;
            let events = durations_to_events(&midi, &rest, &dur, offset, period);
            on_chunk(&events);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_durations_to_events() {
        let period = SOME_HOP_SIZE as f64 / SOME_SAMPLE_RATE as f64;
        let dur = period as f32 * 10.0;
        let events = durations_to_events(&[60.0, 0.0, 62.0], &[0.0, 1.0, 0.0], &[dur, dur, dur], 100, period);

        assert_eq!(events.len(), 3);
        assert_eq!(events[0].start_frame, 100);
        assert_eq!(events[0].end_frame, 110);
        assert!(events[1].is_rest);
        assert_eq!(events[2].start_frame, 120);
        assert_eq!(events[2].end_frame, 130);
        assert_eq!(events[2].midi, 62.0);
    }

    #[test]
    fn test_zero_duration_dropped() {
        let events = durations_to_events(&[60.0, 61.0], &[0.0, 0.0], &[0.0, 0.1], 0, 0.01);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].midi, 61.0);
        assert_eq!(events[0].end_frame, 10);
    }

    #[test]
    fn test_chunk_samples_whole_hops() {
        let seg = SomeSegmenter::new().with_chunk_seconds(1.0);
        assert_eq!(seg.chunk_samples() % SOME_HOP_SIZE, 0);
        assert!(seg.chunk_samples() <= 44100);
    }

    #[test]
    fn test_unloaded_segmenter() {
        let seg = SomeSegmenter::new();
        assert!(!seg.is_loaded());
        let mut calls = 0;
        let result = seg.segment_streaming(&[0.0; 1024], 44100, &mut |_| calls += 1, &|| false);
        assert!(matches!(result, Err(MlError::NotLoaded { .. })));
        assert_eq!(calls, 0);
    }
}
