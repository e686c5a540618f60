//! ReelForge Vocal Pitch Core
//!
//! Analysis side of the vocal pitch editor:
//!
//! ## Features
//! - **Mel Analysis**: Log-mel spectrogram on a fixed hop grid
//! - **Centered STFT**: Mel frames at arbitrary sample centers for phase-correct stretching
//! - **F0 Grid**: Log-frequency resampling of model F0 onto the mel frame grid
//! - **Note Segmentation**: Hysteresis state machine and streaming neural event collection
//! - **Base Pitch**: Cosine-smoothed note baseline and delta pitch decomposition
//! - **Project Model**: Notes, audio data and dirty-region bookkeeping
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rf_pitch::{MelConfig, SpectralEngine, HysteresisSegmenter, SegmenterConfig};
//!
//! let engine = SpectralEngine::new(MelConfig::default())?;
//! let mel = engine.compute(&waveform)?;
//!
//! let segmenter = HysteresisSegmenter::new(SegmenterConfig::default());
//! let notes = segmenter.segment(&f0, &voiced_mask);
//! ```

#![allow(missing_docs)]

pub mod base_pitch;
pub mod curves;
pub mod f0;
pub mod note;
pub mod project;
pub mod resample;
pub mod segment;
pub mod spectral;

mod error;

pub use base_pitch::{
    BasePitchCurve, BasePitchPreviewRange, NoteSegment, compute_base_pitch_preview_range,
};
pub use error::{PitchError, PitchResult};
pub use note::{Note, Vibrato};
pub use project::{AudioData, Project};
pub use segment::{HysteresisSegmenter, SegmentEvent, SegmenterConfig, StreamingCollector};
pub use spectral::{
    CenteredSpectralEngine, MelConfig, MelFilterbank, MelSpectrogram, SpectralEngine,
};

/// Pipeline sample rate (Hz). All analysis runs at this rate.
pub const SAMPLE_RATE: u32 = 44100;
/// Hop between analysis frames (samples)
pub const HOP_SIZE: usize = 512;
/// STFT window length (samples)
pub const WIN_SIZE: usize = 2048;
/// FFT size (samples)
pub const N_FFT: usize = 2048;
/// Number of mel bands
pub const NUM_MELS: usize = 128;
/// Lowest mel band edge (Hz)
pub const FMIN: f32 = 40.0;
/// Highest mel band edge (Hz)
pub const FMAX: f32 = 16000.0;

/// Lowest MIDI note shown in the editor (C1)
pub const MIN_MIDI_NOTE: i32 = 24;
/// Highest MIDI note shown in the editor (C7)
pub const MAX_MIDI_NOTE: i32 = 96;

/// Convert frequency to MIDI note number. Non-positive frequencies map to 0.
pub fn freq_to_midi(freq: f32) -> f32 {
    if freq <= 0.0 {
        return 0.0;
    }
    69.0 + 12.0 * (freq / 440.0).log2()
}

/// Convert MIDI note number to frequency
pub fn midi_to_freq(midi: f32) -> f32 {
    440.0 * 2.0f32.powf((midi - 69.0) / 12.0)
}

/// Frame index to seconds on the pipeline grid
pub fn frames_to_seconds(frames: usize) -> f64 {
    frames as f64 * HOP_SIZE as f64 / SAMPLE_RATE as f64
}

/// Seconds to frame index on the pipeline grid (truncating)
pub fn seconds_to_frames(seconds: f64) -> usize {
    (seconds.max(0.0) * SAMPLE_RATE as f64 / HOP_SIZE as f64) as usize
}

/// Note names
pub const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Get note name from MIDI number
pub fn midi_to_note_name(midi: f32) -> String {
    let note = midi.round() as i32;
    let octave = note.div_euclid(12) - 1;
    let note_idx = note.rem_euclid(12) as usize;
    format!("{}{}", NOTE_NAMES[note_idx], octave)
}
