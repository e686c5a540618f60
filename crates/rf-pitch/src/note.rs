//! Note model
//!
//! A note has two frame ranges:
//! - source range: position in the analysed waveform, fixed at segmentation
//! - output range: position on the edited timeline, moved or stretched by edits
//!
//! Pitch at output frame `i` is `midi_note + pitch_offset + delta_pitch[i]`
//! (plus vibrato when enabled). `delta_pitch` survives pitch drags.

use std::f32::consts::PI;

use serde::{Deserialize, Serialize};

use crate::spectral::MelSpectrogram;
use crate::{HOP_SIZE, SAMPLE_RATE, midi_to_freq};

/// Stretch ratios closer to 1.0 than this count as unstretched
pub const STRETCH_TOLERANCE: f32 = 0.001;

/// Sinusoidal vibrato added on top of the note pitch
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vibrato {
    pub enabled: bool,
    /// Rate (Hz)
    pub rate_hz: f32,
    /// Peak deviation (semitones)
    pub depth_semitones: f32,
    /// Start phase (radians)
    pub phase_radians: f32,
}

impl Default for Vibrato {
    fn default() -> Self {
        Self {
            enabled: false,
            rate_hz: 5.0,
            depth_semitones: 0.0,
            phase_radians: 0.0,
        }
    }
}

impl Vibrato {
    /// Offset in semitones at `frame` frames into the note
    pub fn offset_at(&self, frame: usize) -> f32 {
        if !self.enabled || self.depth_semitones == 0.0 {
            return 0.0;
        }
        let t = frame as f32 * HOP_SIZE as f32 / SAMPLE_RATE as f32;
        self.depth_semitones * (2.0 * PI * self.rate_hz * t + self.phase_radians).sin()
    }
}

/// One pitch segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    src_start_frame: usize,
    src_end_frame: usize,
    start_frame: usize,
    end_frame: usize,
    /// Quantized base pitch (MIDI)
    midi_note: f32,
    /// User pitch edit (semitones)
    pitch_offset: f32,
    /// Per-frame deviation from `midi_note` (semitones)
    delta_pitch: Vec<f32>,
    vibrato: Vibrato,
    /// Detected F0 over the source range (Hz, 0 = unvoiced)
    f0_values: Vec<f32>,
    /// Cached source samples, filled on split
    clip_waveform: Vec<f32>,
    /// Cached source mel frames, filled on split
    clip_mel: Option<MelSpectrogram>,
    selected: bool,
    dirty: bool,
    rest: bool,
    lyric: String,
    phoneme: String,
}

impl Default for Note {
    fn default() -> Self {
        Self::new(0, 0, 60.0)
    }
}

impl Note {
    /// New note whose source and output ranges are both `start..end`
    pub fn new(start_frame: usize, end_frame: usize, midi_note: f32) -> Self {
        Self {
            src_start_frame: start_frame,
            src_end_frame: end_frame,
            start_frame,
            end_frame,
            midi_note,
            pitch_offset: 0.0,
            delta_pitch: Vec::new(),
            vibrato: Vibrato::default(),
            f0_values: Vec::new(),
            clip_waveform: Vec::new(),
            clip_mel: None,
            selected: false,
            dirty: false,
            rest: false,
            lyric: String::new(),
            phoneme: String::new(),
        }
    }

    /// Rest placeholder covering `start..end`
    pub fn rest(start_frame: usize, end_frame: usize) -> Self {
        let mut note = Self::new(start_frame, end_frame, 0.0);
        note.rest = true;
        note
    }

    // ── Source range ──

    pub fn src_start_frame(&self) -> usize {
        self.src_start_frame
    }

    pub fn src_end_frame(&self) -> usize {
        self.src_end_frame
    }

    pub fn src_duration_frames(&self) -> usize {
        self.src_end_frame.saturating_sub(self.src_start_frame)
    }

    pub(crate) fn set_src_range(&mut self, start: usize, end: usize) {
        self.src_start_frame = start;
        self.src_end_frame = end;
    }

    // ── Output range ──

    pub fn start_frame(&self) -> usize {
        self.start_frame
    }

    pub fn end_frame(&self) -> usize {
        self.end_frame
    }

    pub fn duration_frames(&self) -> usize {
        self.end_frame.saturating_sub(self.start_frame)
    }

    pub fn set_range(&mut self, start: usize, end: usize) {
        self.start_frame = start;
        self.end_frame = end;
    }

    /// `start_frame <= frame < end_frame`
    pub fn contains_frame(&self, frame: usize) -> bool {
        frame >= self.start_frame && frame < self.end_frame
    }

    /// Output length / source length. Empty source ranges report 1.0.
    pub fn stretch_ratio(&self) -> f32 {
        let src_len = self.src_duration_frames();
        if src_len == 0 {
            return 1.0;
        }
        self.duration_frames() as f32 / src_len as f32
    }

    pub fn is_stretched(&self) -> bool {
        (self.stretch_ratio() - 1.0).abs() > STRETCH_TOLERANCE
    }

    /// Output range differs from the source range
    pub fn is_moved(&self) -> bool {
        self.start_frame != self.src_start_frame || self.end_frame != self.src_end_frame
    }

    // ── Pitch ──

    pub fn midi_note(&self) -> f32 {
        self.midi_note
    }

    pub fn set_midi_note(&mut self, midi: f32) {
        self.midi_note = midi;
    }

    pub fn pitch_offset(&self) -> f32 {
        self.pitch_offset
    }

    pub fn set_pitch_offset(&mut self, offset: f32) {
        self.pitch_offset = offset;
    }

    /// `midi_note + pitch_offset`
    pub fn adjusted_midi_note(&self) -> f32 {
        self.midi_note + self.pitch_offset
    }

    pub fn delta_pitch(&self) -> &[f32] {
        &self.delta_pitch
    }

    pub fn set_delta_pitch(&mut self, delta: Vec<f32>) {
        self.delta_pitch = delta;
    }

    pub fn has_delta_pitch(&self) -> bool {
        !self.delta_pitch.is_empty()
    }

    pub fn vibrato(&self) -> &Vibrato {
        &self.vibrato
    }

    pub fn set_vibrato(&mut self, vibrato: Vibrato) {
        self.vibrato = vibrato;
    }

    /// Pitch (MIDI) at frame `i` of the output range
    pub fn pitch_at(&self, i: usize) -> f32 {
        let delta = self.delta_pitch.get(i).copied().unwrap_or(0.0);
        self.midi_note + self.pitch_offset + delta + self.vibrato.offset_at(i)
    }

    /// F0 (Hz) for every output frame from base pitch, offset, delta and vibrato
    pub fn compute_f0_from_delta(&self) -> Vec<f32> {
        (0..self.duration_frames())
            .map(|i| midi_to_freq(self.pitch_at(i)))
            .collect()
    }

    pub fn f0_values(&self) -> &[f32] {
        &self.f0_values
    }

    pub fn set_f0_values(&mut self, values: Vec<f32>) {
        self.f0_values = values;
    }

    /// Detected F0 shifted by the pitch offset. Unvoiced frames stay 0.
    pub fn adjusted_f0(&self) -> Vec<f32> {
        if self.pitch_offset == 0.0 {
            return self.f0_values.clone();
        }
        let ratio = 2.0f32.powf(self.pitch_offset / 12.0);
        self.f0_values
            .iter()
            .map(|&f| if f > 0.0 { f * ratio } else { 0.0 })
            .collect()
    }

    // ── Cached clips ──

    pub fn clip_waveform(&self) -> &[f32] {
        &self.clip_waveform
    }

    pub fn set_clip_waveform(&mut self, samples: Vec<f32>) {
        self.clip_waveform = samples;
    }

    pub fn has_clip_waveform(&self) -> bool {
        !self.clip_waveform.is_empty()
    }

    pub fn clip_mel(&self) -> Option<&MelSpectrogram> {
        self.clip_mel.as_ref()
    }

    pub fn set_clip_mel(&mut self, mel: Option<MelSpectrogram>) {
        self.clip_mel = mel;
    }

    // ── Flags ──

    pub fn is_selected(&self) -> bool {
        self.selected
    }

    pub fn set_selected(&mut self, selected: bool) {
        self.selected = selected;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    pub fn is_rest(&self) -> bool {
        self.rest
    }

    pub fn set_rest(&mut self, rest: bool) {
        self.rest = rest;
    }

    pub fn lyric(&self) -> &str {
        &self.lyric
    }

    pub fn set_lyric(&mut self, lyric: impl Into<String>) {
        self.lyric = lyric.into();
    }

    pub fn phoneme(&self) -> &str {
        &self.phoneme
    }

    pub fn set_phoneme(&mut self, phoneme: impl Into<String>) {
        self.phoneme = phoneme.into();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_new_note_source_equals_output() {
        let note = Note::new(10, 30, 60.0);
        assert_eq!(note.src_start_frame(), 10);
        assert_eq!(note.src_end_frame(), 30);
        assert!(!note.is_stretched());
        assert!(!note.is_moved());
        assert!(!note.is_dirty());
    }

    #[test]
    fn test_contains_frame_half_open() {
        let note = Note::new(10, 20, 60.0);
        assert!(!note.contains_frame(9));
        assert!(note.contains_frame(10));
        assert!(note.contains_frame(19));
        assert!(!note.contains_frame(20));
    }

    #[test]
    fn test_stretch_ratio() {
        let mut note = Note::new(10, 30, 60.0);
        note.set_range(10, 50);
        assert_relative_eq!(note.stretch_ratio(), 2.0);
        assert!(note.is_stretched());

        // Within tolerance of 1.0
        let mut long = Note::new(0, 2000, 60.0);
        long.set_range(0, 2001);
        assert!(!long.is_stretched());
    }

    #[test]
    fn test_stretch_ratio_empty_source() {
        let note = Note::new(5, 5, 60.0);
        assert_eq!(note.stretch_ratio(), 1.0);
    }

    #[test]
    fn test_f0_from_delta() {
        let mut note = Note::new(0, 4, 69.0);
        note.set_delta_pitch(vec![0.0, 12.0]);
        note.set_pitch_offset(-12.0);
        let f0 = note.compute_f0_from_delta();
        assert_eq!(f0.len(), 4);
        assert_relative_eq!(f0[0], 220.0, epsilon = 1e-3);
        assert_relative_eq!(f0[1], 440.0, epsilon = 1e-3);
        // Missing delta frames count as 0
        assert_relative_eq!(f0[3], 220.0, epsilon = 1e-3);
    }

    #[test]
    fn test_vibrato_offsets_pitch() {
        let mut note = Note::new(0, 100, 60.0);
        note.set_vibrato(Vibrato {
            enabled: true,
            rate_hz: 5.0,
            depth_semitones: 1.0,
            phase_radians: std::f32::consts::FRAC_PI_2,
        });
        assert_relative_eq!(note.pitch_at(0), 61.0, epsilon = 1e-4);
        let max = (0..100).map(|i| note.pitch_at(i)).fold(f32::MIN, f32::max);
        assert!(max <= 61.0 + 1e-4);
    }

    #[test]
    fn test_adjusted_f0_keeps_unvoiced() {
        let mut note = Note::new(0, 3, 57.0);
        note.set_f0_values(vec![220.0, 0.0, 220.0]);
        note.set_pitch_offset(12.0);
        let adj = note.adjusted_f0();
        assert_relative_eq!(adj[0], 440.0, epsilon = 1e-3);
        assert_eq!(adj[1], 0.0);
    }

    #[test]
    fn test_note_serde_roundtrip() {
        let mut note = Note::new(3, 9, 62.5);
        note.set_lyric("la");
        note.set_delta_pitch(vec![0.1, -0.2]);
        note.mark_dirty();
        let json = serde_json::to_string(&note).unwrap();
        let back: Note = serde_json::from_str(&json).unwrap();
        assert_eq!(back, note);
    }
}
