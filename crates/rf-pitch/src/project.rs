//! Project model
//!
//! A project owns one `AudioData` (waveform plus derived analysis) and the
//! ordered note list. Every edit marks the touched notes dirty and bumps the
//! revision, so background synthesis can tell whether its snapshot is stale.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::curves::resample_curve;
use crate::note::Note;
use crate::spectral::MelSpectrogram;
use crate::{HOP_SIZE, NUM_MELS, PitchError, PitchResult, SAMPLE_RATE};

/// Split points closer than this to either note edge are rejected
pub const SPLIT_MARGIN_FRAMES: usize = 5;

/// Waveform and derived per-frame analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioData {
    /// Mono PCM at `sample_rate`, spliced by resynthesis
    pub waveform: Vec<f32>,
    /// Waveform as loaded, never spliced
    pub original_waveform: Arc<Vec<f32>>,
    pub sample_rate: u32,
    /// Log-mel frames on the hop grid
    pub mel: MelSpectrogram,
    /// F0 per frame (Hz, 0 = unvoiced)
    pub f0: Vec<f32>,
    /// Parallel to `f0`
    pub voiced_mask: Vec<bool>,
    /// Smoothed note baseline (MIDI)
    pub base_pitch: Vec<f32>,
    /// Actual MIDI minus `base_pitch`
    pub delta_pitch: Vec<f32>,
}

impl Default for AudioData {
    fn default() -> Self {
        Self::new(Vec::new(), SAMPLE_RATE)
    }
}

impl AudioData {
    pub fn new(waveform: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            original_waveform: Arc::new(waveform.clone()),
            waveform,
            sample_rate,
            mel: MelSpectrogram::empty(NUM_MELS),
            f0: Vec::new(),
            voiced_mask: Vec::new(),
            base_pitch: Vec::new(),
            delta_pitch: Vec::new(),
        }
    }

    /// Frames on the analysis grid (F0 length)
    pub fn num_frames(&self) -> usize {
        self.f0.len()
    }

    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.waveform.len() as f64 / self.sample_rate as f64
    }

    /// Mel and F0 are both present
    pub fn has_analysis(&self) -> bool {
        !self.mel.is_empty() && !self.f0.is_empty()
    }

    /// Replace F0 and voicing together
    pub fn set_f0(&mut self, f0: Vec<f32>, voiced_mask: Vec<bool>) -> PitchResult<()> {
        if f0.len() != voiced_mask.len() {
            return Err(PitchError::InvalidConfig(format!(
                "f0 has {} frames, voicing mask {}",
                f0.len(),
                voiced_mask.len()
            )));
        }
        self.f0 = f0;
        self.voiced_mask = voiced_mask;
        Ok(())
    }

    /// Frame is unvoiced (or outside the track)
    pub fn is_silent_frame(&self, frame: usize) -> bool {
        !self.voiced_mask.get(frame).copied().unwrap_or(false)
            || self.f0.get(frame).copied().unwrap_or(0.0) <= 0.0
    }
}

/// Notes plus audio, with dirty-region bookkeeping
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Project {
    audio: AudioData,
    notes: Vec<Note>,
    global_pitch_offset: f32,
    /// Raw F0 edits awaiting resynthesis, `start..end`
    f0_dirty_range: Option<(usize, usize)>,
    revision: u64,
}

fn union(a: Option<(usize, usize)>, b: (usize, usize)) -> (usize, usize) {
    match a {
        Some((s, e)) => (s.min(b.0), e.max(b.1)),
        None => b,
    }
}

impl Project {
    pub fn new(audio: AudioData) -> Self {
        Self {
            audio,
            ..Default::default()
        }
    }

    pub fn audio_data(&self) -> &AudioData {
        &self.audio
    }

    pub fn audio_data_mut(&mut self) -> &mut AudioData {
        &mut self.audio
    }

    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    /// Direct note access. Callers editing pitch or timing must mark notes dirty.
    pub fn notes_mut(&mut self) -> &mut Vec<Note> {
        &mut self.notes
    }

    /// Replace all notes (sorted by start frame)
    pub fn set_notes(&mut self, mut notes: Vec<Note>) {
        notes.sort_by_key(|n| n.start_frame());
        self.notes = notes;
        self.revision += 1;
    }

    pub fn note(&self, index: usize) -> PitchResult<&Note> {
        self.notes.get(index).ok_or(PitchError::NoteIndex(index))
    }

    fn note_mut(&mut self, index: usize) -> PitchResult<&mut Note> {
        self.notes.get_mut(index).ok_or(PitchError::NoteIndex(index))
    }

    /// Incremented on every edit
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn total_frames(&self) -> usize {
        self.audio.num_frames()
    }

    // ── Dirty tracking ──

    pub fn has_dirty_notes(&self) -> bool {
        self.notes.iter().any(|n| n.is_dirty())
    }

    pub fn has_f0_dirty_range(&self) -> bool {
        self.f0_dirty_range.is_some()
    }

    pub fn f0_dirty_range(&self) -> Option<(usize, usize)> {
        self.f0_dirty_range
    }

    /// Flag `start..end` of the raw F0 track as edited
    pub fn mark_f0_dirty(&mut self, start: usize, end: usize) {
        if end <= start {
            return;
        }
        self.f0_dirty_range = Some(union(self.f0_dirty_range, (start, end)));
        self.revision += 1;
    }

    /// Union of dirty notes' source and output ranges and the F0 dirty range
    pub fn dirty_frame_range(&self) -> Option<(usize, usize)> {
        let mut range = self.f0_dirty_range;
        for note in self.notes.iter().filter(|n| n.is_dirty()) {
            range = Some(union(range, (note.src_start_frame(), note.src_end_frame())));
            range = Some(union(range, (note.start_frame(), note.end_frame())));
        }
        range.filter(|(s, e)| e > s)
    }

    /// Clear dirty state covered by `start..end` if no edit landed since
    /// `revision`. Returns whether anything was cleared.
    pub fn clear_dirty_in_range(&mut self, start: usize, end: usize, revision: u64) -> bool {
        if self.revision != revision {
            return false;
        }
        for note in &mut self.notes {
            let inside = note.start_frame() >= start
                && note.end_frame() <= end
                && note.src_start_frame() >= start
                && note.src_end_frame() <= end;
            if inside {
                note.clear_dirty();
            }
        }
        if let Some((s, e)) = self.f0_dirty_range {
            if s >= start && e <= end {
                self.f0_dirty_range = None;
            }
        }
        true
    }

    // ── Edits ──

    pub fn global_pitch_offset(&self) -> f32 {
        self.global_pitch_offset
    }

    /// Shift every note; all notes become dirty
    pub fn set_global_pitch_offset(&mut self, semitones: f32) {
        self.global_pitch_offset = semitones;
        self.notes.iter_mut().for_each(Note::mark_dirty);
        self.revision += 1;
    }

    pub fn set_note_pitch_offset(&mut self, index: usize, semitones: f32) -> PitchResult<()> {
        let note = self.note_mut(index)?;
        note.set_pitch_offset(semitones);
        note.mark_dirty();
        self.revision += 1;
        Ok(())
    }

    /// Change the base pitch, keeping the delta curve
    pub fn set_note_midi(&mut self, index: usize, midi: f32) -> PitchResult<()> {
        let note = self.note_mut(index)?;
        note.set_midi_note(midi);
        note.mark_dirty();
        self.revision += 1;
        Ok(())
    }

    /// Move a note to `new_start`, keeping its length. Returns its new index.
    pub fn move_note(&mut self, index: usize, new_start: usize) -> PitchResult<usize> {
        let note = self.note(index)?;
        let duration = note.duration_frames();
        self.reposition(index, new_start, new_start + duration)
    }

    /// Stretch a note to `new_start..new_end`; its delta curve is resampled.
    /// Returns its new index.
    pub fn stretch_note(
        &mut self,
        index: usize,
        new_start: usize,
        new_end: usize,
    ) -> PitchResult<usize> {
        if new_end <= new_start {
            return Err(PitchError::FrameRange {
                start: new_start,
                end: new_end,
                total: self.total_frames(),
            });
        }
        let note = self.note_mut(index)?;
        let delta = resample_curve(note.delta_pitch(), new_end - new_start);
        note.set_delta_pitch(delta);
        self.reposition(index, new_start, new_end)
    }

    fn reposition(&mut self, index: usize, start: usize, end: usize) -> PitchResult<usize> {
        let mut note = self.notes.remove(index);
        let (old_start, old_end) = (note.start_frame(), note.end_frame());
        note.set_range(start, end);
        note.mark_dirty();
        // The old location must be rendered again without this note
        self.mark_f0_dirty(old_start, old_end);
        let pos = self.notes.partition_point(|n| n.start_frame() <= start);
        self.notes.insert(pos, note);
        self.revision += 1;
        Ok(pos)
    }

    /// Split a note at output frame `frame`; the right half is inserted after it.
    ///
    /// Source clips (waveform and mel) are cached before splitting so both
    /// halves keep their original material.
    pub fn split_note_at_frame(&mut self, index: usize, frame: usize) -> PitchResult<()> {
        let note = self.note(index)?;
        let (start, end) = (note.start_frame(), note.end_frame());
        if frame <= start + SPLIT_MARGIN_FRAMES || frame + SPLIT_MARGIN_FRAMES >= end {
            return Err(PitchError::InvalidSplit { index, frame });
        }

        let (src_start, src_end) = (note.src_start_frame(), note.src_end_frame());
        let src_len = src_end - src_start;
        let out_offset = frame - start;
        let src_offset = ((out_offset as f32 / note.stretch_ratio()).round() as usize)
            .clamp(1, src_len.saturating_sub(1).max(1));
        let src_split = src_start + src_offset;

        let clip_waveform = if note.has_clip_waveform() {
            note.clip_waveform().to_vec()
        } else {
            let original = &self.audio.original_waveform;
            let a = (src_start * HOP_SIZE).min(original.len());
            let b = (src_end * HOP_SIZE).min(original.len()).max(a);
            original[a..b].to_vec()
        };
        let clip_mel = match note.clip_mel() {
            Some(mel) => Some(mel.clone()),
            None => {
                let frames = self.audio.mel.num_frames();
                self.audio
                    .mel
                    .slice_frames(src_start.min(frames), src_end.min(frames))
                    .ok()
            }
        };

        let mut left = note.clone();
        let mut right = note.clone();

        left.set_range(start, frame);
        left.set_src_range(src_start, src_split);
        right.set_range(frame, end);
        right.set_src_range(src_split, src_end);
        right.set_selected(false);
        right.set_phoneme("");

        let delta = note.delta_pitch();
        let d = out_offset.min(delta.len());
        left.set_delta_pitch(delta[..d].to_vec());
        right.set_delta_pitch(delta[d..].to_vec());

        let f0 = note.f0_values();
        let k = src_offset.min(f0.len());
        left.set_f0_values(f0[..k].to_vec());
        right.set_f0_values(f0[k..].to_vec());

        let w = (src_offset * HOP_SIZE).min(clip_waveform.len());
        left.set_clip_waveform(clip_waveform[..w].to_vec());
        right.set_clip_waveform(clip_waveform[w..].to_vec());

        match clip_mel {
            Some(mel) => {
                let n = mel.num_frames();
                let m = src_offset.min(n);
                left.set_clip_mel(mel.slice_frames(0, m).ok());
                right.set_clip_mel(mel.slice_frames(m, n).ok());
            }
            None => {
                left.set_clip_mel(None);
                right.set_clip_mel(None);
            }
        }

        left.mark_dirty();
        right.mark_dirty();
        self.notes[index] = left;
        self.notes.insert(index + 1, right);
        self.revision += 1;
        Ok(())
    }

    /// Merge note `index` with the note after it.
    ///
    /// The merged note keeps the first note's pitch; the gap between them
    /// gets a zero delta.
    pub fn merge_notes(&mut self, index: usize) -> PitchResult<()> {
        if index + 1 >= self.notes.len() {
            return Err(PitchError::NoteIndex(index + 1));
        }
        let second = self.notes.remove(index + 1);
        let total = self.audio.f0.len();
        let first = &mut self.notes[index];

        let start = first.start_frame().min(second.start_frame());
        let end = first.end_frame().max(second.end_frame());
        let src_start = first.src_start_frame().min(second.src_start_frame());
        let src_end = first.src_end_frame().max(second.src_end_frame());

        let mut delta = first.delta_pitch().to_vec();
        delta.resize(second.start_frame().saturating_sub(start), 0.0);
        delta.extend_from_slice(second.delta_pitch());
        delta.resize(end - start, 0.0);

        let f0_values = if src_end <= total {
            self.audio.f0[src_start..src_end].to_vec()
        } else {
            [first.f0_values(), second.f0_values()].concat()
        };

        first.set_range(start, end);
        first.set_src_range(src_start, src_end);
        first.set_delta_pitch(delta);
        first.set_f0_values(f0_values);
        first.set_clip_waveform(Vec::new());
        first.set_clip_mel(None);
        first.mark_dirty();
        self.revision += 1;
        Ok(())
    }

    /// Remove a note; its range is queued for resynthesis
    pub fn remove_note(&mut self, index: usize) -> PitchResult<Note> {
        if index >= self.notes.len() {
            return Err(PitchError::NoteIndex(index));
        }
        let note = self.notes.remove(index);
        self.mark_f0_dirty(note.start_frame(), note.end_frame());
        self.revision += 1;
        Ok(note)
    }

    /// Insert a note keeping start-frame order. Returns its index.
    pub fn add_note(&mut self, mut note: Note) -> usize {
        note.mark_dirty();
        let pos = self
            .notes
            .partition_point(|n| n.start_frame() <= note.start_frame());
        self.notes.insert(pos, note);
        self.revision += 1;
        pos
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi_to_freq;

    fn project_with_notes() -> Project {
        let frames = 200;
        let f0 = vec![midi_to_freq(60.0); frames];
        let mut audio = AudioData::new(vec![0.1; frames * HOP_SIZE], SAMPLE_RATE);
        audio.set_f0(f0.clone(), vec![true; frames]).unwrap();
        let mut project = Project::new(audio);
        let mut a = Note::new(10, 50, 60.0);
        a.set_f0_values(f0[10..50].to_vec());
        a.set_delta_pitch(vec![0.25; 40]);
        let b = Note::new(100, 140, 62.0);
        project.set_notes(vec![b, a]);
        project
    }

    #[test]
    fn test_set_notes_sorted() {
        let p = project_with_notes();
        assert_eq!(p.notes()[0].start_frame(), 10);
        assert_eq!(p.notes()[1].start_frame(), 100);
        assert!(!p.has_dirty_notes());
        assert!(p.dirty_frame_range().is_none());
    }

    #[test]
    fn test_set_f0_length_mismatch() {
        let mut audio = AudioData::default();
        assert!(audio.set_f0(vec![100.0; 3], vec![true; 2]).is_err());
    }

    #[test]
    fn test_pitch_offset_marks_dirty() {
        let mut p = project_with_notes();
        let rev = p.revision();
        p.set_note_pitch_offset(1, 2.0).unwrap();
        assert!(p.notes()[1].is_dirty());
        assert!(!p.notes()[0].is_dirty());
        assert!(p.revision() > rev);
        assert_eq!(p.dirty_frame_range(), Some((100, 140)));
        assert!(p.set_note_pitch_offset(9, 1.0).is_err());
    }

    #[test]
    fn test_dirty_range_includes_f0_range() {
        let mut p = project_with_notes();
        p.set_note_midi(0, 61.0).unwrap();
        p.mark_f0_dirty(150, 160);
        assert!(p.has_f0_dirty_range());
        assert_eq!(p.dirty_frame_range(), Some((10, 160)));
    }

    #[test]
    fn test_move_note_reorders_and_covers_old_range() {
        let mut p = project_with_notes();
        let idx = p.move_note(0, 150).unwrap();
        assert_eq!(idx, 1);
        let moved = &p.notes()[1];
        assert_eq!((moved.start_frame(), moved.end_frame()), (150, 190));
        assert_eq!((moved.src_start_frame(), moved.src_end_frame()), (10, 50));
        assert_eq!(p.dirty_frame_range(), Some((10, 190)));
    }

    #[test]
    fn test_stretch_resamples_delta() {
        let mut p = project_with_notes();
        p.stretch_note(0, 10, 90).unwrap();
        let n = &p.notes()[0];
        assert_eq!(n.delta_pitch().len(), 80);
        assert!((n.stretch_ratio() - 2.0).abs() < 1e-6);
        assert!(n.is_stretched());
        assert!(p.stretch_note(0, 10, 10).is_err());
    }

    #[test]
    fn test_split_note() {
        let mut p = project_with_notes();
        p.split_note_at_frame(0, 30).unwrap();
        assert_eq!(p.notes().len(), 3);
        let (l, r) = (&p.notes()[0], &p.notes()[1]);
        assert_eq!((l.start_frame(), l.end_frame()), (10, 30));
        assert_eq!((r.start_frame(), r.end_frame()), (30, 50));
        assert_eq!((l.src_start_frame(), l.src_end_frame()), (10, 30));
        assert_eq!((r.src_start_frame(), r.src_end_frame()), (30, 50));
        assert_eq!(l.delta_pitch().len(), 20);
        assert_eq!(r.f0_values().len(), 20);
        assert_eq!(l.clip_waveform().len(), 20 * HOP_SIZE);
        assert_eq!(r.clip_waveform().len(), 20 * HOP_SIZE);
        assert!(l.is_dirty() && r.is_dirty());
    }

    #[test]
    fn test_split_margin() {
        let mut p = project_with_notes();
        assert!(p.split_note_at_frame(0, 15).is_err());
        assert!(p.split_note_at_frame(0, 45).is_err());
        assert!(p.split_note_at_frame(0, 16).is_ok());
    }

    #[test]
    fn test_merge_notes() {
        let mut p = project_with_notes();
        p.merge_notes(0).unwrap();
        assert_eq!(p.notes().len(), 1);
        let n = &p.notes()[0];
        assert_eq!((n.start_frame(), n.end_frame()), (10, 140));
        assert_eq!(n.delta_pitch().len(), 130);
        assert_eq!(n.f0_values().len(), 130);
        assert!(p.merge_notes(0).is_err());
    }

    #[test]
    fn test_add_and_remove() {
        let mut p = project_with_notes();
        let idx = p.add_note(Note::new(60, 80, 64.0));
        assert_eq!(idx, 1);
        let removed = p.remove_note(1).unwrap();
        assert_eq!(removed.start_frame(), 60);
        assert_eq!(p.f0_dirty_range(), Some((60, 80)));
    }

    #[test]
    fn test_global_offset_marks_all() {
        let mut p = project_with_notes();
        p.set_global_pitch_offset(1.0);
        assert!(p.notes().iter().all(|n| n.is_dirty()));
        assert_eq!(p.global_pitch_offset(), 1.0);
    }

    #[test]
    fn test_clear_dirty_respects_revision() {
        let mut p = project_with_notes();
        p.set_note_pitch_offset(0, 1.0).unwrap();
        let rev = p.revision();
        p.set_note_pitch_offset(1, 1.0).unwrap();

        // Stale revision: nothing cleared
        assert!(!p.clear_dirty_in_range(0, 200, rev));
        assert!(p.notes()[0].is_dirty());

        let rev = p.revision();
        assert!(p.clear_dirty_in_range(0, 60, rev));
        assert!(!p.notes()[0].is_dirty());
        assert!(p.notes()[1].is_dirty());
    }

    #[test]
    fn test_project_serde_roundtrip() {
        let mut p = project_with_notes();
        p.set_note_pitch_offset(0, 1.5).unwrap();
        let json = serde_json::to_string(&p).unwrap();
        let back: Project = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }
}
