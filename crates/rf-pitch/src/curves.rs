//! Pitch curve rebuilding from the detected F0

use crate::base_pitch::{BasePitchCurve, NoteSegment};
use crate::freq_to_midi;
use crate::project::Project;

/// Linear resample of a per-frame curve to `new_len` points
pub fn resample_curve(values: &[f32], new_len: usize) -> Vec<f32> {
    match (values.len(), new_len) {
        (_, 0) => Vec::new(),
        (0, n) => vec![0.0; n],
        (1, n) => vec![values[0]; n],
        (len, n) if len == n => values.to_vec(),
        (len, n) => {
            let scale = (len - 1) as f64 / (n.max(2) - 1) as f64;
            (0..n)
                .map(|i| {
                    let pos = i as f64 * scale;
                    let idx = (pos as usize).min(len - 1);
                    let next = (idx + 1).min(len - 1);
                    let frac = (pos - idx as f64) as f32;
                    values[idx] * (1.0 - frac) + values[next] * frac
                })
                .collect()
        }
    }
}

/// Recompute base pitch, project-wide delta pitch and each note's
/// `f0_values` / `delta_pitch` from the project's F0 track.
///
/// Note deltas are `actual MIDI - note MIDI` over the source range, 0 on
/// unvoiced frames, resampled to the output length for stretched notes.
pub fn rebuild_curves_from_source(project: &mut Project) {
    let total = project.audio_data().f0.len();
    let segments: Vec<NoteSegment> = project
        .notes()
        .iter()
        .filter(|n| !n.is_rest())
        .map(NoteSegment::from)
        .collect();

    let base = BasePitchCurve::generate_for_notes(&segments, total);
    let delta = BasePitchCurve::calculate_delta_pitch(&project.audio_data().f0, &base, 0);

    let f0 = project.audio_data().f0.clone();
    for note in project.notes_mut() {
        let start = note.src_start_frame().min(total);
        let end = note.src_end_frame().min(total).max(start);
        let src_f0 = &f0[start..end];

        let midi = note.midi_note();
        let note_delta: Vec<f32> = src_f0
            .iter()
            .map(|&f| if f > 0.0 { freq_to_midi(f) - midi } else { 0.0 })
            .collect();

        note.set_f0_values(src_f0.to_vec());
        note.set_delta_pitch(resample_curve(&note_delta, note.duration_frames()));
    }

    let audio = project.audio_data_mut();
    audio.base_pitch = base;
    audio.delta_pitch = delta;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::note::Note;
    use crate::project::AudioData;
    use crate::{f0::voiced_mask, midi_to_freq};
    use approx::assert_relative_eq;

    #[test]
    fn test_resample_curve() {
        assert_eq!(resample_curve(&[1.0, 3.0], 3), vec![1.0, 2.0, 3.0]);
        assert_eq!(resample_curve(&[5.0], 4), vec![5.0; 4]);
        assert!(resample_curve(&[1.0, 2.0], 0).is_empty());
        assert_eq!(resample_curve(&[], 2), vec![0.0, 0.0]);
    }

    #[test]
    fn test_rebuild_fills_note_curves() {
        let mut f0 = vec![midi_to_freq(60.5); 40];
        f0[10] = 0.0;
        let mut audio = AudioData::new(vec![0.0; 40 * 512], crate::SAMPLE_RATE);
        audio.voiced_mask = voiced_mask(&f0);
        audio.f0 = f0;

        let mut project = Project::new(audio);
        project.set_notes(vec![Note::new(0, 40, 60.0)]);
        rebuild_curves_from_source(&mut project);

        let note = &project.notes()[0];
        assert_eq!(note.f0_values().len(), 40);
        assert_eq!(note.delta_pitch().len(), 40);
        assert_relative_eq!(note.delta_pitch()[0], 0.5, epsilon = 1e-3);
        assert_eq!(note.delta_pitch()[10], 0.0);

        let audio = project.audio_data();
        assert_eq!(audio.base_pitch.len(), 40);
        assert_relative_eq!(audio.base_pitch[20], 60.0, epsilon = 1e-4);
        assert_relative_eq!(audio.delta_pitch[20], 0.5, epsilon = 1e-3);
    }
}
