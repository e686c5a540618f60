//! Incremental resynthesis
//!
//! Only the region touched by edits is re-vocoded. The dirty frame range is
//! widened to the middle of the nearest silent run on each side so splice
//! points land in silence, rendered from a project snapshot and spliced back
//! into the live waveform.
//!
//! Requests arriving while a render runs are coalesced: the running job is
//! cancelled and exactly one rerun starts once it has finished.

use serde::{Deserialize, Serialize};

use rf_ml::Vocoder;
use rf_pitch::curves::resample_curve;
use rf_pitch::f0::interpolate_unvoiced;
use rf_pitch::{
    CenteredSpectralEngine, HOP_SIZE, MelConfig, MelSpectrogram, Note, Project, midi_to_freq,
};

use crate::error::{OfflineError, OfflineResult};
use crate::job::{CancelToken, JobId, next_job_id};

// ═══════════════════════════════════════════════════════════════════════════════
// STATE MACHINE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SynthState {
    Idle,
    Synthesizing,
    /// Running job was asked to stop, a rerun is queued
    Cancelling,
}

impl Default for SynthState {
    fn default() -> Self {
        Self::Idle
    }
}

/// Outcome of a resynthesis request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthRequest {
    /// Start a job with this id now
    Start(JobId),
    /// A job is running; it must be cancelled and will be followed by one rerun
    Coalesced,
}

/// What to do after a job reported back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishAction {
    /// Stale job id
    Ignore,
    Idle,
    /// Start the queued rerun with this id
    Rerun(JobId),
}

/// Coalescing scheduler for resynthesis jobs
#[derive(Debug, Default)]
pub struct IncrementalSynthesizer {
    state: SynthState,
    rerun_requested: bool,
    current: Option<JobId>,
}

impl IncrementalSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SynthState {
        self.state
    }

    pub fn current_job(&self) -> Option<JobId> {
        self.current
    }

    pub fn is_busy(&self) -> bool {
        self.state != SynthState::Idle
    }

    pub fn request(&mut self) -> SynthRequest {
        match self.state {
            SynthState::Idle => SynthRequest::Start(self.begin()),
            SynthState::Synthesizing | SynthState::Cancelling => {
                self.rerun_requested = true;
                self.state = SynthState::Cancelling;
                SynthRequest::Coalesced
            }
        }
    }

    /// Called once per terminal message of a resynthesis job
    pub fn on_finished(&mut self, job_id: JobId) -> FinishAction {
        if self.current != Some(job_id) {
            return FinishAction::Ignore;
        }
        self.current = None;
        if std::mem::take(&mut self.rerun_requested) {
            FinishAction::Rerun(self.begin())
        } else {
            self.state = SynthState::Idle;
            FinishAction::Idle
        }
    }

    /// Forget any running job (project replaced)
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn begin(&mut self) -> JobId {
        let id = next_job_id();
        self.current = Some(id);
        self.state = SynthState::Synthesizing;
        id
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// REGION PLANNING
// ═══════════════════════════════════════════════════════════════════════════════

/// Frame range to re-render, `start_frame..end_frame`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthesisRegion {
    pub start_frame: usize,
    pub end_frame: usize,
}

impl SynthesisRegion {
    pub fn len(&self) -> usize {
        self.end_frame - self.start_frame
    }

    pub fn is_empty(&self) -> bool {
        self.end_frame <= self.start_frame
    }
}

/// Dirty frame range clipped to the analyzed frames. `None` when no dirty
/// frame has mel and F0 to render from.
pub fn pending_range(project: &Project) -> Option<(usize, usize)> {
    let total = project.total_frames().min(project.audio_data().mel.num_frames());
    project
        .dirty_frame_range()
        .map(|(s, e)| (s.min(total), e.min(total)))
        .filter(|(s, e)| e > s)
}

/// Dirty range widened to silent splice points.
///
/// The left edge moves to the middle of the nearest run of at least
/// `silence_run` silent frames ending at or before the dirty start, or to
/// frame 0 when there is none. The right edge mirrors this.
pub fn plan_region(project: &Project, silence_run: usize) -> OfflineResult<SynthesisRegion> {
    let audio = project.audio_data();
    if !audio.has_analysis() {
        return Err(OfflineError::NotReady("no analysis to resynthesize".into()));
    }
    let total = project.total_frames().min(audio.mel.num_frames());
    let (dirty_start, dirty_end) =
        pending_range(project).ok_or(OfflineError::NothingToSynthesize)?;

    let silent = |i: usize| audio.is_silent_frame(i);
    let run = silence_run.max(1);

    let mut start_frame = 0;
    let mut i = dirty_start;
    while i > 0 {
        if !silent(i - 1) {
            i -= 1;
            continue;
        }
        let run_end = i;
        while i > 0 && silent(i - 1) {
            i -= 1;
        }
        if run_end - i >= run {
            start_frame = (i + run_end) / 2;
            break;
        }
    }

    let mut end_frame = total;
    let mut j = dirty_end;
    while j < total {
        if !silent(j) {
            j += 1;
            continue;
        }
        let run_start = j;
        while j < total && silent(j) {
            j += 1;
        }
        if j - run_start >= run {
            end_frame = (run_start + j).div_ceil(2);
            break;
        }
    }

    log::debug!(
        "Dirty frames {}..{} expanded to {}..{}",
        dirty_start,
        dirty_end,
        start_frame,
        end_frame
    );
    Ok(SynthesisRegion {
        start_frame,
        end_frame,
    })
}

// ═══════════════════════════════════════════════════════════════════════════════
// RENDERING
// ═══════════════════════════════════════════════════════════════════════════════

/// Rendered audio for a region plus the revision it was rendered from
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisResult {
    pub start_frame: usize,
    pub end_frame: usize,
    pub start_sample: usize,
    pub samples: Vec<f32>,
    pub revision: u64,
}

impl SynthesisResult {
    /// Splice into the project's waveform and clear the dirty state the
    /// render covered. Returns false when edits landed after the snapshot,
    /// in which case the audio is spliced but the notes stay dirty.
    pub fn apply_to(&self, project: &mut Project) -> bool {
        let waveform = &mut project.audio_data_mut().waveform;
        if self.start_sample < waveform.len() {
            let n = self
                .samples
                .len()
                .min((self.end_frame - self.start_frame) * HOP_SIZE)
                .min(waveform.len() - self.start_sample);
            waveform[self.start_sample..self.start_sample + n].copy_from_slice(&self.samples[..n]);
        }
        project.clear_dirty_in_range(self.start_frame, self.end_frame, self.revision)
    }
}

fn overlap(a: (usize, usize), b: (usize, usize)) -> Option<(usize, usize)> {
    let start = a.0.max(b.0);
    let end = a.1.min(b.1);
    (end > start).then_some((start, end))
}

fn is_repositioned(note: &Note) -> bool {
    note.is_stretched() || note.is_moved()
}

/// Mel frames for the region, with repositioned notes re-sampled from the
/// original waveform and their vacated source frames silenced.
fn region_mel(project: &Project, region: SynthesisRegion, token: &CancelToken) -> OfflineResult<MelSpectrogram> {
    let audio = project.audio_data();
    let bounds = (region.start_frame, region.end_frame);
    let mut mel = audio.mel.slice_frames(region.start_frame, region.end_frame)?;

    let repositioned: Vec<&Note> = project.notes().iter().filter(|n| is_repositioned(n)).collect();
    if repositioned.is_empty() {
        return Ok(mel);
    }

    let config = MelConfig::default();
    let silence = MelSpectrogram::from_rows(&[vec![config.log_floor.ln(); mel.num_mels()]], mel.num_mels());
    let covered = |frame: usize| project.notes().iter().any(|n| n.contains_frame(frame));

    for note in &repositioned {
        if let Some((s, e)) = overlap((note.src_start_frame(), note.src_end_frame()), bounds) {
            for frame in (s..e).filter(|&f| !covered(f)) {
                mel.replace_frames(frame - region.start_frame, &silence)?;
            }
        }
    }
    token.check()?;

    let engine = CenteredSpectralEngine::new(config)?;
    for note in &repositioned {
        let Some((s, e)) = overlap((note.start_frame(), note.end_frame()), bounds) else {
            continue;
        };
        let clip = engine.compute_time_stretched(
            &audio.original_waveform,
            note.src_start_frame(),
            note.src_end_frame(),
            note.duration_frames(),
        )?;
        if clip.num_frames() < e - note.start_frame() {
            continue;
        }
        let part = clip.slice_frames(s - note.start_frame(), e - note.start_frame())?;
        mel.replace_frames(s - region.start_frame, &part)?;
        token.check()?;
    }
    Ok(mel)
}

/// F0 for the region: interpolated through unvoiced frames, overridden by
/// each note's edited pitch, with the global offset applied throughout.
fn region_f0(project: &Project, region: SynthesisRegion, token: &CancelToken) -> OfflineResult<Vec<f32>> {
    let audio = project.audio_data();
    let (start, end) = (region.start_frame, region.end_frame);
    let global = project.global_pitch_offset();
    let ratio = 2.0f32.powf(global / 12.0);

    let mut f0 = interpolate_unvoiced(&audio.f0[start..end], &audio.voiced_mask[start..end]);
    for value in f0.iter_mut() {
        *value *= ratio;
    }

    for note in project.notes().iter().filter(|n| !n.is_rest()) {
        let Some((s, e)) = overlap((note.start_frame(), note.end_frame()), (start, end)) else {
            continue;
        };
        // Bridge unvoiced zeros before resampling
        let adjusted = (!note.has_delta_pitch()).then(|| {
            let detected = note.adjusted_f0();
            let voiced: Vec<bool> = detected.iter().map(|&f| f > 0.0).collect();
            resample_curve(&interpolate_unvoiced(&detected, &voiced), note.duration_frames())
        });

        for frame in s..e {
            token.check()?;
            let local = frame - note.start_frame();
            let value = match &adjusted {
                None => midi_to_freq(note.pitch_at(local) + global),
                Some(curve) => curve[local] * ratio,
            };
            if value > 0.0 {
                f0[frame - start] = value;
            }
        }
    }
    Ok(f0)
}

/// Vocode `region` of a project snapshot
pub fn render_region(
    project: &Project,
    region: SynthesisRegion,
    vocoder: &dyn Vocoder,
    token: &CancelToken,
) -> OfflineResult<SynthesisResult> {
    if !vocoder.is_loaded() {
        return Err(OfflineError::NotReady("vocoder not loaded".into()));
    }
    if region.is_empty() {
        return Err(OfflineError::NothingToSynthesize);
    }

    let mel = region_mel(project, region, token)?;
    let f0 = region_f0(project, region, token)?;
    token.check()?;

    let samples = vocoder.infer(&mel, &f0).map_err(|e| match e {
        rf_ml::MlError::InferenceFailed { reason } => OfflineError::InferenceFailure(reason),
        other => OfflineError::Ml(other),
    })?;
    if samples.is_empty() {
        return Err(OfflineError::InferenceFailure("vocoder returned no samples".into()));
    }
    token.check()?;

    log::debug!(
        "Resynthesized frames {}..{} ({} samples)",
        region.start_frame,
        region.end_frame,
        samples.len()
    );
    Ok(SynthesisResult {
        start_frame: region.start_frame,
        end_frame: region.end_frame,
        start_sample: region.start_frame * HOP_SIZE,
        samples,
        revision: project.revision(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rf_ml::{ExecutionProvider, MlResult};
    use rf_pitch::{AudioData, NUM_MELS};
    use std::path::Path;

    /// Emits f0 (Hz) as sample values, `HOP_SIZE` per frame
    struct EchoVocoder;

    impl Vocoder for EchoVocoder {
        fn load_model(&self, _: &Path, _: ExecutionProvider, _: i32) -> MlResult<()> {
            Ok(())
        }

        fn is_loaded(&self) -> bool {
            true
        }

        fn infer(&self, mel: &MelSpectrogram, f0: &[f32]) -> MlResult<Vec<f32>> {
            assert_eq!(mel.num_frames(), f0.len());
            Ok(f0.iter().flat_map(|&f| std::iter::repeat_n(f, HOP_SIZE)).collect())
        }
    }

    /// Voiced 220 Hz on `voiced` ranges, silent elsewhere
    fn project_with(frames: usize, voiced: &[(usize, usize)]) -> Project {
        let mut f0 = vec![0.0; frames];
        for &(s, e) in voiced {
            f0[s..e].fill(220.0);
        }
        let mask = rf_pitch::f0::voiced_mask(&f0);
        let mut audio = AudioData::new(vec![0.5; frames * HOP_SIZE], rf_pitch::SAMPLE_RATE);
        audio.mel = MelSpectrogram::from_rows(&vec![vec![-2.0; NUM_MELS]; frames], NUM_MELS);
        audio.set_f0(f0, mask).unwrap();
        Project::new(audio)
    }

    #[test]
    fn test_state_machine_coalesces() {
        let mut synth = IncrementalSynthesizer::new();
        let SynthRequest::Start(first) = synth.request() else {
            panic!("expected start");
        };
        assert_eq!(synth.state(), SynthState::Synthesizing);

        assert_eq!(synth.request(), SynthRequest::Coalesced);
        assert_eq!(synth.request(), SynthRequest::Coalesced);
        assert_eq!(synth.state(), SynthState::Cancelling);

        assert_eq!(synth.on_finished(first + 1000), FinishAction::Ignore);
        let FinishAction::Rerun(second) = synth.on_finished(first) else {
            panic!("expected rerun");
        };
        assert!(second > first);
        assert_eq!(synth.state(), SynthState::Synthesizing);

        assert_eq!(synth.on_finished(second), FinishAction::Idle);
        assert_eq!(synth.state(), SynthState::Idle);
        assert!(!synth.is_busy());
    }

    #[test]
    fn test_plan_nothing_dirty() {
        let project = project_with(100, &[(10, 90)]);
        assert!(matches!(
            plan_region(&project, 5),
            Err(OfflineError::NothingToSynthesize)
        ));
    }

    #[test]
    fn test_plan_requires_analysis() {
        let mut project = Project::new(AudioData::new(vec![0.0; 1024], 44100));
        project.mark_f0_dirty(0, 1);
        assert!(matches!(plan_region(&project, 5), Err(OfflineError::NotReady(_))));
    }

    #[test]
    fn test_plan_expands_to_silence_midpoints() {
        // voiced 10..40, silent 40..60, voiced 60..90, silent 90..100
        let mut project = project_with(100, &[(10, 40), (60, 90)]);
        project.set_notes(vec![Note::new(10, 40, 57.0), Note::new(60, 90, 57.0)]);
        project.set_note_pitch_offset(1, 2.0).unwrap();

        let region = plan_region(&project, 5).unwrap();
        assert_eq!(region.start_frame, 50);
        assert_eq!(region.end_frame, 95);
        assert_eq!(region.len(), 45);
    }

    #[test]
    fn test_plan_short_runs_ignored() {
        // silent run 40..43 is too short, so the left edge is the timeline start
        let mut project = project_with(100, &[(0, 40), (43, 100)]);
        project.mark_f0_dirty(60, 70);
        let region = plan_region(&project, 5).unwrap();
        assert_eq!(region, SynthesisRegion { start_frame: 0, end_frame: 100 });
    }

    #[test]
    fn test_render_applies_note_and_global_offsets() {
        let mut project = project_with(100, &[(10, 40), (60, 90)]);
        project.set_notes(vec![Note::new(10, 40, 57.0), Note::new(60, 90, 57.0)]);
        rf_pitch::curves::rebuild_curves_from_source(&mut project);
        project.set_note_pitch_offset(1, 12.0).unwrap();

        let region = plan_region(&project, 5).unwrap();
        let result = render_region(&project, region, &EchoVocoder, &CancelToken::new()).unwrap();
        assert_eq!(result.samples.len(), region.len() * HOP_SIZE);
        assert_eq!(result.start_sample, region.start_frame * HOP_SIZE);

        // frame 70 lies in the shifted note
        let at = (70 - region.start_frame) * HOP_SIZE;
        assert_relative_eq!(result.samples[at], 440.0, epsilon = 0.5);
        // frame 52 is unvoiced and interpolated from the original track
        let at = (52 - region.start_frame) * HOP_SIZE;
        assert_relative_eq!(result.samples[at], 220.0, epsilon = 0.5);
    }

    #[test]
    fn test_pending_range_clipped_to_analysis() {
        let mut project = project_with(100, &[(10, 90)]);
        project.mark_f0_dirty(150, 160);
        assert_eq!(project.dirty_frame_range(), Some((150, 160)));
        assert_eq!(pending_range(&project), None);

        project.mark_f0_dirty(95, 120);
        assert_eq!(pending_range(&project), Some((95, 100)));
    }

    #[test]
    fn test_stretched_note_f0_bridges_unvoiced_frames() {
        // detected contour has a two-frame dropout at 20..22
        let mut project = project_with(100, &[(10, 20), (22, 30)]);
        let mut note = Note::new(10, 30, 57.0);
        let mut detected = vec![220.0; 20];
        detected[10..12].fill(0.0);
        note.set_f0_values(detected);
        note.set_range(10, 50);
        project.set_notes(vec![note]);
        assert!(!project.notes()[0].has_delta_pitch());

        let region = SynthesisRegion { start_frame: 0, end_frame: 100 };
        let f0 = region_f0(&project, region, &CancelToken::new()).unwrap();
        for (frame, &hz) in f0.iter().enumerate().take(50).skip(10) {
            assert!((hz - 220.0).abs() < 0.5, "frame {} at {} Hz", frame, hz);
        }
    }

    #[test]
    fn test_render_cancelled() {
        let mut project = project_with(50, &[(0, 50)]);
        project.mark_f0_dirty(0, 50);
        let token = CancelToken::new();
        token.cancel();
        let region = SynthesisRegion { start_frame: 0, end_frame: 50 };
        let err = render_region(&project, region, &EchoVocoder, &token).unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_moved_note_silences_vacated_source() {
        let mut project = project_with(100, &[(10, 30)]);
        project.set_notes(vec![Note::new(10, 30, 57.0)]);
        project.move_note(0, 50).unwrap();

        let region = SynthesisRegion { start_frame: 0, end_frame: 100 };
        let mel = region_mel(&project, region, &CancelToken::new()).unwrap();
        let floor = MelConfig::default().log_floor.ln();
        assert_relative_eq!(mel.frame(15)[0], floor);
        // untouched frames keep the analysis mel
        assert_relative_eq!(mel.frame(5)[0], -2.0);
    }

    #[test]
    fn test_apply_splices_only_region() {
        let mut project = project_with(100, &[(10, 90)]);
        project.mark_f0_dirty(20, 30);
        let revision = project.revision();

        let result = SynthesisResult {
            start_frame: 20,
            end_frame: 30,
            start_sample: 20 * HOP_SIZE,
            samples: vec![0.1; 12 * HOP_SIZE],
            revision,
        };
        assert!(result.apply_to(&mut project));

        let wav = &project.audio_data().waveform;
        assert_eq!(wav[20 * HOP_SIZE - 1], 0.5);
        assert_eq!(wav[20 * HOP_SIZE], 0.1);
        assert_eq!(wav[30 * HOP_SIZE - 1], 0.1);
        // surplus vocoder output is not written past the region
        assert_eq!(wav[30 * HOP_SIZE], 0.5);
        assert!(!project.has_f0_dirty_range());
    }

    #[test]
    fn test_apply_after_newer_edit_keeps_dirty() {
        let mut project = project_with(100, &[(10, 90)]);
        project.mark_f0_dirty(20, 30);
        let stale = project.revision();
        project.mark_f0_dirty(25, 35);

        let result = SynthesisResult {
            start_frame: 20,
            end_frame: 35,
            start_sample: 20 * HOP_SIZE,
            samples: vec![0.1; 15 * HOP_SIZE],
            revision: stale,
        };
        assert!(!result.apply_to(&mut project));
        assert!(project.has_f0_dirty_range());
    }
}
