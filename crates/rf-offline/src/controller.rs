//! Editor controller
//!
//! Owns the project and runs every long operation on a background worker:
//! loading, analysis, segmentation, full render, incremental resynthesis and
//! model reloads. Workers report through a channel; the owner drains it with
//! [`EditorController::process_pending`] and receives [`EditorEvent`]s.
//!
//! Delivery rules:
//! - a message from a job that is no longer current for its category is dropped
//! - an explicitly cancelled job yields exactly one `Cancelled` event
//! - superseded or coalesced jobs yield nothing

use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};

use rf_pitch::{AudioData, MelSpectrogram, Note, Project, SAMPLE_RATE};

use crate::config::EditorConfig;
use crate::decoder::AudioDecoder;
use crate::error::{OfflineError, OfflineResult};
use crate::job::{CancelToken, JobCategory, JobId, Progress, ProgressGate, WorkerSlot, next_job_id};
use crate::pipeline::{
    AnalysisContext, ModelServices, PipelineState, ReloadReport, analyze_and_segment,
    analyze_audio, prepare_audio, render_full, segment_into_notes,
};
use crate::synthesizer::{
    FinishAction, IncrementalSynthesizer, SynthRequest, SynthState, SynthesisResult,
    pending_range, plan_region, render_region,
};

/// Jobs that read the installed project and must not outlive it
const PROJECT_JOBS: [JobCategory; 4] = [
    JobCategory::Analyze,
    JobCategory::Segment,
    JobCategory::Render,
    JobCategory::Resynthesize,
];

/// Poll interval while only retired workers are still winding down
const RETIRED_POLL: Duration = Duration::from_millis(5);

// ═══════════════════════════════════════════════════════════════════════════════
// EVENTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Notification delivered to the owner
#[derive(Debug, Clone)]
pub enum EditorEvent {
    Progress {
        category: JobCategory,
        fraction: f64,
        stage: String,
    },
    /// Notes collected so far by the streaming segmenter
    StreamingNotes { notes: Vec<Note> },
    ProjectLoaded {
        original_waveform: Arc<Vec<f32>>,
        note_count: usize,
    },
    /// Re-analysis curves replaced the project's curves
    AnalysisMerged,
    NotesChanged { note_count: usize },
    Rendered { samples: Vec<f32> },
    /// A region of the waveform was replaced
    Synthesized {
        start_frame: usize,
        end_frame: usize,
        start_sample: usize,
        num_samples: usize,
    },
    ModelsReloaded(ReloadReport),
    Cancelled { category: JobCategory },
    Failed { category: JobCategory, message: String },
}

/// Called after each spliced resynthesis result. Errors are logged only.
pub type DownstreamHook = Box<dyn FnMut(&SynthesisResult) -> Result<(), String> + Send>;

/// Curves produced by a re-analysis
#[derive(Debug, Clone)]
struct AnalysisCurves {
    mel: MelSpectrogram,
    f0: Vec<f32>,
    voiced_mask: Vec<bool>,
    base_pitch: Vec<f32>,
    delta_pitch: Vec<f32>,
}

impl AnalysisCurves {
    fn from_project(project: Project) -> Self {
        let audio = project.audio_data();
        Self {
            mel: audio.mel.clone(),
            f0: audio.f0.clone(),
            voiced_mask: audio.voiced_mask.clone(),
            base_pitch: audio.base_pitch.clone(),
            delta_pitch: audio.delta_pitch.clone(),
        }
    }

    fn merge_into(self, project: &mut Project) {
        let audio = project.audio_data_mut();
        audio.mel = self.mel;
        audio.f0 = self.f0;
        audio.voiced_mask = self.voiced_mask;
        audio.base_pitch = self.base_pitch;
        audio.delta_pitch = self.delta_pitch;
    }
}

enum WorkerPayload {
    Progress(Progress),
    /// Load job finished decoding and started analysis
    PhaseAnalyzing,
    StreamingNotes(Vec<Note>),
    Loaded(Box<Project>),
    Analyzed(Box<AnalysisCurves>),
    Segmented(Vec<Note>),
    Rendered(Vec<f32>),
    Synthesized(SynthesisResult),
    ModelsReloaded(ReloadReport),
    Failed(OfflineError),
    Cancelled,
}

impl WorkerPayload {
    fn is_terminal(&self) -> bool {
        !matches!(
            self,
            WorkerPayload::Progress(_)
                | WorkerPayload::PhaseAnalyzing
                | WorkerPayload::StreamingNotes(_)
        )
    }
}

struct WorkerMessage {
    category: JobCategory,
    job_id: JobId,
    payload: WorkerPayload,
}

/// Worker-side handle: cancellation plus the reply channel
struct JobContext {
    category: JobCategory,
    id: JobId,
    token: CancelToken,
    tx: Sender<WorkerMessage>,
}

impl JobContext {
    fn send(&self, payload: WorkerPayload) {
        // Receiver gone means the controller was dropped
        let _ = self.tx.send(WorkerMessage {
            category: self.category,
            job_id: self.id,
            payload,
        });
    }

    fn progress(&self, fraction: f64, stage: &str) {
        self.send(WorkerPayload::Progress(Progress::new(fraction, stage)));
    }
}

enum LoadSource {
    File(PathBuf),
    Host {
        samples: Vec<f32>,
        channels: usize,
        sample_rate: u32,
    },
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONTROLLER
// ═══════════════════════════════════════════════════════════════════════════════

/// Background job orchestrator for one editing session
pub struct EditorController {
    config: EditorConfig,
    services: Arc<ModelServices>,
    project: Option<Project>,
    tx: Sender<WorkerMessage>,
    rx: Receiver<WorkerMessage>,
    slots: HashMap<JobCategory, WorkerSlot>,
    /// In-flight job per category
    current: HashMap<JobCategory, JobId>,
    user_cancelled: HashSet<JobId>,
    gates: HashMap<JobCategory, ProgressGate>,
    load_phase: PipelineState,
    synthesizer: IncrementalSynthesizer,
    downstream: Option<DownstreamHook>,
}

impl EditorController {
    /// Controller with the ONNX-backed model services
    pub fn new(config: EditorConfig) -> OfflineResult<Self> {
        Self::with_services(config, ModelServices::default())
    }

    pub fn with_services(config: EditorConfig, services: ModelServices) -> OfflineResult<Self> {
        config.validate()?;
        let (tx, rx) = unbounded();
        Ok(Self {
            config,
            services: Arc::new(services),
            project: None,
            tx,
            rx,
            slots: HashMap::new(),
            current: HashMap::new(),
            user_cancelled: HashSet::new(),
            gates: HashMap::new(),
            load_phase: PipelineState::Idle,
            synthesizer: IncrementalSynthesizer::new(),
            downstream: None,
        })
    }

    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    /// Replace the configuration. Takes effect for jobs started afterwards.
    pub fn set_config(&mut self, config: EditorConfig) -> OfflineResult<()> {
        config.validate()?;
        self.config = config;
        Ok(())
    }

    pub fn set_downstream_hook(&mut self, hook: DownstreamHook) {
        self.downstream = Some(hook);
    }

    pub fn project(&self) -> Option<&Project> {
        self.project.as_ref()
    }

    /// Edit the project in place. `None` when nothing is loaded.
    pub fn with_project_mut<R>(&mut self, f: impl FnOnce(&mut Project) -> R) -> Option<R> {
        self.project.as_mut().map(f)
    }

    pub fn state(&self) -> PipelineState {
        if self.current.contains_key(&JobCategory::Load) {
            return self.load_phase;
        }
        match self.synthesizer.state() {
            SynthState::Synthesizing => PipelineState::Synthesizing,
            SynthState::Cancelling => PipelineState::Cancelling,
            SynthState::Idle => {
                if self.current.contains_key(&JobCategory::Analyze)
                    || self.current.contains_key(&JobCategory::Segment)
                {
                    PipelineState::Analyzing
                } else {
                    PipelineState::Idle
                }
            }
        }
    }

    /// Any job using the inference models is in flight
    pub fn is_inference_busy(&self) -> bool {
        self.current.keys().any(|c| c.uses_inference())
    }

    /// Job in flight for `category`
    pub fn current_job(&self, category: JobCategory) -> Option<JobId> {
        self.current.get(&category).copied()
    }

    // ── Job launching ──

    fn launch<F>(&mut self, category: JobCategory, id: JobId, body: F) -> OfflineResult<JobId>
    where
        F: FnOnce(&JobContext) -> OfflineResult<WorkerPayload> + Send + 'static,
    {
        self.current.insert(category, id);
        self.gates.entry(category).or_default().reset();

        let tx = self.tx.clone();
        let slot = self
            .slots
            .entry(category)
            .or_insert_with(|| WorkerSlot::new(category));

        let started = slot.start(id, move |token| {
            let job = JobContext {
                category,
                id,
                token,
                tx,
            };
            let payload = match panic::catch_unwind(AssertUnwindSafe(|| body(&job))) {
                Ok(Ok(payload)) => payload,
                Ok(Err(e)) if e.is_cancelled() => WorkerPayload::Cancelled,
                Ok(Err(e)) => WorkerPayload::Failed(e),
                Err(_) => WorkerPayload::Failed(OfflineError::WorkerPanicked(category.to_string())),
            };
            job.send(payload);
        });

        if let Err(e) = started {
            self.current.remove(&category);
            return Err(e);
        }
        log::debug!("Launched {} job {}", category, id);
        Ok(id)
    }

    /// Stop tracking a category's job and ask it to stop
    fn retire(&mut self, category: JobCategory) {
        if let Some(id) = self.current.remove(&category) {
            log::debug!("Retiring {} job {}", category, id);
            if let Some(slot) = self.slots.get(&category) {
                slot.cancel();
            }
        }
    }

    fn require_project(&self) -> OfflineResult<&Project> {
        self.project
            .as_ref()
            .ok_or_else(|| OfflineError::NotReady("no project loaded".into()))
    }

    // ── Loading ──

    /// Decode a file, analyze and segment it into a new project
    pub fn load_audio_file(&mut self, path: impl Into<PathBuf>) -> OfflineResult<JobId> {
        self.start_load(LoadSource::File(path.into()))
    }

    /// Use an interleaved host buffer as the new project's audio
    pub fn set_host_audio(
        &mut self,
        samples: Vec<f32>,
        channels: usize,
        sample_rate: u32,
    ) -> OfflineResult<JobId> {
        if channels == 0 || sample_rate == 0 {
            return Err(OfflineError::Config(format!(
                "invalid host format: {} channels at {} Hz",
                channels, sample_rate
            )));
        }
        self.start_load(LoadSource::Host {
            samples,
            channels,
            sample_rate,
        })
    }

    /// Retire every job that reads the installed project
    fn retire_project_jobs(&mut self) {
        for category in PROJECT_JOBS {
            self.retire(category);
        }
        self.synthesizer.reset();
    }

    fn start_load(&mut self, source: LoadSource) -> OfflineResult<JobId> {
        self.retire_project_jobs();
        self.load_phase = PipelineState::Loading;

        let services = self.services.clone();
        let config = self.config.clone();
        self.launch(JobCategory::Load, next_job_id(), move |job| {
            job.progress(0.05, "Loading");
            let (samples, channels, sample_rate) = match source {
                LoadSource::File(path) => {
                    job.progress(0.10, "Reading audio file");
                    let decoded = AudioDecoder::decode(&path)?;
                    log::info!(
                        "Loaded {} ({:.2}s, {} Hz)",
                        path.display(),
                        decoded.duration(),
                        decoded.sample_rate
                    );
                    (decoded.samples, decoded.channels, decoded.sample_rate)
                }
                LoadSource::Host {
                    samples,
                    channels,
                    sample_rate,
                } => (samples, channels, sample_rate),
            };
            job.token.check()?;

            job.progress(0.18, "Resampling");
            let mono = prepare_audio(&samples, channels, sample_rate);
            drop(samples);
            job.token.check()?;

            job.progress(0.22, "Preparing project");
            let mut project = Project::new(AudioData::new(mono, SAMPLE_RATE));
            job.send(WorkerPayload::PhaseAnalyzing);

            job.progress(0.25, "Analyzing");
            let progress = |fraction: f64, stage: &str| job.progress(fraction, stage);
            let ctx = AnalysisContext {
                services: &services,
                config: &config,
                token: &job.token,
                progress: &progress,
            };
            analyze_and_segment(&mut project, &ctx, &mut |notes| {
                job.send(WorkerPayload::StreamingNotes(notes.to_vec()));
            })?;

            job.progress(0.95, "Finalizing");
            Ok(WorkerPayload::Loaded(Box::new(project)))
        })
    }

    /// Cancel the load job. Returns false when none is running.
    pub fn cancel_loading(&mut self) -> bool {
        self.cancel(JobCategory::Load)
    }

    /// Cancel the full render. Returns false when none is running.
    pub fn cancel_render(&mut self) -> bool {
        self.cancel(JobCategory::Render)
    }

    /// Explicit user cancellation of a category's job
    pub fn cancel(&mut self, category: JobCategory) -> bool {
        let Some(&id) = self.current.get(&category) else {
            return false;
        };
        self.user_cancelled.insert(id);
        if let Some(slot) = self.slots.get(&category) {
            slot.cancel();
        }
        if category == JobCategory::Load {
            self.load_phase = PipelineState::Cancelling;
        }
        log::info!("Cancelling {} job {}", category, id);
        true
    }

    // ── Analysis ──

    /// Re-run analysis on the current audio. Merges curves only.
    pub fn analyze_audio_async(&mut self) -> OfflineResult<JobId> {
        let mut snapshot = self.require_project()?.clone();
        let services = self.services.clone();
        let config = self.config.clone();

        self.launch(JobCategory::Analyze, next_job_id(), move |job| {
            let progress = |fraction: f64, stage: &str| job.progress(fraction, stage);
            let ctx = AnalysisContext {
                services: &services,
                config: &config,
                token: &job.token,
                progress: &progress,
            };
            analyze_audio(&mut snapshot, &ctx)?;
            Ok(WorkerPayload::Analyzed(Box::new(AnalysisCurves::from_project(
                snapshot,
            ))))
        })
    }

    /// Re-segment the current F0 into notes, replacing all notes
    pub fn segment_into_notes_async(&mut self) -> OfflineResult<JobId> {
        let mut snapshot = self.require_project()?.clone();
        let services = self.services.clone();
        let config = self.config.clone();

        self.launch(JobCategory::Segment, next_job_id(), move |job| {
            let progress = |fraction: f64, stage: &str| job.progress(fraction, stage);
            let ctx = AnalysisContext {
                services: &services,
                config: &config,
                token: &job.token,
                progress: &progress,
            };
            segment_into_notes(&mut snapshot, &ctx, &mut |notes| {
                job.send(WorkerPayload::StreamingNotes(notes.to_vec()));
            })?;
            Ok(WorkerPayload::Segmented(snapshot.notes().to_vec()))
        })
    }

    // ── Synthesis ──

    /// Vocode the whole project with the global pitch offset
    pub fn render_processed_audio(&mut self) -> OfflineResult<JobId> {
        let snapshot = self.require_project()?.clone();
        let services = self.services.clone();
        let config = self.config.clone();

        self.launch(JobCategory::Render, next_job_id(), move |job| {
            job.progress(0.0, "Rendering");
            if !services.ensure_vocoder(&config) {
                return Err(OfflineError::missing_model("vocoder", &config.model_paths().vocoder));
            }
            let samples = render_full(&snapshot, services.vocoder.as_ref(), &job.token)?;
            job.progress(1.0, "Rendered");
            Ok(WorkerPayload::Rendered(samples))
        })
    }

    /// Resynthesize dirty regions. Returns the started job id, or `None`
    /// when the request was coalesced into the running job.
    pub fn resynthesize(&mut self) -> OfflineResult<Option<JobId>> {
        let project = self.require_project()?;
        if project.dirty_frame_range().is_none() {
            return Err(OfflineError::NothingToSynthesize);
        }
        if !project.audio_data().has_analysis() {
            return Err(OfflineError::NotReady("no analysis to resynthesize".into()));
        }
        if pending_range(project).is_none() {
            return Err(OfflineError::NothingToSynthesize);
        }

        match self.synthesizer.request() {
            SynthRequest::Start(id) => {
                if let Err(e) = self.launch_resynthesis(id) {
                    self.synthesizer.on_finished(id);
                    return Err(e);
                }
                Ok(Some(id))
            }
            SynthRequest::Coalesced => {
                if let Some(slot) = self.slots.get(&JobCategory::Resynthesize) {
                    slot.cancel();
                }
                log::debug!("Resynthesis request coalesced");
                Ok(None)
            }
        }
    }

    fn launch_resynthesis(&mut self, id: JobId) -> OfflineResult<()> {
        let snapshot = self.require_project()?.clone();
        let services = self.services.clone();
        let config = self.config.clone();

        self.launch(JobCategory::Resynthesize, id, move |job| {
            let region = plan_region(&snapshot, config.silence_run_frames)?;
            if !services.ensure_vocoder(&config) {
                return Err(OfflineError::missing_model("vocoder", &config.model_paths().vocoder));
            }
            job.token.check()?;
            let result = render_region(&snapshot, region, services.vocoder.as_ref(), &job.token)?;
            Ok(WorkerPayload::Synthesized(result))
        })?;
        Ok(())
    }

    // ── Models ──

    /// Reload every model for the configured device.
    ///
    /// Synchronous reloads are refused while inference is running.
    pub fn reload_models(&mut self, asynchronous: bool) -> OfflineResult<Option<ReloadReport>> {
        if asynchronous {
            let services = self.services.clone();
            let config = self.config.clone();
            self.launch(JobCategory::ModelReload, next_job_id(), move |_job| {
                Ok(WorkerPayload::ModelsReloaded(services.reload(&config)))
            })?;
            return Ok(None);
        }
        if self.is_inference_busy() {
            return Err(OfflineError::NotReady("inference in progress".into()));
        }
        Ok(Some(self.services.reload(&self.config)))
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // DELIVERY
    // ═══════════════════════════════════════════════════════════════════════════

    /// Drain worker messages without blocking
    pub fn process_pending(&mut self) -> Vec<EditorEvent> {
        let mut events = Vec::new();
        while let Ok(msg) = self.rx.try_recv() {
            self.handle(msg, &mut events);
        }
        self.reap();
        events
    }

    /// Deliver messages until no job is in flight and every retired worker
    /// has exited, or `timeout` elapses
    pub fn run_until_idle(&mut self, timeout: Duration) -> Vec<EditorEvent> {
        let deadline = Instant::now() + timeout;
        let mut events = Vec::new();

        loop {
            while let Ok(msg) = self.rx.try_recv() {
                self.handle(msg, &mut events);
            }
            if self.current.is_empty() && !self.slots.values().any(WorkerSlot::is_running) {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                log::warn!("Timed out waiting for {} job(s)", self.current.len());
                break;
            }
            let wait = if self.current.is_empty() {
                RETIRED_POLL.min(deadline - now)
            } else {
                deadline - now
            };
            match self.rx.recv_timeout(wait) {
                Ok(msg) => self.handle(msg, &mut events),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        self.reap();
        events
    }

    fn reap(&mut self) {
        for slot in self.slots.values_mut() {
            slot.reap();
        }
    }

    fn handle(&mut self, msg: WorkerMessage, events: &mut Vec<EditorEvent>) {
        let WorkerMessage {
            category,
            job_id,
            payload,
        } = msg;

        if self.current.get(&category) != Some(&job_id) {
            log::debug!("Dropping message from stale {} job {}", category, job_id);
            if payload.is_terminal() {
                self.user_cancelled.remove(&job_id);
            }
            return;
        }

        if !payload.is_terminal() {
            if self.user_cancelled.contains(&job_id) {
                return;
            }
            match payload {
                WorkerPayload::Progress(p) => {
                    let gate = self.gates.entry(category).or_default();
                    if let Some(fraction) = gate.admit(p.fraction) {
                        events.push(EditorEvent::Progress {
                            category,
                            fraction,
                            stage: p.stage,
                        });
                    }
                }
                WorkerPayload::PhaseAnalyzing => self.load_phase = PipelineState::Analyzing,
                WorkerPayload::StreamingNotes(notes) => {
                    events.push(EditorEvent::StreamingNotes { notes });
                }
                _ => {}
            }
            return;
        }

        self.current.remove(&category);
        if category == JobCategory::Load {
            self.load_phase = PipelineState::Idle;
        }

        if self.user_cancelled.remove(&job_id) {
            log::info!("{} job {} cancelled", category, job_id);
            events.push(EditorEvent::Cancelled { category });
        } else {
            self.deliver(category, payload, events);
        }

        if category == JobCategory::Resynthesize {
            if let FinishAction::Rerun(next) = self.synthesizer.on_finished(job_id) {
                let rerun = if self.project.as_ref().is_some_and(|p| pending_range(p).is_some()) {
                    self.launch_resynthesis(next)
                } else {
                    Err(OfflineError::NothingToSynthesize)
                };
                if let Err(e) = rerun {
                    log::debug!("Resynthesis rerun skipped: {}", e);
                    self.synthesizer.on_finished(next);
                }
            }
        }
    }

    fn deliver(&mut self, category: JobCategory, payload: WorkerPayload, events: &mut Vec<EditorEvent>) {
        match payload {
            WorkerPayload::Loaded(project) => {
                // Jobs started against the previous project during the load
                self.retire_project_jobs();
                let original_waveform = project.audio_data().original_waveform.clone();
                let note_count = project.notes().len();
                self.project = Some(*project);
                log::info!("Project loaded with {} notes", note_count);
                events.push(EditorEvent::ProjectLoaded {
                    original_waveform,
                    note_count,
                });
            }
            WorkerPayload::Analyzed(curves) => {
                if let Some(project) = self.project.as_mut() {
                    curves.merge_into(project);
                    events.push(EditorEvent::AnalysisMerged);
                }
            }
            WorkerPayload::Segmented(notes) => {
                if let Some(project) = self.project.as_mut() {
                    project.set_notes(notes);
                    rf_pitch::curves::rebuild_curves_from_source(project);
                    events.push(EditorEvent::NotesChanged {
                        note_count: project.notes().len(),
                    });
                }
            }
            WorkerPayload::Rendered(samples) => events.push(EditorEvent::Rendered { samples }),
            WorkerPayload::Synthesized(result) => {
                let Some(project) = self.project.as_mut() else {
                    return;
                };
                if !result.apply_to(project) {
                    log::debug!("Project edited during resynthesis, regions stay dirty");
                }
                self.notify_downstream(&result);
                events.push(EditorEvent::Synthesized {
                    start_frame: result.start_frame,
                    end_frame: result.end_frame,
                    start_sample: result.start_sample,
                    num_samples: result.samples.len(),
                });
            }
            WorkerPayload::ModelsReloaded(report) => events.push(EditorEvent::ModelsReloaded(report)),
            WorkerPayload::Failed(e) => {
                log::error!("{} job failed: {}", category, e);
                events.push(EditorEvent::Failed {
                    category,
                    message: e.to_string(),
                });
            }
            WorkerPayload::Cancelled => log::debug!("{} job superseded", category),
            WorkerPayload::Progress(_)
            | WorkerPayload::PhaseAnalyzing
            | WorkerPayload::StreamingNotes(_) => {}
        }
    }

    fn notify_downstream(&mut self, result: &SynthesisResult) {
        let Some(hook) = self.downstream.as_mut() else {
            return;
        };
        match panic::catch_unwind(AssertUnwindSafe(|| hook(result))) {
            Ok(Ok(())) => {}
            Ok(Err(message)) => log::error!("{}", OfflineError::Downstream(message)),
            Err(_) => log::error!("{}", OfflineError::Downstream("hook panicked".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rf_pitch::{HOP_SIZE, NUM_MELS};

    #[test]
    fn test_requires_project() {
        let mut controller = EditorController::new(EditorConfig::default()).unwrap();
        assert!(matches!(
            controller.analyze_audio_async(),
            Err(OfflineError::NotReady(_))
        ));
        assert!(matches!(controller.resynthesize(), Err(OfflineError::NotReady(_))));
        assert!(!controller.cancel_loading());
        assert_eq!(controller.state(), PipelineState::Idle);
        assert!(!controller.is_inference_busy());
    }

    #[test]
    fn test_invalid_host_format() {
        let mut controller = EditorController::new(EditorConfig::default()).unwrap();
        assert!(matches!(
            controller.set_host_audio(vec![0.0; 10], 0, 44100),
            Err(OfflineError::Config(_))
        ));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = EditorConfig::default().with_silence_run_frames(0);
        assert!(EditorController::new(config).is_err());
    }

    #[test]
    fn test_nothing_to_synthesize() {
        let mut controller = EditorController::new(EditorConfig::default()).unwrap();
        controller.project = Some(Project::new(AudioData::new(vec![0.0; 4096], SAMPLE_RATE)));
        assert!(matches!(
            controller.resynthesize(),
            Err(OfflineError::NothingToSynthesize)
        ));
    }

    #[test]
    fn test_dirty_range_past_analysis_is_refused() {
        let mut controller = EditorController::new(EditorConfig::default()).unwrap();
        let mut audio = AudioData::new(vec![0.0; 100 * HOP_SIZE], SAMPLE_RATE);
        audio.mel = MelSpectrogram::from_rows(&vec![vec![-2.0; NUM_MELS]; 100], NUM_MELS);
        audio.set_f0(vec![220.0; 100], vec![true; 100]).unwrap();
        let mut project = Project::new(audio);
        project.mark_f0_dirty(150, 160);
        controller.project = Some(project);

        assert!(matches!(
            controller.resynthesize(),
            Err(OfflineError::NothingToSynthesize)
        ));
        assert_eq!(controller.current_job(JobCategory::Resynthesize), None);
        assert_eq!(controller.state(), PipelineState::Idle);
    }

    #[test]
    fn test_sync_reload_with_missing_models() {
        let dir = tempfile::tempdir().unwrap();
        let config = EditorConfig::default().with_models_dir(dir.path());
        let mut controller = EditorController::new(config).unwrap();
        let report = controller.reload_models(false).unwrap().unwrap();
        assert!(report.loaded.is_empty());
        assert!(!report.missing.is_empty());
    }
}
