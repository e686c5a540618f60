//! Analysis pipeline
//!
//! Runs on a worker thread against an owned project copy:
//! 1. Mel spectrogram on the hop grid
//! 2. Neural F0, resampled onto the mel grid and median-smoothed
//! 3. Vocoder warm-up (lazy model load)
//! 4. Note segmentation (neural streaming or heuristic)
//! 5. Base / delta pitch curve rebuild
//!
//! Cancellation is checked between phases and inside the long loops.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use rf_ml::{
    FcpeDetector, MlError, NoteSegmentationModel, NsfHifiganVocoder, PitchDetector,
    PitchDetectorKind, RmvpeDetector, SomeSegmenter, Vocoder,
};
use rf_pitch::curves::rebuild_curves_from_source;
use rf_pitch::f0::{grid_frame_period, interpolate_unvoiced, resample_to_grid, smooth_voiced, voiced_mask};
use rf_pitch::resample::{downmix_interleaved, resample_linear};
use rf_pitch::{
    HysteresisSegmenter, MelConfig, Note, Project, SAMPLE_RATE, SegmentEvent, SpectralEngine,
    StreamingCollector,
};

use crate::config::{EditorConfig, SegmenterKind};
use crate::error::{OfflineError, OfflineResult};
use crate::job::CancelToken;

// ═══════════════════════════════════════════════════════════════════════════════
// PIPELINE STATE
// ═══════════════════════════════════════════════════════════════════════════════

/// Orchestrator state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineState {
    Idle,
    Loading,
    Analyzing,
    Synthesizing,
    Cancelling,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::Idle
    }
}

/// Progress sink: `(fraction, stage)`
pub type ProgressFn<'a> = &'a dyn Fn(f64, &str);

// ═══════════════════════════════════════════════════════════════════════════════
// MODEL SERVICES
// ═══════════════════════════════════════════════════════════════════════════════

/// Outcome of a model reload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReloadReport {
    /// Names of models now loaded
    pub loaded: Vec<String>,
    /// Artifacts that were not found
    pub missing: Vec<PathBuf>,
    /// `name: reason` for models that failed to load
    pub failed: Vec<String>,
}

impl ReloadReport {
    fn record(&mut self, name: &str, result: Result<(), MlError>) {
        match result {
            Ok(()) => self.loaded.push(name.to_string()),
            Err(e) => {
                log::warn!("Failed to load {}: {}", name, e);
                self.failed.push(format!("{}: {}", name, e));
            }
        }
    }
}

/// Inference services used by the pipeline
#[derive(Clone)]
pub struct ModelServices {
    pub rmvpe: Arc<dyn PitchDetector>,
    pub fcpe: Arc<dyn PitchDetector>,
    pub segmenter: Arc<dyn NoteSegmentationModel>,
    pub vocoder: Arc<dyn Vocoder>,
}

impl Default for ModelServices {
    fn default() -> Self {
        Self {
            rmvpe: Arc::new(RmvpeDetector::new()),
            fcpe: Arc::new(FcpeDetector::new()),
            segmenter: Arc::new(SomeSegmenter::new()),
            vocoder: Arc::new(NsfHifiganVocoder::new()),
        }
    }
}

impl ModelServices {
    pub fn new(
        rmvpe: Arc<dyn PitchDetector>,
        fcpe: Arc<dyn PitchDetector>,
        segmenter: Arc<dyn NoteSegmentationModel>,
        vocoder: Arc<dyn Vocoder>,
    ) -> Self {
        Self {
            rmvpe,
            fcpe,
            segmenter,
            vocoder,
        }
    }

    pub fn detector(&self, kind: PitchDetectorKind) -> &Arc<dyn PitchDetector> {
        match kind {
            PitchDetectorKind::Rmvpe => &self.rmvpe,
            PitchDetectorKind::Fcpe => &self.fcpe,
        }
    }

    /// Load every model for the configured provider. Missing files are
    /// logged and skipped.
    pub fn reload(&self, config: &EditorConfig) -> ReloadReport {
        let paths = config.model_paths();
        let provider = config.provider();
        let device_id = config.device_id;
        let mut report = ReloadReport::default();

        for kind in [PitchDetectorKind::Rmvpe, PitchDetectorKind::Fcpe] {
            let files = paths.pitch_files(kind);
            let missing = files.missing();
            if !missing.is_empty() {
                for path in &missing {
                    log::warn!("{} model file not found: {}", kind, path.display());
                }
                report.missing.extend(missing);
                continue;
            }
            report.record(kind.as_str(), self.detector(kind).load_model(&files, provider, device_id));
        }

        if paths.some.exists() {
            report.record("SOME", self.segmenter.load_model(&paths.some, provider, device_id));
        } else {
            log::warn!("SOME model not found at: {}", paths.some.display());
            report.missing.push(paths.some.clone());
        }

        if paths.vocoder.exists() {
            report.record("vocoder", self.vocoder.load_model(&paths.vocoder, provider, device_id));
        } else {
            log::warn!("Vocoder model not found at: {}", paths.vocoder.display());
            report.missing.push(paths.vocoder.clone());
        }

        log::info!(
            "Model reload on {}: {} loaded, {} missing, {} failed",
            provider,
            report.loaded.len(),
            report.missing.len(),
            report.failed.len()
        );
        report
    }

    /// Selected detector, loading it on first use
    pub fn ensure_detector(&self, config: &EditorConfig) -> OfflineResult<&Arc<dyn PitchDetector>> {
        let kind = config.pitch_detector;
        let detector = self.detector(kind);
        if detector.is_loaded() {
            return Ok(detector);
        }

        let files = config.model_paths().check_pitch_files(kind).inspect_err(|e| {
            log::warn!("{}", e);
        })?;
        detector.load_model(&files, config.provider(), config.device_id)?;
        log::info!("Pitch detector: {}", detector.name());
        Ok(detector)
    }

    /// Load the segmentation model on first use
    pub fn ensure_segmenter(&self, config: &EditorConfig) -> OfflineResult<()> {
        if self.segmenter.is_loaded() {
            return Ok(());
        }
        let path = config.model_paths().some;
        if !path.exists() {
            return Err(OfflineError::missing_model("SOME", &path));
        }
        self.segmenter
            .load_model(&path, config.provider(), config.device_id)?;
        Ok(())
    }

    /// Load the vocoder on first use. Failure only disables synthesis.
    pub fn ensure_vocoder(&self, config: &EditorConfig) -> bool {
        if self.vocoder.is_loaded() {
            return true;
        }
        let path = config.model_paths().vocoder;
        if !path.exists() {
            log::warn!("Vocoder model not found at: {}", path.display());
            return false;
        }
        match self
            .vocoder
            .load_model(&path, config.provider(), config.device_id)
        {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Failed to load vocoder: {}", e);
                false
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ANALYSIS
// ═══════════════════════════════════════════════════════════════════════════════

/// Everything a pipeline stage needs besides the project
pub struct AnalysisContext<'a> {
    pub services: &'a ModelServices,
    pub config: &'a EditorConfig,
    pub token: &'a CancelToken,
    pub progress: ProgressFn<'a>,
}

fn inference_error(e: MlError) -> OfflineError {
    match e {
        MlError::InferenceFailed { reason } => OfflineError::InferenceFailure(reason),
        other => OfflineError::Ml(other),
    }
}

/// Downmix interleaved audio and resample it to the pipeline rate
pub fn prepare_audio(samples: &[f32], channels: usize, sample_rate: u32) -> Vec<f32> {
    let mono = downmix_interleaved(samples, channels.max(1));
    if sample_rate == SAMPLE_RATE {
        mono
    } else {
        resample_linear(&mono, sample_rate, SAMPLE_RATE)
    }
}

/// Compute mel, F0 and voicing for the project's waveform and rebuild the
/// pitch curves against the existing notes.
pub fn analyze_audio(project: &mut Project, ctx: &AnalysisContext<'_>) -> OfflineResult<()> {
    let detector = ctx.services.ensure_detector(ctx.config)?;
    ctx.token.check()?;

    let audio = project.audio_data();
    if audio.waveform.is_empty() {
        return Err(OfflineError::NotReady("no audio to analyze".into()));
    }

    (ctx.progress)(0.30, "Computing mel spectrogram");
    let engine = SpectralEngine::new(MelConfig::default())?;
    let mel = engine.compute(&audio.waveform)?;
    (ctx.progress)(0.35, "Mel spectrogram ready");
    ctx.token.check()?;

    (ctx.progress)(0.40, "Extracting pitch");
    let raw = detector
        .extract_f0(&audio.waveform, audio.sample_rate, ctx.config.threshold())
        .map_err(inference_error)?;
    if raw.is_empty() {
        return Err(OfflineError::InferenceFailure(format!(
            "{} returned no F0 frames",
            detector.name()
        )));
    }
    (ctx.progress)(0.55, "Pitch extracted");
    ctx.token.check()?;

    let grid = resample_to_grid(
        &raw,
        detector.frame_period(),
        grid_frame_period(),
        mel.num_frames(),
    );
    let voiced = voiced_mask(&grid);
    let f0 = smooth_voiced(&grid, &voiced);
    (ctx.progress)(0.65, "Smoothing pitch");
    ctx.token.check()?;

    ctx.services.ensure_vocoder(ctx.config);
    (ctx.progress)(0.75, "Loading vocoder");

    let audio = project.audio_data_mut();
    audio.mel = mel;
    audio.set_f0(f0, voiced)?;
    rebuild_curves_from_source(project);
    Ok(())
}

/// Clear and rebuild the note list from the project's F0.
///
/// `on_update` receives the notes collected so far once per neural chunk.
pub fn segment_into_notes(
    project: &mut Project,
    ctx: &AnalysisContext<'_>,
    on_update: &mut dyn FnMut(&[Note]),
) -> OfflineResult<()> {
    project.set_notes(Vec::new());

    if project.audio_data().f0.is_empty() {
        return Ok(());
    }

    let use_neural = match ctx.config.segmenter {
        SegmenterKind::Heuristic => false,
        SegmenterKind::Neural => {
            ctx.services.ensure_segmenter(ctx.config)?;
            true
        }
        SegmenterKind::Auto => match ctx.services.ensure_segmenter(ctx.config) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Neural segmentation unavailable ({}), using heuristic segmenter", e);
                false
            }
        },
    };

    (ctx.progress)(0.80, "Segmenting notes");
    let audio = project.audio_data();
    let notes = if use_neural {
        let segmenter = &ctx.services.segmenter;
        let mut collector = StreamingCollector::new(
            &audio.f0,
            segmenter.event_frame_period(),
            grid_frame_period(),
            &ctx.config.segmentation,
        );
        segmenter
            .segment_streaming(
                &audio.waveform,
                audio.sample_rate,
                &mut |events: &[SegmentEvent]| {
                    collector.push_chunk(events);
                    on_update(collector.notes());
                },
                &|| ctx.token.is_cancelled(),
            )
            .map_err(inference_error)?;
        ctx.token.check()?;
        collector.into_notes()
    } else {
        HysteresisSegmenter::new(ctx.config.segmentation)
            .segment_with_cancel(&audio.f0, &audio.voiced_mask, || ctx.token.is_cancelled())
            .ok_or(OfflineError::Cancelled)?
    };

    log::debug!("Segmented into {} notes", notes.len());
    project.set_notes(notes);
    rebuild_curves_from_source(project);
    (ctx.progress)(0.90, "Segmentation complete");
    Ok(())
}

/// Full analysis followed by segmentation
pub fn analyze_and_segment(
    project: &mut Project,
    ctx: &AnalysisContext<'_>,
    on_update: &mut dyn FnMut(&[Note]),
) -> OfflineResult<()> {
    analyze_audio(project, ctx)?;
    ctx.token.check()?;
    segment_into_notes(project, ctx, on_update)
}

// ═══════════════════════════════════════════════════════════════════════════════
// FULL RENDER
// ═══════════════════════════════════════════════════════════════════════════════

/// Vocode the whole project with the global pitch offset applied
pub fn render_full(
    project: &Project,
    vocoder: &dyn Vocoder,
    token: &CancelToken,
) -> OfflineResult<Vec<f32>> {
    if !vocoder.is_loaded() {
        return Err(OfflineError::NotReady("vocoder not loaded".into()));
    }
    let audio = project.audio_data();
    if !audio.has_analysis() {
        return Err(OfflineError::NotReady("no analysis to render".into()));
    }

    let ratio = 2.0f32.powf(project.global_pitch_offset() / 12.0);
    let mut f0 = audio.f0.clone();
    for (value, &voiced) in f0.iter_mut().zip(&audio.voiced_mask) {
        token.check()?;
        if voiced && *value > 0.0 {
            *value *= ratio;
        }
    }
    let f0 = interpolate_unvoiced(&f0, &audio.voiced_mask);

    let frames = audio.mel.num_frames().min(f0.len());
    let mel = audio.mel.slice_frames(0, frames)?;
    token.check()?;

    let samples = vocoder.infer(&mel, &f0[..frames]).map_err(inference_error)?;
    token.check()?;
    Ok(samples)
}
