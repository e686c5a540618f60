//! Editor configuration

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use rf_ml::{ExecutionProvider, PitchDetectorKind, PitchModelFiles, models};
use rf_pitch::SegmenterConfig;

use crate::error::{OfflineError, OfflineResult};

/// Note segmentation strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmenterKind {
    /// Neural segmenter when its model is available, heuristic otherwise
    Auto,
    /// Neural segmenter only; a missing model fails the job
    Neural,
    /// Hysteresis state machine over the F0 track
    Heuristic,
}

impl Default for SegmenterKind {
    fn default() -> Self {
        Self::Auto
    }
}

/// Editor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    /// Directory holding the model artifacts
    pub models_dir: PathBuf,

    pub pitch_detector: PitchDetectorKind,

    /// Execution device name ("CPU", "CUDA", "DirectML", "CoreML")
    pub device: String,

    pub device_id: i32,

    /// F0 confidence threshold (None = detector default)
    pub f0_threshold: Option<f32>,

    pub segmenter: SegmenterKind,

    pub segmentation: SegmenterConfig,

    /// Minimum silent run (frames) that can host a splice boundary
    pub silence_run_frames: usize,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            models_dir: PathBuf::from("models"),
            pitch_detector: PitchDetectorKind::default(),
            device: "CPU".to_string(),
            device_id: 0,
            f0_threshold: None,
            segmenter: SegmenterKind::default(),
            segmentation: SegmenterConfig::default(),
            silence_run_frames: 5,
        }
    }
}

impl EditorConfig {
    /// Load from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> OfflineResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self =
            serde_json::from_str(&text).map_err(|e| OfflineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> OfflineResult<()> {
        if self.silence_run_frames == 0 {
            return Err(OfflineError::Config("silence_run_frames must be at least 1".into()));
        }
        if let Some(t) = self.f0_threshold {
            if !(0.0..=1.0).contains(&t) {
                return Err(OfflineError::Config(format!("f0_threshold {} outside 0..=1", t)));
            }
        }
        Ok(())
    }

    pub fn with_models_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.models_dir = dir.into();
        self
    }

    pub fn with_pitch_detector(mut self, kind: PitchDetectorKind) -> Self {
        self.pitch_detector = kind;
        self
    }

    pub fn with_device<S: Into<String>>(mut self, device: S, device_id: i32) -> Self {
        self.device = device.into();
        self.device_id = device_id;
        self
    }

    pub fn with_f0_threshold(mut self, threshold: f32) -> Self {
        self.f0_threshold = Some(threshold);
        self
    }

    pub fn with_segmenter(mut self, kind: SegmenterKind) -> Self {
        self.segmenter = kind;
        self
    }

    pub fn with_segmentation(mut self, config: SegmenterConfig) -> Self {
        self.segmentation = config;
        self
    }

    pub fn with_silence_run_frames(mut self, frames: usize) -> Self {
        self.silence_run_frames = frames;
        self
    }

    pub fn provider(&self) -> ExecutionProvider {
        ExecutionProvider::from_device_name(&self.device)
    }

    pub fn threshold(&self) -> f32 {
        self.f0_threshold
            .unwrap_or_else(|| self.pitch_detector.default_threshold())
    }

    pub fn model_paths(&self) -> ModelPaths {
        ModelPaths::from_dir(&self.models_dir)
    }
}

/// Artifact paths inside the models directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelPaths {
    pub rmvpe: PathBuf,
    pub fcpe: PathBuf,
    pub mel_filterbank: PathBuf,
    pub cent_table: PathBuf,
    pub some: PathBuf,
    pub vocoder: PathBuf,
}

impl ModelPaths {
    pub fn from_dir(dir: &Path) -> Self {
        Self {
            rmvpe: dir.join(models::RMVPE),
            fcpe: dir.join(models::FCPE),
            mel_filterbank: dir.join(models::FCPE_MEL_FILTERBANK),
            cent_table: dir.join(models::FCPE_CENT_TABLE),
            some: dir.join(models::SOME),
            vocoder: dir.join(models::VOCODER),
        }
    }

    /// Artifact bundle for a detector
    pub fn pitch_files(&self, kind: PitchDetectorKind) -> PitchModelFiles {
        match kind {
            PitchDetectorKind::Rmvpe => PitchModelFiles::new(&self.rmvpe),
            PitchDetectorKind::Fcpe => {
                PitchModelFiles::new(&self.fcpe).with_tables(&self.mel_filterbank, &self.cent_table)
            }
        }
    }

    /// First missing artifact of a detector as an error
    pub fn check_pitch_files(&self, kind: PitchDetectorKind) -> OfflineResult<PitchModelFiles> {
        let files = self.pitch_files(kind);
        match files.missing().first() {
            Some(path) => Err(OfflineError::missing_model(kind.as_str(), path)),
            None => Ok(files),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EditorConfig::default();
        assert_eq!(config.pitch_detector, PitchDetectorKind::Rmvpe);
        assert_eq!(config.segmenter, SegmenterKind::Auto);
        assert_eq!(config.silence_run_frames, 5);
        assert_eq!(config.provider(), ExecutionProvider::Cpu);
        assert!(config.segmentation.max_unvoiced_gap.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_threshold_follows_detector() {
        let config = EditorConfig::default().with_pitch_detector(PitchDetectorKind::Fcpe);
        assert_eq!(config.threshold(), 0.05);
        assert_eq!(config.with_f0_threshold(0.2).threshold(), 0.2);
    }

    #[test]
    fn test_model_paths() {
        let paths = ModelPaths::from_dir(Path::new("/m"));
        assert_eq!(paths.vocoder, PathBuf::from("/m/pc_nsf_hifigan.onnx"));
        let fcpe = paths.pitch_files(PitchDetectorKind::Fcpe);
        assert_eq!(fcpe.cent_table, Some(PathBuf::from("/m/cent_table.bin")));
        assert!(paths.pitch_files(PitchDetectorKind::Rmvpe).mel_filterbank.is_none());
    }

    #[test]
    fn test_check_pitch_files_reports_missing() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ModelPaths::from_dir(dir.path());
        let err = paths.check_pitch_files(PitchDetectorKind::Fcpe).unwrap_err();
        assert!(matches!(err, OfflineError::MissingModel { .. }));

        for name in ["fcpe.onnx", "mel_filterbank.bin", "cent_table.bin"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        assert!(paths.check_pitch_files(PitchDetectorKind::Fcpe).is_ok());
    }

    #[test]
    fn test_json_roundtrip_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("editor.json");
        std::fs::write(&path, r#"{ "device": "CUDA", "segmenter": "Heuristic" }"#).unwrap();

        let config = EditorConfig::from_json_file(&path).unwrap();
        assert_eq!(config.provider(), ExecutionProvider::Cuda);
        assert_eq!(config.segmenter, SegmenterKind::Heuristic);
        assert_eq!(config.silence_run_frames, 5);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("editor.json");
        std::fs::write(&path, r#"{ "silence_run_frames": 0 }"#).unwrap();
        assert!(matches!(
            EditorConfig::from_json_file(&path),
            Err(OfflineError::Config(_))
        ));
    }
}
