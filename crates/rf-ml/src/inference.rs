//! ONNX inference engine abstraction
//!
//! tract (pure Rust) executes every model. Input lengths vary per call, so
//! the model is kept in inference form and a typed plan is built and cached
//! for each distinct set of input shapes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tract_onnx::prelude::*;

use crate::error::{MlError, MlResult};

/// Execution provider for inference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ExecutionProvider {
    /// CPU execution using tract
    #[default]
    Cpu,
    /// NVIDIA CUDA
    Cuda,
    /// DirectML (Windows, DirectX 12)
    DirectML,
    /// Apple CoreML
    CoreML,
}

impl ExecutionProvider {
    pub const ALL: [ExecutionProvider; 4] = [
        ExecutionProvider::Cpu,
        ExecutionProvider::Cuda,
        ExecutionProvider::DirectML,
        ExecutionProvider::CoreML,
    ];

    /// Map a device name to a provider (case-insensitive).
    /// Empty names are CPU; unknown names fall back to CPU with a warning.
    pub fn from_device_name(name: &str) -> Self {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return ExecutionProvider::Cpu;
        }
        match trimmed.parse() {
            Ok(provider) => provider,
            Err(_) => {
                log::warn!("Unsupported inference device: {}, using CPU", trimmed);
                ExecutionProvider::Cpu
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionProvider::Cpu => "CPU",
            ExecutionProvider::Cuda => "CUDA",
            ExecutionProvider::DirectML => "DirectML",
            ExecutionProvider::CoreML => "CoreML",
        }
    }

    /// Check if this provider can execute on the current system
    pub fn is_available(&self) -> bool {
        matches!(self, ExecutionProvider::Cpu)
    }

    /// Provider that will actually run a request for `self`
    pub fn resolve(self) -> Self {
        if self.is_available() {
            self
        } else {
            log::warn!("{} execution is not available, running on CPU", self.as_str());
            ExecutionProvider::Cpu
        }
    }
}

impl FromStr for ExecutionProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(ExecutionProvider::Cpu),
            "cuda" => Ok(ExecutionProvider::Cuda),
            "directml" | "dml" => Ok(ExecutionProvider::DirectML),
            "coreml" => Ok(ExecutionProvider::CoreML),
            other => Err(format!("unknown execution provider: {}", other)),
        }
    }
}

impl std::fmt::Display for ExecutionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for inference engine
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct InferenceConfig {
    /// Requested execution provider
    pub provider: ExecutionProvider,
    /// Device ID for GPU execution
    pub device_id: i32,
}

impl InferenceConfig {
    pub fn new(provider: ExecutionProvider, device_id: i32) -> Self {
        Self {
            provider,
            device_id,
        }
    }
}

type TypedPlan = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Unified inference engine
pub struct InferenceEngine {
    /// Active execution provider
    provider: ExecutionProvider,
    /// Model as parsed, before shapes are fixed
    model: InferenceModel,
    /// Optimized plans keyed by input shapes
    plans: Mutex<HashMap<Vec<Vec<usize>>, Arc<TypedPlan>>>,
    model_path: PathBuf,
}

impl InferenceEngine {
    /// Load an ONNX model
    pub fn new<P: AsRef<Path>>(model_path: P, config: InferenceConfig) -> MlResult<Self> {
        let path = model_path.as_ref();

        if !path.exists() {
            return Err(MlError::ModelNotFound {
                path: path.display().to_string(),
            });
        }

        let provider = config.provider.resolve();
        log::info!(
            "Using execution provider: {} (device {}) for model {}",
            provider,
            config.device_id,
            path.display()
        );

        let model = tract_onnx::onnx()
            .model_for_path(path)
            .map_err(|e| MlError::ModelLoadFailed {
                reason: format!("{}: {}", path.display(), e),
            })?;

        Ok(Self {
            provider,
            model,
            plans: Mutex::new(HashMap::new()),
            model_path: path.to_path_buf(),
        })
    }

    /// Number of model inputs
    pub fn num_inputs(&self) -> usize {
        self.model.input_outlets().map(|o| o.len()).unwrap_or(0)
    }

    /// Get current execution provider
    pub fn provider(&self) -> ExecutionProvider {
        self.provider
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    fn plan_for(&self, shapes: Vec<Vec<usize>>) -> MlResult<Arc<TypedPlan>> {
        if let Some(plan) = self.plans.lock().get(&shapes) {
            return Ok(plan.clone());
        }

        let mut model = self.model.clone();
        for (ix, shape) in shapes.iter().enumerate() {
            model = model
                .with_input_fact(ix, f32::fact(shape.clone()).into())
                .map_err(|e| MlError::TractError(e.to_string()))?;
        }
        let plan = model
            .into_optimized()
            .map_err(|e| MlError::TractError(e.to_string()))?
            .into_runnable()
            .map_err(|e| MlError::TractError(e.to_string()))?;

        let plan = Arc::new(plan);
        self.plans.lock().insert(shapes, plan.clone());
        Ok(plan)
    }

    /// Run inference with f32 input/output. Non-f32 outputs are cast.
    pub fn run_f32(&self, inputs: &[ndarray::ArrayD<f32>]) -> MlResult<Vec<ndarray::ArrayD<f32>>> {
        let expected = self.num_inputs();
        if expected != 0 && inputs.len() != expected {
            return Err(MlError::InvalidInputShape {
                expected: format!("{} inputs", expected),
                got: format!("{} inputs", inputs.len()),
            });
        }

        let shapes = inputs.iter().map(|a| a.shape().to_vec()).collect();
        let plan = self.plan_for(shapes)?;

        let tract_inputs: TVec<TValue> = inputs
            .iter()
            .map(|arr| {
                let tensor: Tensor = arr.clone().into();
                tensor.into()
            })
            .collect();

        let outputs = plan
            .run(tract_inputs)
            .map_err(|e| MlError::InferenceFailed {
                reason: e.to_string(),
            })?;

        outputs
            .iter()
            .map(|output| {
                let cast = output
                    .cast_to::<f32>()
                    .map_err(|e| MlError::TractError(e.to_string()))?;
                let view = cast
                    .to_array_view::<f32>()
                    .map_err(|e| MlError::TractError(e.to_string()))?;
                Ok(view.to_owned().into_dyn())
            })
            .collect()
    }
}

/// Flatten the first output of a model into a vector, rejecting empty results
pub(crate) fn first_output(outputs: Vec<ndarray::ArrayD<f32>>, what: &str) -> MlResult<Vec<f32>> {
    let first = outputs.into_iter().next().ok_or_else(|| MlError::InferenceFailed {
        reason: format!("{}: model produced no output", what),
    })?;
    let values: Vec<f32> = first.iter().copied().collect();
    if values.is_empty() {
        return Err(MlError::InferenceFailed {
            reason: format!("{}: empty output", what),
        });
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_from_device_name() {
        assert_eq!(ExecutionProvider::from_device_name("CUDA"), ExecutionProvider::Cuda);
        assert_eq!(ExecutionProvider::from_device_name("directml"), ExecutionProvider::DirectML);
        assert_eq!(ExecutionProvider::from_device_name("CoreML"), ExecutionProvider::CoreML);
        assert_eq!(ExecutionProvider::from_device_name(""), ExecutionProvider::Cpu);
        assert_eq!(ExecutionProvider::from_device_name("Vulkan"), ExecutionProvider::Cpu);
    }

    #[test]
    fn test_provider_resolve_falls_back_to_cpu() {
        assert_eq!(ExecutionProvider::Cpu.resolve(), ExecutionProvider::Cpu);
        assert_eq!(ExecutionProvider::Cuda.resolve(), ExecutionProvider::Cpu);
    }

    #[test]
    fn test_provider_display_roundtrip() {
        for p in ExecutionProvider::ALL {
            assert_eq!(p.to_string().parse::<ExecutionProvider>().unwrap(), p);
        }
    }

    #[test]
    fn test_missing_model() {
        let result = InferenceEngine::new("/nonexistent/model.onnx", InferenceConfig::default());
        assert!(matches!(result, Err(MlError::ModelNotFound { .. })));
    }

    #[test]
    fn test_invalid_model_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.onnx");
        std::fs::write(&path, b"not an onnx graph").unwrap();
        let result = InferenceEngine::new(&path, InferenceConfig::default());
        assert!(matches!(result, Err(MlError::ModelLoadFailed { .. })));
    }

    #[test]
    fn test_first_output_rejects_empty() {
        assert!(first_output(vec![], "test").is_err());
        let empty = ndarray::ArrayD::<f32>::zeros(ndarray::IxDyn(&[1, 0]));
        assert!(first_output(vec![empty], "test").is_err());
        let ok = ndarray::ArrayD::<f32>::ones(ndarray::IxDyn(&[1, 3]));
        assert_eq!(first_output(vec![ok], "test").unwrap(), vec![1.0; 3]);
    }
}
