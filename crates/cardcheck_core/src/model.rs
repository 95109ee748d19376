//! Loading the classifier artifact and running it on one input tensor.

pub mod info;
#[cfg(feature = "ort")]
pub mod onnx;

use crate::config::{INPUT_CHANNELS, INPUT_SIZE, PipelineConfig};
use crate::error::PipelineError;
use crate::preprocess::zero_input;
use anyhow::{Result, anyhow, bail};
use ndarray::{Array4, ArrayD};
use std::path::PathBuf;

pub use info::ModelInfo;

/// Declared tensor shape; `None` marks a dynamic dimension.
pub type Shape = Vec<Option<usize>>;

/// A runnable binary classifier. Implemented by runtime backends and test stubs.
///
/// A loaded model is shared with the analysis worker, hence `Sync`.
pub trait InferenceModel: Send + Sync {
    fn input_shape(&self) -> Shape;
    fn output_shape(&self) -> Shape;
    fn predict(&self, input: &Array4<f32>) -> Result<ArrayD<f32>>;
}

/// Where the artifact comes from. `fetch` does the slow part (I/O, parsing).
pub trait ModelSource: Send {
    fn describe(&self) -> String;
    fn fetch(&self) -> Result<Box<dyn InferenceModel>>;
    fn info(&self) -> Option<ModelInfo> {
        None
    }
}

/// Load progress, in the order it is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPhase {
    FetchStart,
    Download,
    Initialize,
    Ready,
}

impl LoadPhase {
    pub fn percent(self) -> u8 {
        match self {
            LoadPhase::FetchStart => 20,
            LoadPhase::Download => 40,
            LoadPhase::Initialize => 80,
            LoadPhase::Ready => 100,
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            LoadPhase::FetchStart => "🤖 Loading AI model...",
            LoadPhase::Download => "🤖 Downloading model...",
            LoadPhase::Initialize => "🤖 Initializing model...",
            LoadPhase::Ready => "✅ Model loaded!",
        }
    }
}

/// A loaded, warmed-up model whose shapes have been checked.
pub struct ModelHandle {
    model: Box<dyn InferenceModel>,
    info: Option<ModelInfo>,
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("input_shape", &self.model.input_shape())
            .field("output_shape", &self.model.output_shape())
            .field("info", &self.info)
            .finish()
    }
}

impl ModelHandle {
    pub fn input_shape(&self) -> Shape {
        self.model.input_shape()
    }

    pub fn output_shape(&self) -> Shape {
        self.model.output_shape()
    }

    pub fn info(&self) -> Option<&ModelInfo> {
        self.info.as_ref()
    }

    /// Runs the model and extracts its single score.
    ///
    /// Takes the input by value: both the input and the raw output are
    /// released before this returns, on success and on error.
    pub fn predict_scalar(&self, input: Array4<f32>) -> Result<f32> {
        let output = self.model.predict(&input)?;
        drop(input);
        scalar_of(&output)
    }
}

fn scalar_of(output: &ArrayD<f32>) -> Result<f32> {
    if output.len() != 1 {
        bail!(
            "expected a single score, model returned shape {:?}",
            output.shape()
        );
    }
    output
        .iter()
        .next()
        .copied()
        .ok_or_else(|| anyhow!("model returned an empty tensor"))
}

fn dim_matches(declared: Option<usize>, expected: usize) -> bool {
    declared.is_none_or(|d| d == expected)
}

/// Input must be `[batch, 224, 224, 3]` with a batch of 1 or dynamic.
pub fn check_input_shape(shape: &[Option<usize>]) -> Result<()> {
    let expected = [1, INPUT_SIZE as usize, INPUT_SIZE as usize, INPUT_CHANNELS];
    if shape.len() != expected.len()
        || !shape.iter().zip(expected).all(|(d, e)| dim_matches(*d, e))
    {
        bail!("model input shape {shape:?} is not [1, 224, 224, 3]");
    }
    Ok(())
}

/// Output must hold one score per batch item: `[batch]` or `[batch, 1]`.
pub fn check_output_shape(shape: &[Option<usize>]) -> Result<()> {
    let ok = match shape {
        [batch] => dim_matches(*batch, 1),
        [batch, rest @ ..] => dim_matches(*batch, 1) && rest.iter().all(|d| dim_matches(*d, 1)),
        [] => false,
    };
    if !ok {
        bail!("model output shape {shape:?} is not a single score");
    }
    Ok(())
}

/// Fetches, validates and warms up a model, reporting each phase.
pub fn load_model(
    source: &dyn ModelSource,
    mut on_phase: impl FnMut(LoadPhase),
) -> Result<ModelHandle, PipelineError> {
    on_phase(LoadPhase::FetchStart);
    tracing::info!("loading model from {}", source.describe());
    let info = source.info();
    if let Some(info) = &info {
        tracing::info!(
            "model metadata: {} (classes: {:?})",
            info.description.as_deref().unwrap_or("no description"),
            info.classes
        );
    }

    on_phase(LoadPhase::Download);
    let model = source.fetch().map_err(PipelineError::model_load)?;

    on_phase(LoadPhase::Initialize);
    check_input_shape(&model.input_shape()).map_err(PipelineError::model_load)?;
    check_output_shape(&model.output_shape()).map_err(PipelineError::model_load)?;
    let handle = ModelHandle { model, info };
    handle
        .predict_scalar(zero_input())
        .map_err(|e| PipelineError::model_load(e.context("warm-up inference failed")))?;

    tracing::info!(
        "model ready, input {:?}, output {:?}",
        handle.input_shape(),
        handle.output_shape()
    );
    on_phase(LoadPhase::Ready);
    Ok(handle)
}

/// Source used when no runtime backend is compiled in. Always fails.
#[cfg_attr(feature = "ort", allow(dead_code))]
struct MissingBackend {
    path: PathBuf,
}

impl ModelSource for MissingBackend {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn fetch(&self) -> Result<Box<dyn InferenceModel>> {
        bail!(
            "cannot run {}: built without an inference backend (enable the `ort` feature)",
            self.path.display()
        )
    }
}

/// The artifact at the fixed location inside the configured model directory.
pub fn default_source(config: &PipelineConfig) -> Box<dyn ModelSource> {
    #[cfg(feature = "ort")]
    {
        Box::new(onnx::OnnxFileSource::new(
            config.model_path(),
            config.model_info_path(),
        ))
    }
    #[cfg(not(feature = "ort"))]
    {
        Box::new(MissingBackend {
            path: config.model_path(),
        })
    }
}
