//! ONNX Runtime backend, compiled with the `ort` feature.

use super::{InferenceModel, ModelInfo, ModelSource, Shape};
use anyhow::{Context, Result, anyhow};
use ndarray::{Array4, ArrayD, CowArray};
use once_cell::sync::OnceCell;
use ort::{
    GraphOptimizationLevel, SessionBuilder, environment::Environment, session::Session,
    tensor::OrtOwnedTensor, value::Value,
};
use std::path::PathBuf;
use std::sync::Arc;

static ORT_ENV: OnceCell<Arc<Environment>> = OnceCell::new();

fn environment() -> Result<Arc<Environment>> {
    ORT_ENV
        .get_or_try_init(|| {
            Environment::builder()
                .with_name("cardcheck")
                .build()
                .map(|env| env.into_arc())
        })
        .cloned()
        .context("failed to initialize ONNX Runtime environment")
}

/// `model.onnx` on disk, with its optional `model_info.json`.
pub struct OnnxFileSource {
    model_path: PathBuf,
    info_path: PathBuf,
}

impl OnnxFileSource {
    pub fn new(model_path: PathBuf, info_path: PathBuf) -> Self {
        Self {
            model_path,
            info_path,
        }
    }
}

impl ModelSource for OnnxFileSource {
    fn describe(&self) -> String {
        self.model_path.display().to_string()
    }

    fn fetch(&self) -> Result<Box<dyn InferenceModel>> {
        if !self.model_path.exists() {
            anyhow::bail!("model file missing: {}", self.model_path.display());
        }
        let env = environment()?;
        let session = SessionBuilder::new(&env)?
            .with_optimization_level(GraphOptimizationLevel::Level1)?
            .with_model_from_file(&self.model_path)
            .with_context(|| format!("cannot load {}", self.model_path.display()))?;
        Ok(Box::new(OnnxModel { session }))
    }

    fn info(&self) -> Option<ModelInfo> {
        ModelInfo::read_optional(&self.info_path)
    }
}

pub struct OnnxModel {
    session: Session,
}

fn dims(dimensions: &[Option<u32>]) -> Shape {
    dimensions.iter().map(|d| d.map(|v| v as usize)).collect()
}

impl InferenceModel for OnnxModel {
    fn input_shape(&self) -> Shape {
        self.session
            .inputs
            .first()
            .map(|i| dims(&i.dimensions))
            .unwrap_or_default()
    }

    fn output_shape(&self) -> Shape {
        self.session
            .outputs
            .first()
            .map(|o| dims(&o.dimensions))
            .unwrap_or_default()
    }

    fn predict(&self, input: &Array4<f32>) -> Result<ArrayD<f32>> {
        let cow = CowArray::from(input.view().into_dyn());
        let value = Value::from_array(self.session.allocator(), &cow)
            .map_err(|e| anyhow!("cannot build input tensor: {e}"))?;
        let outputs: Vec<Value> = self.session.run(vec![value])?;
        let first = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no output"))?;
        let scores: OrtOwnedTensor<f32, _> = first.try_extract()?;
        let owned = scores.view().to_owned();
        Ok(owned)
    }
}
