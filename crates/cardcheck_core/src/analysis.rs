//! One analysis run: preprocess, infer, interpret.

use crate::acquisition::ImageSource;
use crate::config::POSITIVE_THRESHOLD;
use crate::error::PipelineError;
use crate::model::ModelHandle;
use crate::preprocess::image_to_tensor;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisStage {
    Idle,
    Preprocessing,
    Inferring,
    Interpreting,
    Done,
    Failed,
}

impl AnalysisStage {
    /// Progress bar value and caption shown while in this stage.
    pub fn progress(self) -> Option<(u8, &'static str)> {
        match self {
            AnalysisStage::Preprocessing => Some((50, "🔍 Preprocessing image...")),
            AnalysisStage::Inferring => Some((75, "🤖 Running AI analysis...")),
            AnalysisStage::Done => Some((100, "✅ Analysis complete!")),
            AnalysisStage::Idle | AnalysisStage::Interpreting | AnalysisStage::Failed => None,
        }
    }
}

/// Progress shown as soon as an analysis is accepted.
pub const ANALYSIS_STARTED: (u8, &str) = (30, "🔍 Analyzing image...");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Label {
    Positive,
    Negative,
}

impl Label {
    pub fn as_str(self) -> &'static str {
        match self {
            Label::Positive => "positive",
            Label::Negative => "negative",
        }
    }

    pub fn icon(self) -> &'static str {
        match self {
            Label::Positive => "✅",
            Label::Negative => "❌",
        }
    }

    pub fn headline(self) -> &'static str {
        match self {
            Label::Positive => "Identified as the back of a foreign resident card",
            Label::Negative => "Not the back of a foreign resident card",
        }
    }
}

/// Interpreted model output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Verdict {
    pub confidence: f32,
    pub is_positive: bool,
    /// Confidence in the chosen label, in `[50, 100]`.
    pub percentage: f32,
}

impl Verdict {
    pub fn interpret(confidence: f32) -> Result<Self, PipelineError> {
        if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
            return Err(PipelineError::AnalysisRuntime(format!(
                "model score {confidence} is outside [0, 1]"
            )));
        }
        let is_positive = confidence > POSITIVE_THRESHOLD;
        let chosen = if is_positive {
            confidence
        } else {
            1.0 - confidence
        };
        Ok(Self {
            confidence,
            is_positive,
            percentage: chosen * 100.0,
        })
    }

    pub fn label(&self) -> Label {
        if self.is_positive {
            Label::Positive
        } else {
            Label::Negative
        }
    }

    pub fn message(&self) -> String {
        let label = self.label();
        format!("{} {}", label.icon(), label.headline())
    }

    pub fn confidence_text(&self) -> String {
        format!("Confidence: {:.1}%", self.percentage)
    }
}

/// Runs the three stages, reporting each. Reports [`AnalysisStage::Failed`]
/// before returning any error.
pub fn run_analysis(
    model: &ModelHandle,
    image: &ImageSource,
    mut on_stage: impl FnMut(AnalysisStage),
) -> Result<Verdict, PipelineError> {
    let result = run_stages(model, image, &mut on_stage);
    match &result {
        Ok(verdict) => {
            tracing::info!(
                "verdict {} ({:.1}%) for {}",
                verdict.label().as_str(),
                verdict.percentage,
                image.name()
            );
            on_stage(AnalysisStage::Done);
        }
        Err(err) => {
            tracing::warn!("analysis of {} failed: {err}", image.name());
            on_stage(AnalysisStage::Failed);
        }
    }
    result
}

/// Everything one analysis needs, detached from the controller so it can run
/// on a worker thread.
#[derive(Debug)]
pub struct AnalysisJob {
    ticket: u64,
    model: Arc<ModelHandle>,
    image: ImageSource,
}

impl AnalysisJob {
    pub(crate) fn new(ticket: u64, model: Arc<ModelHandle>, image: ImageSource) -> Self {
        Self {
            ticket,
            model,
            image,
        }
    }

    /// Identifies the run when its stages and result are handed back.
    pub fn ticket(&self) -> u64 {
        self.ticket
    }

    pub fn image_name(&self) -> &str {
        self.image.name()
    }

    pub fn run(self, on_stage: impl FnMut(AnalysisStage)) -> Result<Verdict, PipelineError> {
        run_analysis(&self.model, &self.image, on_stage)
    }
}

fn run_stages(
    model: &ModelHandle,
    image: &ImageSource,
    on_stage: &mut impl FnMut(AnalysisStage),
) -> Result<Verdict, PipelineError> {
    on_stage(AnalysisStage::Preprocessing);
    let tensor = image
        .decode()
        .and_then(|img| image_to_tensor(&img))
        .map_err(PipelineError::runtime)?;

    on_stage(AnalysisStage::Inferring);
    let confidence = model
        .predict_scalar(tensor)
        .map_err(PipelineError::runtime)?;
    tracing::debug!("raw score {confidence}");

    on_stage(AnalysisStage::Interpreting);
    Verdict::interpret(confidence)
}
