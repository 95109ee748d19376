use crate::config::MAX_UPLOAD_BYTES;
use thiserror::Error;

/// Which guard stopped an analysis before it started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    ModelNotReady,
    NoImage,
    /// Another analysis has not finished yet.
    AnalysisRunning,
}

/// Failure of a single controller operation.
///
/// Every kind is terminal for the operation that raised it and leaves the
/// session usable. Callers show [`PipelineError::user_message`] to the user.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    #[error("model load failed: {0}")]
    ModelLoad(String),
    #[error("unsupported file type: {media_type}")]
    UnsupportedFileType { media_type: String },
    #[error("file too large: {size} bytes")]
    FileTooLarge { size: u64 },
    #[error("camera permission denied")]
    CameraPermissionDenied,
    #[error("camera unavailable: {0}")]
    CameraUnavailable(String),
    #[error("analysis precondition failed: {0:?}")]
    AnalysisPrecondition(Precondition),
    #[error("analysis failed: {0}")]
    AnalysisRuntime(String),
}

impl PipelineError {
    pub fn user_message(&self) -> String {
        match self {
            PipelineError::ModelLoad(_) => {
                "❌ Failed to load the AI model. Please restart the application.".to_string()
            }
            PipelineError::UnsupportedFileType { .. } => {
                "❌ Only image files can be uploaded.".to_string()
            }
            PipelineError::FileTooLarge { .. } => format!(
                "❌ The file is too large. Please choose a file of {} MB or less.",
                MAX_UPLOAD_BYTES / (1024 * 1024)
            ),
            PipelineError::CameraPermissionDenied | PipelineError::CameraUnavailable(_) => {
                "❌ Cannot access the camera. Please check the camera permission.".to_string()
            }
            PipelineError::AnalysisPrecondition(Precondition::ModelNotReady) => {
                "❌ The AI model is still loading. Please try again shortly.".to_string()
            }
            PipelineError::AnalysisPrecondition(Precondition::NoImage) => {
                "❌ Please choose an image to analyze.".to_string()
            }
            PipelineError::AnalysisPrecondition(Precondition::AnalysisRunning) => {
                "❌ The image is still being analyzed. Please wait.".to_string()
            }
            PipelineError::AnalysisRuntime(_) => {
                "❌ An error occurred while analyzing the image. Please try again.".to_string()
            }
        }
    }

    /// Wraps a backend failure, keeping the whole context chain.
    pub(crate) fn runtime(err: anyhow::Error) -> Self {
        PipelineError::AnalysisRuntime(format!("{err:#}"))
    }

    pub(crate) fn model_load(err: anyhow::Error) -> Self {
        PipelineError::ModelLoad(format!("{err:#}"))
    }
}
