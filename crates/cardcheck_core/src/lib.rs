//! Card-back classifier pipeline: image acquisition, preprocessing,
//! inference and interpretation behind a single controller.

pub mod acquisition;
pub mod analysis;
pub mod camera;
pub mod config;
pub mod controller;
pub mod error;
pub mod model;
pub mod preprocess;

pub use acquisition::{FilePayload, ImageOrigin, ImageSource};
pub use analysis::{AnalysisJob, AnalysisStage, Label, Verdict};
pub use camera::synthetic::SyntheticCamera;
pub use camera::{
    CameraDevice, CameraState, CaptureConstraints, FacingMode, MediaStream, NoCamera,
};
pub use config::PipelineConfig;
pub use controller::{
    AcquireOutcome, AnalysisMode, Controller, EventSink, PipelineEvent, Progress, Status,
    StatusKind, ViewState,
};
pub use error::{PipelineError, Precondition};
pub use model::{InferenceModel, LoadPhase, ModelHandle, ModelInfo, ModelSource, load_model};
