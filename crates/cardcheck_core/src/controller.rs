//! The single owned controller a renderer drives and observes.
//!
//! Every user action maps to one method. Methods update the renderable state
//! (read it back with [`Controller::view`]) and notify subscribers with
//! [`PipelineEvent`]s in the order things happen.

use crate::acquisition::{self, FilePayload, ImageOrigin, ImageSource};
use crate::analysis::{ANALYSIS_STARTED, AnalysisJob, AnalysisStage, Verdict};
use crate::camera::{CameraDevice, CameraSession, CameraState};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Precondition};
use crate::model::{self, LoadPhase, ModelHandle, ModelSource};
use image::RgbImage;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Loading,
    Ready,
    Error,
}

/// Model status line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub text: String,
    pub kind: StatusKind,
}

impl Status {
    fn new(text: &str, kind: StatusKind) -> Self {
        Self {
            text: text.to_string(),
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub percent: u8,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    Status(Status),
    Progress(Progress),
    ProgressHidden,
    ModelReady,
    ImageAcquired { origin: ImageOrigin, name: String },
    PreviewCleared,
    ResultCleared,
    /// User-facing message for a rejected or failed action.
    Notice(String),
    CameraStarted,
    CameraStopped,
    Stage(AnalysisStage),
    Verdict(Verdict),
}

/// Anything that wants to hear about state changes.
pub trait EventSink {
    fn notify(&self, event: &PipelineEvent);
}

impl<F> EventSink for F
where
    F: Fn(&PipelineEvent),
{
    fn notify(&self, event: &PipelineEvent) {
        self(event)
    }
}

/// What a successful acquisition led to.
#[derive(Debug, Clone, PartialEq)]
pub enum AcquireOutcome {
    /// Nothing to acquire, e.g. an empty drop.
    Ignored,
    /// Image shown; no analysis was started.
    Previewed,
    Analyzed(Verdict),
    /// Image shown; its analysis waits in [`Controller::take_queued_analysis`].
    Queued,
    /// The image was accepted but the automatic analysis failed.
    AnalysisFailed(PipelineError),
}

/// Where analyses the controller starts on its own are run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnalysisMode {
    /// On the calling thread, before the action returns.
    #[default]
    Inline,
    /// Handed out as an [`AnalysisJob`] for a worker thread.
    Deferred,
}

#[derive(Debug)]
enum ModelState {
    NotLoaded,
    Loading,
    Ready(Arc<ModelHandle>),
    Failed(String),
}

/// Renderable state plus the subscribers that get told about changes to it.
struct Surface {
    status: Status,
    progress: Option<Progress>,
    verdict: Option<Verdict>,
    notice: Option<String>,
    stage: AnalysisStage,
    sinks: Vec<Box<dyn EventSink>>,
}

impl Surface {
    fn emit(&self, event: PipelineEvent) {
        for sink in &self.sinks {
            sink.notify(&event);
        }
    }

    fn set_status(&mut self, text: &str, kind: StatusKind) {
        self.status = Status::new(text, kind);
        self.emit(PipelineEvent::Status(self.status.clone()));
    }

    fn show_progress(&mut self, percent: u8, message: &str) {
        let progress = Progress {
            percent,
            message: message.to_string(),
        };
        self.progress = Some(progress.clone());
        self.emit(PipelineEvent::Progress(progress));
    }

    fn hide_progress(&mut self) {
        if self.progress.take().is_some() {
            self.emit(PipelineEvent::ProgressHidden);
        }
    }

    fn notice(&mut self, err: &PipelineError) {
        let text = err.user_message();
        self.notice = Some(text.clone());
        self.emit(PipelineEvent::Notice(text));
    }

    fn clear_result(&mut self) {
        self.verdict = None;
        self.notice = None;
        self.emit(PipelineEvent::ResultCleared);
    }

    fn stage(&mut self, stage: AnalysisStage) {
        self.stage = stage;
        tracing::debug!("analysis stage {stage:?}");
        self.emit(PipelineEvent::Stage(stage));
        if let Some((percent, message)) = stage.progress() {
            self.show_progress(percent, message);
        }
    }
}

fn refuse(surface: &mut Surface, precondition: Precondition) -> PipelineError {
    let err = PipelineError::AnalysisPrecondition(precondition);
    tracing::warn!("{err}");
    surface.notice(&err);
    err
}

/// Borrowed snapshot for rendering one frame.
#[derive(Debug, Clone, Copy)]
pub struct ViewState<'a> {
    pub status: &'a Status,
    pub progress: Option<&'a Progress>,
    pub preview: Option<&'a ImageSource>,
    pub verdict: Option<&'a Verdict>,
    pub notice: Option<&'a str>,
    pub camera_active: bool,
    pub model_ready: bool,
    pub analyzing: bool,
}

impl ViewState<'_> {
    /// Analyze and clear buttons are shown whenever there is a preview.
    pub fn analyze_visible(&self) -> bool {
        self.preview.is_some()
    }

    pub fn analyze_enabled(&self) -> bool {
        self.model_ready && self.preview.is_some() && !self.analyzing
    }
}

pub struct Controller {
    config: PipelineConfig,
    model: ModelState,
    image: Option<ImageSource>,
    camera: CameraSession,
    camera_device: Box<dyn CameraDevice>,
    analyzing: bool,
    analysis_mode: AnalysisMode,
    analysis_ticket: u64,
    queued_analysis: Option<AnalysisJob>,
    surface: Surface,
}

impl Controller {
    pub fn new(config: PipelineConfig, camera_device: Box<dyn CameraDevice>) -> Self {
        Self {
            config,
            model: ModelState::NotLoaded,
            image: None,
            camera: CameraSession::new(),
            camera_device,
            analyzing: false,
            analysis_mode: AnalysisMode::Inline,
            analysis_ticket: 0,
            queued_analysis: None,
            surface: Surface {
                status: Status::new("Starting...", StatusKind::Loading),
                progress: None,
                verdict: None,
                notice: None,
                stage: AnalysisStage::Idle,
                sinks: Vec::new(),
            },
        }
    }

    pub fn subscribe(&mut self, sink: impl EventSink + 'static) {
        self.surface.sinks.push(Box::new(sink));
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Ambient settings only; takes effect on the next action that reads them.
    pub fn set_config(&mut self, config: PipelineConfig) {
        self.config = config;
    }

    pub fn set_analysis_mode(&mut self, mode: AnalysisMode) {
        self.analysis_mode = mode;
    }

    pub fn view(&self) -> ViewState<'_> {
        ViewState {
            status: &self.surface.status,
            progress: self.surface.progress.as_ref(),
            preview: self.image.as_ref(),
            verdict: self.surface.verdict.as_ref(),
            notice: self.surface.notice.as_deref(),
            camera_active: self.camera.is_streaming(),
            model_ready: self.is_model_ready(),
            analyzing: self.analyzing,
        }
    }

    pub fn is_model_ready(&self) -> bool {
        matches!(self.model, ModelState::Ready(_))
    }

    pub fn model(&self) -> Option<&ModelHandle> {
        match &self.model {
            ModelState::Ready(handle) => Some(handle.as_ref()),
            _ => None,
        }
    }

    pub fn camera_state(&self) -> CameraState {
        self.camera.state()
    }

    pub fn analysis_stage(&self) -> AnalysisStage {
        self.surface.stage
    }

    /// Loads the model on the calling thread.
    pub fn load_model(&mut self, source: &dyn ModelSource) -> Result<(), PipelineError> {
        if !self.begin_model_load() {
            return match &self.model {
                ModelState::Failed(msg) => Err(PipelineError::ModelLoad(msg.clone())),
                _ => Ok(()),
            };
        }
        let surface = &mut self.surface;
        let result = model::load_model(source, |phase| {
            surface.show_progress(phase.percent(), phase.message())
        });
        self.finish_model_load(result)
    }

    /// Marks the model as loading. Returns false when a load already ran or is
    /// running; the model is loaded at most once per controller.
    pub fn begin_model_load(&mut self) -> bool {
        if !matches!(self.model, ModelState::NotLoaded) {
            tracing::warn!("model load requested again, ignoring");
            return false;
        }
        self.model = ModelState::Loading;
        self.surface.set_status("Loading AI model...", StatusKind::Loading);
        true
    }

    /// Feeds a phase reported by a load running elsewhere.
    pub fn model_load_phase(&mut self, phase: LoadPhase) {
        if matches!(self.model, ModelState::Loading) {
            self.surface.show_progress(phase.percent(), phase.message());
        }
    }

    pub fn finish_model_load(
        &mut self,
        result: Result<ModelHandle, PipelineError>,
    ) -> Result<(), PipelineError> {
        if !matches!(self.model, ModelState::Loading) {
            tracing::warn!("model load finished without a pending load, ignoring");
            return Ok(());
        }
        match result {
            Ok(handle) => {
                self.model = ModelState::Ready(Arc::new(handle));
                self.surface
                    .show_progress(LoadPhase::Ready.percent(), LoadPhase::Ready.message());
                self.surface.set_status("AI model ready", StatusKind::Ready);
                self.surface.emit(PipelineEvent::ModelReady);
                Ok(())
            }
            Err(err) => {
                tracing::error!("{err}");
                let detail = match &err {
                    PipelineError::ModelLoad(msg) => msg.clone(),
                    other => other.to_string(),
                };
                self.model = ModelState::Failed(detail);
                self.surface.hide_progress();
                self.surface.set_status("Model failed to load", StatusKind::Error);
                self.surface.notice(&err);
                Err(err)
            }
        }
    }

    /// Hides a completed progress bar. Renderers call this after a short delay.
    pub fn hide_progress(&mut self) {
        self.surface.hide_progress();
    }

    pub fn acquire_file(&mut self, payload: FilePayload) -> Result<AcquireOutcome, PipelineError> {
        self.acquire_payload(payload, ImageOrigin::Upload)
    }

    /// Uses the first dropped file; an empty drop changes nothing.
    pub fn acquire_drop(
        &mut self,
        files: Vec<FilePayload>,
    ) -> Result<AcquireOutcome, PipelineError> {
        match acquisition::first_dropped(files) {
            Some(payload) => self.acquire_payload(payload, ImageOrigin::Drop),
            None => Ok(AcquireOutcome::Ignored),
        }
    }

    fn acquire_payload(
        &mut self,
        payload: FilePayload,
        origin: ImageOrigin,
    ) -> Result<AcquireOutcome, PipelineError> {
        let name = payload.name.clone();
        match acquisition::image_from_payload(payload, origin) {
            Ok(source) => Ok(self.install_image(source)),
            Err(err) => {
                tracing::warn!("rejected {name}: {err}");
                self.surface.notice(&err);
                Err(err)
            }
        }
    }

    fn install_image(&mut self, source: ImageSource) -> AcquireOutcome {
        tracing::info!("acquired {} from {:?}", source.name(), source.origin());
        let event = PipelineEvent::ImageAcquired {
            origin: source.origin(),
            name: source.name().to_string(),
        };
        self.supersede_analysis();
        self.image = Some(source);
        self.surface.clear_result();
        self.surface.emit(event);

        if !(self.config.auto_analyze && self.is_model_ready()) {
            return AcquireOutcome::Previewed;
        }
        let started = match self.analysis_mode {
            AnalysisMode::Inline => self.analyze().map(AcquireOutcome::Analyzed),
            AnalysisMode::Deferred => self.begin_analysis().map(|job| {
                self.queued_analysis = Some(job);
                AcquireOutcome::Queued
            }),
        };
        started.unwrap_or_else(AcquireOutcome::AnalysisFailed)
    }

    /// Invalidates the analysis in flight, if any; its late stages and
    /// result are dropped.
    fn supersede_analysis(&mut self) {
        self.analysis_ticket += 1;
        self.queued_analysis = None;
        if std::mem::take(&mut self.analyzing) {
            tracing::info!("analysis superseded");
            self.surface.stage = AnalysisStage::Idle;
            self.surface.hide_progress();
        }
    }

    pub fn start_camera(&mut self) -> Result<(), PipelineError> {
        if self.camera.is_streaming() {
            return Ok(());
        }
        let constraints = self.config.capture_constraints();
        match self.camera.start(self.camera_device.as_ref(), &constraints) {
            Ok(()) => {
                self.surface.emit(PipelineEvent::CameraStarted);
                Ok(())
            }
            Err(err) => {
                self.surface.notice(&err);
                Err(err)
            }
        }
    }

    pub fn stop_camera(&mut self) {
        if self.camera.stop() {
            self.surface.emit(PipelineEvent::CameraStopped);
        }
    }

    /// Latest frame for the live view, while the camera is streaming.
    pub fn live_frame(&mut self) -> Option<RgbImage> {
        self.camera.live_frame()
    }

    /// Snapshots the live camera into the preview. The camera is stopped
    /// afterwards whether or not the snapshot worked.
    pub fn capture(&mut self) -> Result<AcquireOutcome, PipelineError> {
        let was_streaming = self.camera.is_streaming();
        let frame = self.camera.capture();
        if was_streaming {
            self.surface.emit(PipelineEvent::CameraStopped);
        }
        let source = frame.and_then(|frame| {
            acquisition::image_from_frame(&frame)
                .map_err(|e| PipelineError::CameraUnavailable(format!("{e:#}")))
        });
        match source {
            Ok(source) => Ok(self.install_image(source)),
            Err(err) => {
                self.surface.notice(&err);
                Err(err)
            }
        }
    }

    /// Runs a whole analysis on the calling thread.
    pub fn analyze(&mut self) -> Result<Verdict, PipelineError> {
        let job = self.begin_analysis()?;
        let ticket = job.ticket();
        let result = job.run(|stage| self.advance_analysis(ticket, stage));
        self.finish_analysis(ticket, result).unwrap_or_else(|| {
            Err(PipelineError::AnalysisRuntime(
                "analysis was superseded".to_string(),
            ))
        })
    }

    /// Checks the preconditions and hands out the job for one analysis.
    ///
    /// The caller runs it, feeds its stages to [`Controller::advance_analysis`]
    /// and its result to [`Controller::finish_analysis`].
    pub fn begin_analysis(&mut self) -> Result<AnalysisJob, PipelineError> {
        if self.analyzing {
            return Err(refuse(&mut self.surface, Precondition::AnalysisRunning));
        }
        let (handle, image) = match (&self.model, &self.image) {
            (ModelState::Ready(handle), Some(image)) => (handle, image),
            (ModelState::Ready(_), None) => {
                return Err(refuse(&mut self.surface, Precondition::NoImage));
            }
            _ => return Err(refuse(&mut self.surface, Precondition::ModelNotReady)),
        };
        self.analysis_ticket += 1;
        let job = AnalysisJob::new(self.analysis_ticket, Arc::clone(handle), image.clone());
        tracing::debug!("analysis {} started for {}", job.ticket(), job.image_name());

        self.analyzing = true;
        self.surface.show_progress(ANALYSIS_STARTED.0, ANALYSIS_STARTED.1);
        Ok(job)
    }

    fn is_current(&self, ticket: u64) -> bool {
        self.analyzing && ticket == self.analysis_ticket
    }

    /// Feeds a stage reported by a running job. Stale jobs are ignored.
    pub fn advance_analysis(&mut self, ticket: u64, stage: AnalysisStage) {
        if self.is_current(ticket) {
            self.surface.stage(stage);
        }
    }

    /// Applies a job's result. Returns `None` when the job was superseded by
    /// a newer image or a reset, in which case nothing changes.
    pub fn finish_analysis(
        &mut self,
        ticket: u64,
        result: Result<Verdict, PipelineError>,
    ) -> Option<Result<Verdict, PipelineError>> {
        if !self.is_current(ticket) {
            tracing::debug!("dropping result of superseded analysis {ticket}");
            return None;
        }
        self.analyzing = false;
        Some(match result {
            Ok(verdict) => {
                self.surface.verdict = Some(verdict);
                self.surface.emit(PipelineEvent::Verdict(verdict));
                Ok(verdict)
            }
            Err(err) => {
                self.surface.hide_progress();
                self.surface.notice(&err);
                Err(err)
            }
        })
    }

    /// The auto-analysis started by the last acquisition in
    /// [`AnalysisMode::Deferred`].
    pub fn take_queued_analysis(&mut self) -> Option<AnalysisJob> {
        self.queued_analysis.take()
    }

    /// Clears preview and result and closes the camera.
    pub fn reset(&mut self) {
        self.stop_camera();
        self.supersede_analysis();
        self.surface.stage = AnalysisStage::Idle;
        if self.image.take().is_some() {
            self.surface.emit(PipelineEvent::PreviewCleared);
        }
        self.surface.clear_result();
    }

    /// Ends the session. Dropping the controller does the same cleanup.
    pub fn dispose(mut self) {
        self.stop_camera();
        tracing::info!("controller disposed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::NoCamera;
    use crate::camera::synthetic::SyntheticCamera;
    use crate::model::tests::ConstModel;
    use crate::model::{InferenceModel, ModelSource};
    use anyhow::anyhow;
    use image::{ImageBuffer, ImageFormat, Rgb};
    use std::io::Cursor;
    use std::sync::{Arc, Mutex, mpsc};
    use std::thread;

    struct OnceSource(Mutex<Option<ConstModel>>);

    impl ModelSource for OnceSource {
        fn describe(&self) -> String {
            "test".into()
        }
        fn fetch(&self) -> anyhow::Result<Box<dyn InferenceModel>> {
            let model = self.0.lock().unwrap().take().ok_or_else(|| anyhow!("gone"))?;
            Ok(Box::new(model))
        }
    }

    fn source(score: f32) -> OnceSource {
        OnceSource(Mutex::new(Some(ConstModel::new(score))))
    }

    fn png(name: &str) -> FilePayload {
        let img: image::RgbImage = ImageBuffer::from_pixel(8, 8, Rgb([1, 2, 3]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        FilePayload::new(name, "image/png", out.into_inner())
    }

    fn recorder(ctrl: &mut Controller) -> Arc<Mutex<Vec<PipelineEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        ctrl.subscribe(move |e: &PipelineEvent| sink.lock().unwrap().push(e.clone()));
        events
    }

    fn controller() -> Controller {
        Controller::new(
            PipelineConfig::default(),
            Box::new(SyntheticCamera::new(64, 48)),
        )
    }

    #[test]
    fn analyze_button_follows_model_and_image() {
        let mut ctrl = controller();
        assert!(!ctrl.view().analyze_enabled());
        ctrl.acquire_file(png("a.png")).unwrap();
        assert!(ctrl.view().analyze_visible());
        assert!(!ctrl.view().analyze_enabled());
        ctrl.load_model(&source(0.8)).unwrap();
        assert!(ctrl.view().analyze_enabled());
    }

    #[test]
    fn model_loads_only_once() {
        let mut ctrl = controller();
        ctrl.load_model(&source(0.8)).unwrap();
        // second source would fail if fetched
        ctrl.load_model(&OnceSource(Mutex::new(None))).unwrap();
        assert!(ctrl.is_model_ready());
    }

    #[test]
    fn load_failure_is_terminal() {
        let mut ctrl = controller();
        let events = recorder(&mut ctrl);
        let err = ctrl.load_model(&OnceSource(Mutex::new(None))).unwrap_err();
        assert!(matches!(err, PipelineError::ModelLoad(_)));
        assert_eq!(ctrl.view().status.kind, StatusKind::Error);
        assert!(ctrl.view().progress.is_none());
        assert!(ctrl.view().notice.is_some());

        assert!(ctrl.load_model(&source(0.8)).is_err());
        ctrl.acquire_file(png("a.png")).unwrap();
        assert!(!ctrl.view().analyze_enabled());
        assert!(
            events
                .lock()
                .unwrap()
                .iter()
                .all(|e| *e != PipelineEvent::ModelReady)
        );
    }

    #[test]
    fn rejected_file_keeps_preview_and_verdict() {
        let mut ctrl = controller();
        ctrl.load_model(&source(0.8)).unwrap();
        ctrl.acquire_file(png("a.png")).unwrap();
        let before = *ctrl.view().verdict.unwrap();

        let err = ctrl
            .acquire_file(FilePayload::new("notes.txt", "text/plain", b"hi".to_vec()))
            .unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedFileType { .. }));
        let view = ctrl.view();
        assert_eq!(view.preview.map(|p| p.name()), Some("a.png"));
        assert_eq!(view.verdict, Some(&before));
        assert!(view.notice.is_some());
    }

    #[test]
    fn empty_drop_is_ignored() {
        let mut ctrl = controller();
        assert_eq!(ctrl.acquire_drop(Vec::new()).unwrap(), AcquireOutcome::Ignored);
        assert!(ctrl.view().preview.is_none());
    }

    #[test]
    fn drop_uses_first_file() {
        let mut ctrl = controller();
        let outcome = ctrl.acquire_drop(vec![png("first.png"), png("second.png")]).unwrap();
        assert_eq!(outcome, AcquireOutcome::Previewed);
        let view = ctrl.view();
        let preview = view.preview.unwrap();
        assert_eq!(preview.name(), "first.png");
        assert_eq!(preview.origin(), ImageOrigin::Drop);
    }

    #[test]
    fn new_image_clears_result_before_analysis() {
        let mut ctrl = controller();
        ctrl.load_model(&source(0.8)).unwrap();
        ctrl.acquire_file(png("a.png")).unwrap();
        let events = recorder(&mut ctrl);

        ctrl.acquire_file(png("b.png")).unwrap();
        let events = events.lock().unwrap();
        let cleared = events
            .iter()
            .position(|e| *e == PipelineEvent::ResultCleared)
            .unwrap();
        let started = events
            .iter()
            .position(|e| *e == PipelineEvent::Stage(AnalysisStage::Preprocessing))
            .unwrap();
        assert!(cleared < started);
    }

    #[test]
    fn auto_analyze_can_be_turned_off() {
        let mut ctrl = Controller::new(
            PipelineConfig {
                auto_analyze: false,
                ..PipelineConfig::default()
            },
            Box::new(SyntheticCamera::new(64, 48)),
        );
        ctrl.load_model(&source(0.8)).unwrap();
        assert_eq!(
            ctrl.acquire_file(png("a.png")).unwrap(),
            AcquireOutcome::Previewed
        );
        assert!(ctrl.view().verdict.is_none());
    }

    #[test]
    fn analysis_without_image_is_a_precondition_failure() {
        let mut ctrl = controller();
        ctrl.load_model(&source(0.8)).unwrap();
        assert_eq!(
            ctrl.analyze().unwrap_err(),
            PipelineError::AnalysisPrecondition(Precondition::NoImage)
        );
    }

    #[test]
    fn broken_image_fails_analysis_and_reenables_button() {
        let mut ctrl = controller();
        ctrl.load_model(&source(0.8)).unwrap();
        let outcome = ctrl
            .acquire_file(FilePayload::new("bad.png", "image/png", vec![0, 1, 2]))
            .unwrap();
        assert!(matches!(
            outcome,
            AcquireOutcome::AnalysisFailed(PipelineError::AnalysisRuntime(_))
        ));
        assert_eq!(ctrl.analysis_stage(), AnalysisStage::Failed);
        let view = ctrl.view();
        assert!(view.analyze_enabled());
        assert!(view.progress.is_none());
        assert!(view.verdict.is_none());
        assert!(view.notice.is_some());
    }

    #[test]
    fn progress_rises_during_analysis() {
        let mut ctrl = controller();
        ctrl.load_model(&source(0.3)).unwrap();
        let events = recorder(&mut ctrl);
        ctrl.acquire_file(png("a.png")).unwrap();
        let percents: Vec<u8> = events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                PipelineEvent::Progress(p) => Some(p.percent),
                _ => None,
            })
            .collect();
        assert_eq!(percents, vec![30, 50, 75, 100]);
        ctrl.hide_progress();
        assert!(ctrl.view().progress.is_none());
    }

    #[test]
    fn reset_clears_everything_and_stops_camera() {
        let camera = SyntheticCamera::new(64, 48);
        let mut ctrl = Controller::new(PipelineConfig::default(), Box::new(camera.clone()));
        ctrl.load_model(&source(0.8)).unwrap();
        ctrl.acquire_file(png("a.png")).unwrap();
        ctrl.start_camera().unwrap();

        ctrl.reset();
        let view = ctrl.view();
        assert!(view.preview.is_none());
        assert!(view.verdict.is_none());
        assert!(!view.camera_active);
        assert_eq!(camera.live_streams(), 0);
    }

    #[test]
    fn camera_denial_is_reported_and_recoverable() {
        let mut ctrl = Controller::new(
            PipelineConfig::default(),
            Box::new(SyntheticCamera::denied()),
        );
        let err = ctrl.start_camera().unwrap_err();
        assert_eq!(err, PipelineError::CameraPermissionDenied);
        assert_eq!(ctrl.camera_state(), CameraState::Idle);
        assert!(ctrl.view().notice.is_some());
        ctrl.stop_camera();
    }

    #[test]
    fn capture_without_camera_fails_cleanly() {
        let mut ctrl = controller();
        let events = recorder(&mut ctrl);
        assert!(ctrl.capture().is_err());
        assert_eq!(ctrl.camera_state(), CameraState::Idle);
        assert!(
            !events
                .lock()
                .unwrap()
                .contains(&PipelineEvent::CameraStopped)
        );
    }

    #[test]
    fn dispose_and_drop_release_the_camera() {
        let camera = SyntheticCamera::new(64, 48);
        let mut ctrl = Controller::new(PipelineConfig::default(), Box::new(camera.clone()));
        ctrl.start_camera().unwrap();
        ctrl.dispose();
        assert_eq!(camera.live_streams(), 0);

        let mut ctrl = Controller::new(PipelineConfig::default(), Box::new(camera.clone()));
        ctrl.start_camera().unwrap();
        drop(ctrl);
        assert_eq!(camera.live_streams(), 0);
    }

    fn deferred_controller(score: f32) -> Controller {
        let mut ctrl = controller();
        ctrl.set_analysis_mode(AnalysisMode::Deferred);
        ctrl.load_model(&source(score)).unwrap();
        ctrl
    }

    #[test]
    fn deferred_analysis_runs_on_a_worker() {
        let mut ctrl = deferred_controller(0.8);
        let events = recorder(&mut ctrl);
        assert_eq!(ctrl.acquire_file(png("a.png")).unwrap(), AcquireOutcome::Queued);
        {
            let view = ctrl.view();
            assert!(view.analyzing);
            assert!(!view.analyze_enabled());
            assert_eq!(view.progress.map(|p| p.percent), Some(30));
        }

        let job = ctrl.take_queued_analysis().unwrap();
        assert!(ctrl.take_queued_analysis().is_none());
        let ticket = job.ticket();
        let (tx, rx) = mpsc::channel();
        let worker = thread::spawn(move || {
            job.run(|stage| tx.send(stage).unwrap())
        });
        let result = worker.join().unwrap();
        for stage in rx.try_iter() {
            ctrl.advance_analysis(ticket, stage);
            if stage == AnalysisStage::Inferring {
                assert_eq!(ctrl.view().progress.map(|p| p.percent), Some(75));
            }
        }
        let verdict = ctrl.finish_analysis(ticket, result).unwrap().unwrap();

        assert!(verdict.is_positive);
        assert_eq!(ctrl.view().verdict, Some(&verdict));
        assert!(ctrl.view().analyze_enabled());
        let percents: Vec<u8> = events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                PipelineEvent::Progress(p) => Some(p.percent),
                _ => None,
            })
            .collect();
        assert_eq!(percents, vec![30, 50, 75, 100]);
    }

    #[test]
    fn second_analysis_is_refused_while_one_runs() {
        let mut ctrl = deferred_controller(0.8);
        ctrl.acquire_file(png("a.png")).unwrap();
        assert_eq!(
            ctrl.begin_analysis().unwrap_err(),
            PipelineError::AnalysisPrecondition(Precondition::AnalysisRunning)
        );
        assert!(ctrl.take_queued_analysis().is_some());
    }

    #[test]
    fn result_for_a_replaced_image_is_dropped() {
        let mut ctrl = deferred_controller(0.8);
        ctrl.acquire_file(png("a.png")).unwrap();
        let old = ctrl.take_queued_analysis().unwrap();
        let old_ticket = old.ticket();

        ctrl.acquire_file(png("b.png")).unwrap();
        let result = old.run(|stage| ctrl.advance_analysis(old_ticket, stage));
        assert!(ctrl.finish_analysis(old_ticket, result).is_none());
        assert!(ctrl.view().verdict.is_none());
        assert_eq!(ctrl.view().progress.map(|p| p.percent), Some(30));

        let current = ctrl.take_queued_analysis().unwrap();
        assert_eq!(current.image_name(), "b.png");
        assert_ne!(current.ticket(), old_ticket);
    }

    #[test]
    fn reset_discards_a_running_analysis() {
        let mut ctrl = deferred_controller(0.3);
        ctrl.acquire_file(png("a.png")).unwrap();
        let job = ctrl.take_queued_analysis().unwrap();
        let ticket = job.ticket();

        ctrl.reset();
        assert!(!ctrl.view().analyzing);
        assert!(ctrl.view().progress.is_none());
        let result = job.run(|_| {});
        assert!(ctrl.finish_analysis(ticket, result).is_none());
        assert!(ctrl.view().verdict.is_none());
        assert_eq!(ctrl.analysis_stage(), AnalysisStage::Idle);
    }

    #[test]
    fn missing_camera_backend_reports_unavailable() {
        let mut ctrl = Controller::new(PipelineConfig::default(), Box::new(NoCamera));
        let err = ctrl.start_camera().unwrap_err();
        assert!(matches!(err, PipelineError::CameraUnavailable(_)));
        assert_eq!(ctrl.camera_state(), CameraState::Idle);
        assert_eq!(ctrl.view().notice, Some(err.user_message().as_str()));
    }
}
