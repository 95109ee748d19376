//! egui renderer over the pipeline controller.

mod settings;

use anyhow::Result;
use cardcheck_core::acquisition::media_type_for_path;
use cardcheck_core::model::default_source;
use cardcheck_core::{
    AnalysisJob, AnalysisMode, AnalysisStage, CameraDevice, Controller, FilePayload, ImageSource,
    LoadPhase, ModelHandle, PipelineConfig, PipelineError, PipelineEvent, StatusKind, Verdict,
    load_model,
};
use directories_next::ProjectDirs;
use eframe::{App, CreationContext, Frame, egui};
use rfd::FileDialog;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::time::{Duration, Instant};

const PREVIEW_MAX_SIDE: u32 = 1024;
const PREVIEW_BOX: egui::Vec2 = egui::vec2(480.0, 360.0);
/// How long a finished progress bar stays visible.
const PROGRESS_LINGER: Duration = Duration::from_millis(800);
const CAMERA_REPAINT: Duration = Duration::from_millis(33);
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "webp", "tiff"];

const POSITIVE_COLOR: egui::Color32 = egui::Color32::from_rgb(76, 175, 80);
const NEGATIVE_COLOR: egui::Color32 = egui::Color32::from_rgb(238, 90, 36);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Panel {
    Main,
    Settings,
}

enum LoadMessage {
    Phase(LoadPhase),
    Done(Result<ModelHandle, PipelineError>),
}

enum AnalysisMessage {
    Stage(AnalysisStage),
    Done(Result<Verdict, PipelineError>),
}

/// Receiver for the analysis running on a worker, tagged with its ticket.
struct RunningAnalysis {
    ticket: u64,
    rx: Receiver<AnalysisMessage>,
}

pub struct UiApp {
    controller: Controller,
    events: Receiver<PipelineEvent>,
    model_load: Option<Receiver<LoadMessage>>,
    analysis: Option<RunningAnalysis>,
    panel: Panel,
    settings_path: Option<PathBuf>,
    pending_config: PipelineConfig,
    status: String,
    app_version: &'static str,
    preview_texture: Option<egui::TextureHandle>,
    live_texture: Option<egui::TextureHandle>,
    progress_full_since: Option<Instant>,
}

fn settings_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "CardCheck").map(|dirs| dirs.config_dir().join("cardcheck.toml"))
}

fn load_config(path: Option<&Path>) -> PipelineConfig {
    let Some(path) = path else {
        return PipelineConfig::default();
    };
    PipelineConfig::load(path).unwrap_or_else(|e| {
        tracing::warn!("Falling back to default settings: {e:#}");
        PipelineConfig::default()
    })
}

/// Native drops usually carry a path, web drops carry the bytes.
fn dropped_payload(file: &egui::DroppedFile) -> Result<FilePayload> {
    if let Some(bytes) = &file.bytes {
        let media_type = if file.mime.is_empty() {
            media_type_for_path(Path::new(&file.name)).to_string()
        } else {
            file.mime.clone()
        };
        return Ok(FilePayload::new(file.name.clone(), media_type, bytes.to_vec()));
    }
    match &file.path {
        Some(path) => FilePayload::from_path(path),
        None => anyhow::bail!("dropped item {} has neither bytes nor a path", file.name),
    }
}

#[cfg(feature = "synthetic-camera")]
fn camera_device(config: &PipelineConfig) -> Box<dyn CameraDevice> {
    tracing::info!("using the synthetic test-pattern camera");
    Box::new(cardcheck_core::SyntheticCamera::new(
        config.camera.ideal_width,
        config.camera.ideal_height,
    ))
}

#[cfg(not(feature = "synthetic-camera"))]
fn camera_device(_config: &PipelineConfig) -> Box<dyn CameraDevice> {
    Box::new(cardcheck_core::NoCamera)
}

fn preview_image(source: &ImageSource) -> Option<egui::ColorImage> {
    match source.decode() {
        Ok(img) => {
            let thumb = img.thumbnail(PREVIEW_MAX_SIDE, PREVIEW_MAX_SIDE).to_rgba8();
            let size = [thumb.width() as usize, thumb.height() as usize];
            Some(egui::ColorImage::from_rgba_unmultiplied(
                size,
                &thumb.into_raw(),
            ))
        }
        Err(e) => {
            tracing::warn!("Cannot render preview: {e:#}");
            None
        }
    }
}

impl UiApp {
    pub fn new(cc: &CreationContext<'_>) -> Self {
        let settings_path = settings_path();
        let config = load_config(settings_path.as_deref());
        let mut controller = Controller::new(config.clone(), camera_device(&config));
        controller.set_analysis_mode(AnalysisMode::Deferred);
        let (tx, events) = mpsc::channel();
        controller.subscribe(move |e: &PipelineEvent| {
            let _ = tx.send(e.clone());
        });

        let mut app = Self {
            controller,
            events,
            model_load: None,
            analysis: None,
            panel: Panel::Main,
            settings_path,
            pending_config: config,
            status: String::new(),
            app_version: env!("CARDCHECK_VERSION"),
            preview_texture: None,
            live_texture: None,
            progress_full_since: None,
        };
        app.spawn_model_load(&cc.egui_ctx);
        app
    }

    /// Loads the model on a worker thread; phases come back over a channel.
    fn spawn_model_load(&mut self, ctx: &egui::Context) {
        if !self.controller.begin_model_load() {
            return;
        }
        let source = default_source(self.controller.config());
        let (tx, rx) = mpsc::channel();
        let ctx = ctx.clone();
        std::thread::spawn(move || {
            let result = load_model(source.as_ref(), |phase| {
                let _ = tx.send(LoadMessage::Phase(phase));
                ctx.request_repaint();
            });
            let _ = tx.send(LoadMessage::Done(result));
            ctx.request_repaint();
        });
        self.model_load = Some(rx);
    }

    fn poll_model_load(&mut self) {
        let Some(rx) = &self.model_load else {
            return;
        };
        let mut finished = None;
        loop {
            match rx.try_recv() {
                Ok(LoadMessage::Phase(phase)) => self.controller.model_load_phase(phase),
                Ok(LoadMessage::Done(result)) => {
                    finished = Some(result);
                    break;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    finished = Some(Err(PipelineError::ModelLoad(
                        "model loader thread exited".to_string(),
                    )));
                    break;
                }
            }
        }
        if let Some(result) = finished {
            self.model_load = None;
            if let Err(e) = self.controller.finish_model_load(result) {
                tracing::error!("Model unavailable: {e}");
            }
        }
    }

    /// Runs one analysis on a worker thread. A newer job replaces the
    /// receiver; the controller drops results of superseded jobs anyway.
    fn spawn_analysis(&mut self, job: AnalysisJob, ctx: &egui::Context) {
        let ticket = job.ticket();
        let (tx, rx) = mpsc::channel();
        let ctx = ctx.clone();
        std::thread::spawn(move || {
            let result = job.run(|stage| {
                let _ = tx.send(AnalysisMessage::Stage(stage));
                ctx.request_repaint();
            });
            let _ = tx.send(AnalysisMessage::Done(result));
            ctx.request_repaint();
        });
        self.analysis = Some(RunningAnalysis { ticket, rx });
    }

    fn start_queued_analysis(&mut self, ctx: &egui::Context) {
        if let Some(job) = self.controller.take_queued_analysis() {
            self.spawn_analysis(job, ctx);
        }
    }

    fn poll_analysis(&mut self) {
        let Some(running) = &self.analysis else {
            return;
        };
        let ticket = running.ticket;
        let mut finished = None;
        loop {
            match running.rx.try_recv() {
                Ok(AnalysisMessage::Stage(stage)) => {
                    self.controller.advance_analysis(ticket, stage)
                }
                Ok(AnalysisMessage::Done(result)) => {
                    finished = Some(result);
                    break;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    finished = Some(Err(PipelineError::AnalysisRuntime(
                        "analysis worker exited".to_string(),
                    )));
                    break;
                }
            }
        }
        if let Some(result) = finished {
            self.analysis = None;
            if let Some(Err(e)) = self.controller.finish_analysis(ticket, result) {
                tracing::info!("Analysis failed: {e}");
            }
        }
    }

    fn drain_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            tracing::debug!("pipeline event: {event:?}");
            match event {
                PipelineEvent::ImageAcquired { .. } | PipelineEvent::PreviewCleared => {
                    self.preview_texture = None;
                }
                PipelineEvent::CameraStopped => self.live_texture = None,
                _ => {}
            }
        }
    }

    fn tick_progress(&mut self) {
        let full = self
            .controller
            .view()
            .progress
            .is_some_and(|p| p.percent >= 100);
        if !full {
            self.progress_full_since = None;
            return;
        }
        let since = *self.progress_full_since.get_or_insert_with(Instant::now);
        if since.elapsed() >= PROGRESS_LINGER {
            self.controller.hide_progress();
            self.progress_full_since = None;
        }
    }

    fn handle_dropped_files(&mut self, ctx: &egui::Context) {
        let dropped = ctx.input(|i| i.raw.dropped_files.clone());
        if dropped.is_empty() {
            return;
        }
        let payloads: Vec<FilePayload> = dropped
            .iter()
            .take(1)
            .filter_map(|file| match dropped_payload(file) {
                Ok(p) => Some(p),
                Err(e) => {
                    tracing::warn!("Ignoring dropped file: {e:#}");
                    None
                }
            })
            .collect();
        if let Err(e) = self.controller.acquire_drop(payloads) {
            tracing::info!("Drop rejected: {e}");
        }
    }

    fn pick_file(&mut self) {
        let Some(path) = FileDialog::new()
            .add_filter("Images", IMAGE_EXTENSIONS)
            .add_filter("All files", &["*"])
            .pick_file()
        else {
            return;
        };
        match FilePayload::from_path(&path) {
            Ok(payload) => {
                if let Err(e) = self.controller.acquire_file(payload) {
                    tracing::info!("Upload rejected: {e}");
                }
            }
            Err(e) => self.status = format!("Cannot read {}: {e:#}", path.display()),
        }
    }

    fn ensure_preview_texture(&mut self, ctx: &egui::Context) {
        if self.preview_texture.is_some() {
            return;
        }
        let Some(source) = self.controller.view().preview else {
            return;
        };
        let name = format!("preview:{}", source.name());
        if let Some(color) = preview_image(source) {
            let texture = ctx.load_texture(name, color, egui::TextureOptions::LINEAR);
            self.preview_texture = Some(texture);
        }
    }

    fn refresh_live_texture(&mut self, ctx: &egui::Context) {
        let Some(frame) = self.controller.live_frame() else {
            return;
        };
        let size = [frame.width() as usize, frame.height() as usize];
        let color = egui::ColorImage::from_rgb(size, frame.as_raw());
        match &mut self.live_texture {
            Some(tex) => tex.set(color, egui::TextureOptions::LINEAR),
            None => {
                self.live_texture =
                    Some(ctx.load_texture("camera-live", color, egui::TextureOptions::LINEAR));
            }
        }
        ctx.request_repaint_after(CAMERA_REPAINT);
    }

    fn render_status(&self, ui: &mut egui::Ui) {
        let view = self.controller.view();
        let color = match view.status.kind {
            StatusKind::Loading => egui::Color32::from_rgb(255, 193, 7),
            StatusKind::Ready => POSITIVE_COLOR,
            StatusKind::Error => egui::Color32::from_rgb(244, 67, 54),
        };
        ui.horizontal(|ui| {
            ui.label(egui::RichText::new("●").color(color));
            ui.label(&view.status.text);
        });
    }

    fn render_main_panel(&mut self, ui: &mut egui::Ui, ctx: &egui::Context) {
        let hovering = ctx.input(|i| !i.raw.hovered_files.is_empty());
        let camera_active = self.controller.view().camera_active;

        if !camera_active {
            let mut zone = egui::Button::new("📁 Drop an image here, or click to choose a file")
                .min_size(egui::vec2(ui.available_width(), 80.0));
            if hovering {
                zone = zone.fill(egui::Color32::from_rgb(60, 80, 120));
            }
            if ui.add(zone).clicked() {
                self.pick_file();
            }
        }

        ui.add_space(8.0);
        ui.horizontal(|ui| {
            if camera_active {
                if ui.button("📸 Capture").clicked() {
                    if let Err(e) = self.controller.capture() {
                        tracing::info!("Capture failed: {e}");
                    }
                }
                if ui.button("⏹ Stop camera").clicked() {
                    self.controller.stop_camera();
                }
            } else if ui.button("📷 Start camera").clicked() {
                if let Err(e) = self.controller.start_camera() {
                    tracing::info!("Camera unavailable: {e}");
                }
            }

            let view = self.controller.view();
            if view.analyze_visible() {
                let enabled = view.analyze_enabled();
                if ui
                    .add_enabled(enabled, egui::Button::new("🔍 Analyze"))
                    .clicked()
                {
                    match self.controller.begin_analysis() {
                        Ok(job) => self.spawn_analysis(job, ctx),
                        Err(e) => tracing::info!("Analysis not started: {e}"),
                    }
                }
                if ui.button("🗑 Clear").clicked() {
                    self.controller.reset();
                }
            }
        });

        ui.add_space(8.0);
        if camera_active {
            self.refresh_live_texture(ctx);
            if let Some(tex) = &self.live_texture {
                ui.add(egui::Image::new(tex).max_size(PREVIEW_BOX));
            }
        } else {
            self.ensure_preview_texture(ctx);
            if let Some(tex) = &self.preview_texture {
                ui.add(egui::Image::new(tex).max_size(PREVIEW_BOX));
            }
        }

        let view = self.controller.view();
        if let Some(progress) = view.progress {
            ui.add_space(8.0);
            ui.label(&progress.message);
            ui.add(egui::ProgressBar::new(f32::from(progress.percent) / 100.0).show_percentage());
        }

        if let Some(verdict) = view.verdict {
            ui.add_space(12.0);
            let color = if verdict.is_positive {
                POSITIVE_COLOR
            } else {
                NEGATIVE_COLOR
            };
            ui.label(egui::RichText::new(verdict.message()).color(color).size(18.0));
            ui.add(
                egui::ProgressBar::new(verdict.percentage / 100.0)
                    .fill(color)
                    .text(verdict.confidence_text()),
            );
        }

        if let Some(notice) = view.notice {
            ui.add_space(8.0);
            ui.colored_label(NEGATIVE_COLOR, notice);
        }
    }
}

impl App for UiApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut Frame) {
        self.poll_model_load();
        self.poll_analysis();
        self.handle_dropped_files(ctx);
        self.start_queued_analysis(ctx);
        self.drain_events();
        self.tick_progress();
        let busy = self.model_load.is_some() || self.analysis.is_some();
        if busy || self.progress_full_since.is_some() {
            ctx.request_repaint_after(Duration::from_millis(100));
        }

        egui::TopBottomPanel::top("top").show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.heading("CardCheck");
                ui.separator();
                self.render_status(ui);
                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                    let label = match self.panel {
                        Panel::Main => "⚙ Settings",
                        Panel::Settings => "⬅ Back",
                    };
                    if ui.button(label).clicked() {
                        self.panel = match self.panel {
                            Panel::Main => Panel::Settings,
                            Panel::Settings => Panel::Main,
                        };
                    }
                });
            });
            if !self.status.is_empty() {
                ui.label(&self.status);
            }
        });

        egui::CentralPanel::default().show(ctx, |ui| match self.panel {
            Panel::Main => self.render_main_panel(ui, ctx),
            Panel::Settings => self.render_settings_panel(ui),
        });

        // Actions taken while rendering may have queued work or invalidated textures.
        self.start_queued_analysis(ctx);
        self.drain_events();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn dropped_bytes_keep_declared_mime() -> Result<()> {
        let file = egui::DroppedFile {
            name: "scan.bin".into(),
            mime: "image/png".into(),
            bytes: Some(Arc::from(vec![1u8, 2, 3])),
            ..Default::default()
        };
        let payload = dropped_payload(&file)?;
        assert_eq!(payload.media_type, "image/png");
        assert_eq!(payload.bytes(), &[1, 2, 3]);
        Ok(())
    }

    #[test]
    fn dropped_bytes_without_mime_use_the_name() -> Result<()> {
        let file = egui::DroppedFile {
            name: "card.jpg".into(),
            bytes: Some(Arc::from(vec![0u8])),
            ..Default::default()
        };
        assert_eq!(dropped_payload(&file)?.media_type, "image/jpeg");
        Ok(())
    }

    #[test]
    fn dropped_path_is_read_from_disk() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("card.png");
        fs::write(&path, b"not really a png")?;
        let file = egui::DroppedFile {
            path: Some(path),
            name: "card.png".into(),
            ..Default::default()
        };
        let payload = dropped_payload(&file)?;
        assert_eq!(payload.name, "card.png");
        assert_eq!(payload.media_type, "image/png");
        assert_eq!(payload.bytes(), b"not really a png");
        Ok(())
    }

    #[test]
    fn dropped_text_file_is_not_read() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("notes.txt");
        fs::write(&path, b"plain text")?;
        let file = egui::DroppedFile {
            path: Some(path),
            name: "notes.txt".into(),
            ..Default::default()
        };
        let payload = dropped_payload(&file)?;
        assert_eq!(payload.media_type, "application/octet-stream");
        assert!(payload.bytes().is_empty());
        Ok(())
    }

    #[cfg(not(feature = "synthetic-camera"))]
    #[test]
    fn default_build_has_no_camera_backend() {
        let config = PipelineConfig::default();
        let mut controller = Controller::new(config.clone(), camera_device(&config));
        assert!(matches!(
            controller.start_camera(),
            Err(PipelineError::CameraUnavailable(_))
        ));
        assert!(!controller.view().camera_active);
    }

    #[test]
    fn empty_drop_entry_is_an_error() {
        assert!(dropped_payload(&egui::DroppedFile::default()).is_err());
    }

    #[test]
    fn unreadable_settings_fall_back_to_defaults() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("cardcheck.toml");
        fs::write(&path, "auto_analyze = \"sometimes\"")?;
        assert_eq!(load_config(Some(&path)), PipelineConfig::default());
        assert_eq!(load_config(None), PipelineConfig::default());
        Ok(())
    }
}
