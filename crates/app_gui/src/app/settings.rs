//! Settings panel rendering for analysis, camera and model options.

use super::{Panel, UiApp};
use cardcheck_core::FacingMode;
use eframe::egui;

fn facing_label(facing: FacingMode) -> &'static str {
    match facing {
        FacingMode::Environment => "Rear (environment)",
        FacingMode::User => "Front (user)",
    }
}

impl UiApp {
    /// Renders the settings screen; changes apply when saved.
    pub(super) fn render_settings_panel(&mut self, ui: &mut egui::Ui) {
        ui.heading("Settings");
        ui.add_space(8.0);
        ui.checkbox(
            &mut self.pending_config.auto_analyze,
            "Analyze automatically after choosing an image",
        );

        ui.add_space(12.0);
        ui.label("Camera");
        ui.horizontal(|ui| {
            ui.label("Ideal size");
            ui.add(
                egui::DragValue::new(&mut self.pending_config.camera.ideal_width)
                    .range(160..=3840)
                    .speed(8),
            );
            ui.label("×");
            ui.add(
                egui::DragValue::new(&mut self.pending_config.camera.ideal_height)
                    .range(120..=2160)
                    .speed(8),
            );
        });
        ui.horizontal(|ui| {
            ui.label("Facing");
            let facing = &mut self.pending_config.camera.facing;
            egui::ComboBox::from_id_salt("camera-facing")
                .selected_text(facing_label(*facing))
                .show_ui(ui, |ui| {
                    for option in [FacingMode::Environment, FacingMode::User] {
                        ui.selectable_value(facing, option, facing_label(option));
                    }
                });
        });

        ui.add_space(12.0);
        ui.horizontal(|ui| {
            ui.label("Model folder");
            let mut dir = self.pending_config.model_dir.display().to_string();
            if ui.text_edit_singleline(&mut dir).changed() {
                self.pending_config.model_dir = dir.into();
            }
        });
        ui.label("A new model folder is used after restarting the app.");

        ui.add_space(12.0);
        ui.horizontal(|ui| {
            if ui.button("Save").clicked() {
                self.save_settings();
            }
            if ui.button("Cancel").clicked() {
                self.pending_config = self.controller.config().clone();
                self.panel = Panel::Main;
            }
        });

        ui.add_space(16.0);
        ui.separator();
        ui.add_space(6.0);
        ui.heading("Versions");
        ui.label(format!("App version: {}", self.app_version));
        match self.controller.model().and_then(|m| m.info()) {
            Some(info) => {
                if let Some(description) = &info.description {
                    ui.label(format!("Model: {description}"));
                }
                if !info.classes.is_empty() {
                    ui.label(format!("Classes: {}", info.classes.join(", ")));
                }
            }
            None if self.controller.is_model_ready() => {
                ui.label("Model: no description available");
            }
            None => {
                ui.label("Model: not loaded");
            }
        }
    }

    fn save_settings(&mut self) {
        let config = self.pending_config.clone();
        self.status = match &self.settings_path {
            Some(path) => match config.save(path) {
                Ok(()) => "Settings saved.".to_string(),
                Err(e) => {
                    tracing::warn!("Failed to save settings: {e:#}");
                    format!("Settings apply to this session only: {e:#}")
                }
            },
            None => "Settings apply to this session only.".to_string(),
        };
        self.controller.set_config(config);
        self.panel = Panel::Main;
    }
}
