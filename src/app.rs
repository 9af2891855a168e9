use eframe::egui;
use image::imageops::{self, FilterType};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::controller::{display_size, Controller, NoticeLevel};
use crate::imageio;
use crate::settings::Settings;
use crate::worker::{SharedModel, Wake};

const BOX_COLOR: egui::Color32 = egui::Color32::RED;
const BOX_THICKNESS: f32 = 2.0;

const INSTRUCTIONS: &str = "Drag over the image to mark regions to erase, then press \
\"Inpaint Selected Regions\".\nShortcuts: Ctrl+O open, Ctrl+S save, Esc clear, Enter inpaint.\n\
Note: First run will download the model (~200MB) - please wait!";

pub type ModelInit = Box<dyn FnOnce() -> anyhow::Result<SharedModel> + Send>;

// ── App ─────────────────────────────────────────────────────────────────────

pub struct EraserApp {
    controller: Controller,
    settings_path: PathBuf,
    last_dir: Option<PathBuf>,

    texture: Option<egui::TextureHandle>,
    /// Controller generation the texture was built from.
    texture_generation: u64,
}

impl EraserApp {
    pub fn new(
        cc: &eframe::CreationContext<'_>,
        settings: Settings,
        settings_path: PathBuf,
        initial_image: Option<PathBuf>,
        init: ModelInit,
    ) -> Self {
        let ctx = cc.egui_ctx.clone();
        let wake: Wake = Arc::new(move || ctx.request_repaint());

        let mut controller = Controller::new(settings.max_display(), wake);
        controller.start_model_init(init);
        if let Some(path) = &initial_image {
            controller.load(path);
        }

        Self {
            controller,
            settings_path,
            last_dir: settings.last_dir,
            texture: None,
            texture_generation: 0,
        }
    }

    fn remember_dir(&mut self, file: &Path) {
        let Some(dir) = file.parent() else {
            return;
        };
        self.last_dir = Some(dir.to_path_buf());
        let mut stored = Settings::load_or_default(&self.settings_path);
        stored.last_dir = self.last_dir.clone();
        if let Err(e) = stored.save(&self.settings_path) {
            log::warn!("{e}");
        }
    }

    fn open_image(&mut self) {
        if let Some(path) = imageio::open_dialog(self.last_dir.as_deref()) {
            if self.controller.load(&path) {
                self.remember_dir(&path);
            }
        }
    }

    fn save_result(&mut self) {
        if !self.controller.require_result() {
            return;
        }
        if let Some(path) = imageio::save_dialog(self.last_dir.as_deref()) {
            if let Some(written) = self.controller.save(&path) {
                self.remember_dir(&written);
            }
        }
    }

    /// Upload the current image at display size whenever the controller has
    /// replaced it.
    fn ensure_texture(&mut self, ctx: &egui::Context) {
        if self.texture.is_some() && self.texture_generation == self.controller.generation() {
            return;
        }
        let (Some(img), Some(sel)) = (self.controller.image(), self.controller.selector()) else {
            return;
        };
        let (w, h) = display_size(img.width(), img.height(), sel.scale());
        let shown = if (w, h) == img.dimensions() {
            img.clone()
        } else {
            imageops::resize(img, w, h, FilterType::Lanczos3)
        };
        let color_image =
            egui::ColorImage::from_rgb([w as usize, h as usize], shown.as_raw());
        self.texture = Some(ctx.load_texture("image", color_image, egui::TextureOptions::LINEAR));
        self.texture_generation = self.controller.generation();
    }

    fn toolbar(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            if ui.button("Load Image").clicked() {
                self.open_image();
            }
            if ui.button("Clear Selections").clicked() {
                self.controller.clear_selections();
            }
            let idle = !self.controller.is_busy();
            if ui
                .add_enabled(idle, egui::Button::new("Inpaint Selected Regions"))
                .clicked()
            {
                self.controller.request_inpaint();
            }
            if ui.button("Save Result").clicked() {
                self.save_result();
            }
            if self.controller.is_busy() || self.controller.is_initializing() {
                ui.spinner();
            }
            if let Some(sel) = self.controller.selector() {
                ui.separator();
                ui.label(format!("Regions: {}", sel.len()));
            }
            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                ui.label(self.controller.status());
            });
        });
    }

    fn canvas(&mut self, ctx: &egui::Context, ui: &mut egui::Ui) {
        let Some(tex) = self.texture.clone() else {
            ui.centered_and_justified(|ui| {
                ui.label("Load an image to get started");
            });
            return;
        };

        egui::ScrollArea::both().show(ui, |ui| {
            let (response, painter) = ui.allocate_painter(tex.size_vec2(), egui::Sense::drag());
            // display coordinates are relative to the image's top-left corner
            let origin = response.rect.min;

            painter.image(
                tex.id(),
                response.rect,
                egui::Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0)),
                egui::Color32::WHITE,
            );

            let Some(sel) = self.controller.selector_mut() else {
                return;
            };

            if response.drag_started_by(egui::PointerButton::Primary) {
                let start = ctx
                    .input(|i| i.pointer.press_origin())
                    .or(response.interact_pointer_pos());
                if let Some(pos) = start {
                    sel.begin(pos - origin.to_vec2());
                }
            }
            if response.dragged_by(egui::PointerButton::Primary) {
                if let Some(pos) = response.interact_pointer_pos() {
                    sel.update(pos - origin.to_vec2());
                }
            }
            if response.drag_stopped_by(egui::PointerButton::Primary) {
                if let Some(pos) = response
                    .interact_pointer_pos()
                    .or(ctx.input(|i| i.pointer.latest_pos()))
                {
                    if let Some(bbox) = sel.commit(pos - origin.to_vec2()) {
                        log::debug!("committed {bbox:?}");
                    }
                }
            }

            let stroke = egui::Stroke::new(BOX_THICKNESS, BOX_COLOR);
            for marker in sel.markers().iter().chain(sel.preview().iter()) {
                painter.rect_stroke(
                    marker.translate(origin.to_vec2()),
                    0.0,
                    stroke,
                    egui::StrokeKind::Middle,
                );
            }
        });
    }

    fn notice_window(&mut self, ctx: &egui::Context) {
        let Some(notice) = self.controller.front_notice().cloned() else {
            return;
        };
        let mut dismissed = false;
        egui::Window::new(notice.title.as_str())
            .collapsible(false)
            .resizable(false)
            .anchor(egui::Align2::CENTER_CENTER, [0.0, 0.0])
            .show(ctx, |ui| {
                let color = match notice.level {
                    NoticeLevel::Warning => egui::Color32::from_rgb(230, 160, 0),
                    NoticeLevel::Error => egui::Color32::from_rgb(220, 50, 50),
                };
                ui.colored_label(color, &notice.message);
                ui.add_space(8.0);
                if ui.button("OK").clicked() {
                    dismissed = true;
                }
            });
        if dismissed || ctx.input(|i| i.key_pressed(egui::Key::Escape) && i.modifiers.is_none())
        {
            self.controller.dismiss_notice();
        }
    }
}

// ── eframe App impl ────────────────────────────────────────────────────────

impl eframe::App for EraserApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.controller.poll();
        self.ensure_texture(ctx);

        // Keyboard shortcuts, ignored while a notice is up
        if self.controller.front_notice().is_none() {
            let (open, save, clear, inpaint) = ctx.input(|i| {
                (
                    i.modifiers.command && i.key_pressed(egui::Key::O),
                    i.modifiers.command && i.key_pressed(egui::Key::S),
                    i.key_pressed(egui::Key::Escape),
                    i.key_pressed(egui::Key::Enter),
                )
            });
            if open {
                self.open_image();
            }
            if save {
                self.save_result();
            }
            if clear {
                self.controller.clear_selections();
            }
            if inpaint && !self.controller.is_busy() {
                self.controller.request_inpaint();
            }
        }

        egui::TopBottomPanel::top("toolbar").show(ctx, |ui| self.toolbar(ui));

        egui::TopBottomPanel::bottom("instructions").show(ctx, |ui| {
            ui.label(INSTRUCTIONS);
        });

        egui::CentralPanel::default().show(ctx, |ui| self.canvas(ctx, ui));

        self.notice_window(ctx);
    }
}
