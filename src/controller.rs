use image::RgbImage;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};

use crate::error::{AppError, InpaintError};
use crate::imageio;
use crate::selector::BoxSelector;
use crate::worker::{self, SharedModel, Wake, WorkerMessage};

// ── State ───────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppState {
    /// No image loaded.
    Idle,
    Ready,
    /// An inpaint job is in flight.
    Busy,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoticeLevel {
    Warning,
    Error,
}

/// A message the user has to acknowledge.
#[derive(Clone, Debug, PartialEq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub title: String,
    pub message: String,
}

/// Ratio of on-screen size to image size: fit inside `max`, never enlarge.
pub fn display_scale(width: u32, height: u32, max: (f32, f32)) -> f32 {
    if width == 0 || height == 0 {
        return 1.0;
    }
    (max.0 / width as f32).min(max.1 / height as f32).min(1.0)
}

/// On-screen size for a given scale, truncated, at least one pixel.
pub fn display_size(width: u32, height: u32, scale: f32) -> (u32, u32) {
    (
        ((width as f32 * scale) as u32).max(1),
        ((height as f32 * scale) as u32).max(1),
    )
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .unwrap_or_default()
        .to_string_lossy()
        .into_owned()
}

// ── Controller ──────────────────────────────────────────────────────────────

/// Owns everything the workflow touches: current image, result, selector,
/// model handle and the worker channel. All methods run on the UI thread.
pub struct Controller {
    max_display: (f32, f32),
    state: AppState,

    image: Option<RgbImage>,
    result: Option<RgbImage>,
    selector: Option<BoxSelector>,
    /// Bumped whenever `image` is replaced, so views know to re-upload.
    generation: u64,

    model: Option<SharedModel>,
    model_initializing: bool,

    status: String,
    notices: VecDeque<Notice>,

    tx: Sender<WorkerMessage>,
    rx: Receiver<WorkerMessage>,
    wake: Wake,
}

impl Controller {
    pub fn new(max_display: (f32, f32), wake: Wake) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            max_display,
            state: AppState::Idle,
            image: None,
            result: None,
            selector: None,
            generation: 0,
            model: None,
            model_initializing: false,
            status: "Load an image to get started".to_string(),
            notices: VecDeque::new(),
            tx,
            rx,
            wake,
        }
    }

    fn warn(&mut self, title: &str, message: impl Into<String>) {
        let message = message.into();
        log::warn!("{title}: {message}");
        self.notices.push_back(Notice {
            level: NoticeLevel::Warning,
            title: title.to_string(),
            message,
        });
    }

    fn error(&mut self, title: &str, message: impl Into<String>) {
        let message = message.into();
        log::error!("{title}: {message}");
        self.notices.push_back(Notice {
            level: NoticeLevel::Error,
            title: title.to_string(),
            message,
        });
    }

    // ── Model lifecycle ─────────────────────────────────────────────────────

    /// Build the model on a worker thread. Inpainting is gated until
    /// [`Controller::on_model_ready`] runs.
    pub fn start_model_init<F>(&mut self, init: F)
    where
        F: FnOnce() -> anyhow::Result<SharedModel> + Send + 'static,
    {
        if self.model.is_some() || self.model_initializing {
            return;
        }
        self.model_initializing = true;
        self.status = "Initializing model (downloading if first run)...".to_string();
        worker::spawn_model_init(self.tx.clone(), self.wake.clone(), init);
    }

    pub fn on_model_ready(&mut self, model: SharedModel) {
        self.model_initializing = false;
        self.model = Some(model);
        self.status = "Model ready! Load an image to get started (CPU mode)".to_string();
    }

    pub fn on_model_failed(&mut self, error: String) {
        self.model_initializing = false;
        let err = AppError::ModelInit(error);
        self.error("Model Error", err.to_string());
        self.status = "Model initialization failed".to_string();
    }

    // ── Actions ─────────────────────────────────────────────────────────────

    /// Open an image file and display it. On failure the previous state is
    /// kept untouched.
    pub fn load(&mut self, path: &Path) -> bool {
        if self.state == AppState::Busy {
            self.warn("Busy", "Wait for the current inpainting to finish");
            return false;
        }
        match imageio::load_rgb(path) {
            Ok(img) => {
                log::info!(
                    "loaded {} ({}x{})",
                    path.display(),
                    img.width(),
                    img.height()
                );
                self.image = Some(img);
                self.result = None;
                self.display();
                self.state = AppState::Ready;
                self.status = format!("Image loaded: {}", file_name(path));
                true
            }
            Err(e) => {
                self.error("Error", e.to_string());
                false
            }
        }
    }

    /// (Re)display the current image: fresh selector, new generation.
    fn display(&mut self) {
        let Some(img) = &self.image else {
            return;
        };
        let (w, h) = img.dimensions();
        let scale = display_scale(w, h, self.max_display);
        self.selector = Some(BoxSelector::new(w, h, scale));
        self.generation += 1;
    }

    pub fn clear_selections(&mut self) {
        if let Some(sel) = &mut self.selector {
            sel.clear();
            self.status = "Selections cleared".to_string();
        }
    }

    /// Validate preconditions and hand a snapshot to a worker. Returns
    /// whether a job was dispatched.
    pub fn request_inpaint(&mut self) -> bool {
        if self.state == AppState::Busy {
            log::warn!("inpaint requested while another one is running; ignored");
            return false;
        }
        if self.image.is_none() {
            self.warn("No Image", "Please load an image first");
            return false;
        }
        let boxes = self
            .selector
            .as_ref()
            .map(|sel| sel.boxes().to_vec())
            .unwrap_or_default();
        if boxes.is_empty() {
            self.warn("No Selections", "Please select regions to inpaint");
            return false;
        }
        let Some(model) = self.model.clone() else {
            self.warn("Model Not Ready", "Model is still initializing. Please wait.");
            return false;
        };
        let Some(image) = self.image.clone() else {
            return false;
        };

        log::info!(
            "dispatching inpaint of {} region(s) with {}",
            boxes.len(),
            model.name()
        );
        worker::spawn_inpaint(
            self.tx.clone(),
            self.wake.clone(),
            model,
            image,
            boxes,
        );
        self.state = AppState::Busy;
        self.status = "Processing... Please wait".to_string();
        true
    }

    pub fn on_inpaint_success(&mut self, result: RgbImage, regions: usize) {
        log::info!("inpainting completed ({regions} regions)");
        self.image = Some(result.clone());
        self.result = Some(result);
        self.display();
        self.state = AppState::Ready;
        self.status = format!("Inpainting completed! Processed {regions} regions");
    }

    pub fn on_inpaint_failure(&mut self, error: InpaintError) {
        let err = AppError::Inpaint(error);
        self.error("Inpainting Error", err.to_string());
        self.state = if self.image.is_some() {
            AppState::Ready
        } else {
            AppState::Idle
        };
        self.status = "Inpainting failed".to_string();
    }

    /// Warn and return false when there is nothing to save yet.
    pub fn require_result(&mut self) -> bool {
        if self.result.is_none() {
            self.warn("No Result", "No inpainted image to save");
            return false;
        }
        true
    }

    /// Write the last inpainting result. Returns the path written.
    pub fn save(&mut self, path: &Path) -> Option<PathBuf> {
        if !self.require_result() {
            return None;
        }
        let written = self.result.as_ref().map(|result| imageio::save_rgb(result, path))?;
        match written {
            Ok(written) => {
                log::info!("saved {}", written.display());
                self.status = format!("Image saved: {}", file_name(&written));
                Some(written)
            }
            Err(e) => {
                self.error("Save Error", e.to_string());
                None
            }
        }
    }

    /// Drain worker messages. Returns true if anything was handled.
    pub fn poll(&mut self) -> bool {
        let mut handled = false;
        while let Ok(msg) = self.rx.try_recv() {
            self.dispatch(msg);
            handled = true;
        }
        handled
    }

    fn dispatch(&mut self, msg: WorkerMessage) {
        log::debug!("worker message: {msg:?}");
        match msg {
            WorkerMessage::ModelReady(model) => self.on_model_ready(model),
            WorkerMessage::ModelFailed(e) => self.on_model_failed(e),
            WorkerMessage::InpaintDone { image, regions } => self.on_inpaint_success(image, regions),
            WorkerMessage::InpaintFailed(e) => self.on_inpaint_failure(e),
        }
    }

    // ── Observers ───────────────────────────────────────────────────────────

    pub fn state(&self) -> AppState {
        self.state
    }

    pub fn is_busy(&self) -> bool {
        self.state == AppState::Busy
    }

    pub fn is_model_ready(&self) -> bool {
        self.model.is_some()
    }

    pub fn is_initializing(&self) -> bool {
        self.model_initializing
    }

    pub fn image(&self) -> Option<&RgbImage> {
        self.image.as_ref()
    }

    pub fn result(&self) -> Option<&RgbImage> {
        self.result.as_ref()
    }

    pub fn selector(&self) -> Option<&BoxSelector> {
        self.selector.as_ref()
    }

    pub fn selector_mut(&mut self) -> Option<&mut BoxSelector> {
        self.selector.as_mut()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn front_notice(&self) -> Option<&Notice> {
        self.notices.front()
    }

    pub fn dismiss_notice(&mut self) {
        self.notices.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{InpaintModel, ModelOutput};
    use egui::pos2;
    use image::{DynamicImage, GrayImage, Rgb};
    use std::sync::{Arc, Barrier};
    use std::time::Duration;

    /// Returns the mask itself as a gray image: masked pixels become white.
    struct MaskEcho;

    impl InpaintModel for MaskEcho {
        fn infer(&self, _: &RgbImage, mask: &GrayImage) -> Result<ModelOutput, InpaintError> {
            Ok(ModelOutput::Decoded(DynamicImage::ImageLuma8(mask.clone())))
        }

        fn name(&self) -> &str {
            "mask-echo"
        }
    }

    struct Broken;

    impl InpaintModel for Broken {
        fn infer(&self, _: &RgbImage, _: &GrayImage) -> Result<ModelOutput, InpaintError> {
            Err(InpaintError::new("CUDA out of memory"))
        }

        fn name(&self) -> &str {
            "broken"
        }
    }

    struct Panics;

    impl InpaintModel for Panics {
        fn infer(&self, _: &RgbImage, _: &GrayImage) -> Result<ModelOutput, InpaintError> {
            panic!("tensor index out of bounds");
        }

        fn name(&self) -> &str {
            "panics"
        }
    }

    /// Blocks inside `infer` until the test releases it.
    struct Gated(Arc<Barrier>);

    impl InpaintModel for Gated {
        fn infer(&self, image: &RgbImage, _: &GrayImage) -> Result<ModelOutput, InpaintError> {
            self.0.wait();
            Ok(ModelOutput::Decoded(DynamicImage::ImageRgb8(image.clone())))
        }

        fn name(&self) -> &str {
            "gated"
        }
    }

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "bbox-eraser-ctl-{}-{name}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_image(dir: &Path, w: u32, h: u32) -> PathBuf {
        let path = dir.join("input.png");
        RgbImage::from_pixel(w, h, Rgb([40, 80, 120]))
            .save(&path)
            .unwrap();
        path
    }

    fn controller() -> Controller {
        Controller::new((800.0, 600.0), Arc::new(|| {}))
    }

    fn with_model(model: impl InpaintModel + 'static) -> Controller {
        let mut ctl = controller();
        ctl.on_model_ready(Arc::new(model));
        ctl
    }

    fn drag(ctl: &mut Controller, from: (f32, f32), to: (f32, f32)) {
        let sel = ctl.selector_mut().unwrap();
        sel.begin(pos2(from.0, from.1));
        sel.update(pos2(to.0, to.1));
        sel.commit(pos2(to.0, to.1));
    }

    /// Block until the in-flight job reports back.
    fn wait_for_worker(ctl: &mut Controller) {
        let msg = ctl
            .rx
            .recv_timeout(Duration::from_secs(10))
            .expect("worker never reported");
        ctl.dispatch(msg);
    }

    #[test]
    fn display_scale_fits_and_never_enlarges() {
        assert_eq!(display_scale(200, 150, (800.0, 600.0)), 1.0);
        assert_eq!(display_scale(1600, 600, (800.0, 600.0)), 0.5);
        assert_eq!(display_scale(800, 1200, (800.0, 600.0)), 0.5);
        assert!(display_scale(10_000, 3, (800.0, 600.0)) <= 1.0);
        assert_eq!(display_size(1601, 601, 0.5), (800, 300));
    }

    #[test]
    fn load_moves_to_ready_with_a_fresh_selector() {
        let dir = scratch("load");
        let path = write_image(&dir, 1600, 1200);
        let mut ctl = controller();
        assert_eq!(ctl.state(), AppState::Idle);

        assert!(ctl.load(&path));
        assert_eq!(ctl.state(), AppState::Ready);
        let sel = ctl.selector().unwrap();
        assert_eq!(sel.image_size(), (1600, 1200));
        assert_eq!(sel.scale(), 0.5);
        assert!(sel.is_empty());
        assert_eq!(ctl.status(), "Image loaded: input.png");

        drag(&mut ctl, (0.0, 0.0), (100.0, 100.0));
        assert_eq!(ctl.selector().unwrap().len(), 1);
        let gen = ctl.generation();
        assert!(ctl.load(&path));
        assert!(ctl.selector().unwrap().is_empty());
        assert!(ctl.generation() > gen);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn failed_load_keeps_previous_state() {
        let dir = scratch("badload");
        let good = write_image(&dir, 64, 64);
        let bad = dir.join("bad.png");
        std::fs::write(&bad, b"garbage").unwrap();

        let mut ctl = controller();
        assert!(!ctl.load(&bad));
        assert_eq!(ctl.state(), AppState::Idle);
        assert_eq!(ctl.front_notice().unwrap().level, NoticeLevel::Error);

        assert!(ctl.load(&good));
        drag(&mut ctl, (0.0, 0.0), (40.0, 40.0));
        assert!(!ctl.load(&bad));
        assert_eq!(ctl.state(), AppState::Ready);
        assert_eq!(ctl.image().unwrap().dimensions(), (64, 64));
        assert_eq!(ctl.selector().unwrap().len(), 1);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn inpaint_preconditions_warn_without_dispatching() {
        let dir = scratch("pre");
        let path = write_image(&dir, 64, 64);
        let mut ctl = controller();

        assert!(!ctl.request_inpaint());
        assert_eq!(ctl.front_notice().unwrap().title, "No Image");
        ctl.dismiss_notice();

        ctl.load(&path);
        let before = ctl.image().cloned();
        assert!(!ctl.request_inpaint());
        assert_eq!(ctl.front_notice().unwrap().title, "No Selections");
        assert_eq!(ctl.front_notice().unwrap().level, NoticeLevel::Warning);
        assert_eq!(ctl.state(), AppState::Ready);
        assert_eq!(ctl.image().cloned(), before);
        ctl.dismiss_notice();

        drag(&mut ctl, (0.0, 0.0), (40.0, 40.0));
        assert!(!ctl.request_inpaint());
        assert_eq!(ctl.front_notice().unwrap().title, "Model Not Ready");
        assert_eq!(ctl.state(), AppState::Ready);
        assert!(ctl.rx.try_recv().is_err());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn successful_inpaint_replaces_image_and_clears_boxes() {
        let dir = scratch("ok");
        let path = write_image(&dir, 64, 48);
        let mut ctl = with_model(MaskEcho);
        ctl.load(&path);
        drag(&mut ctl, (0.0, 0.0), (32.0, 48.0));
        drag(&mut ctl, (40.0, 10.0), (60.0, 30.0));
        let gen = ctl.generation();

        assert!(ctl.request_inpaint());
        assert_eq!(ctl.state(), AppState::Busy);
        wait_for_worker(&mut ctl);

        assert_eq!(ctl.state(), AppState::Ready);
        let img = ctl.image().unwrap();
        assert_eq!(img.get_pixel(5, 5).0, [255, 255, 255]);
        assert_eq!(img.get_pixel(50, 20).0, [255, 255, 255]);
        // outside every box the source survives
        assert_eq!(img.get_pixel(50, 40).0, [40, 80, 120]);
        assert_eq!(ctl.result(), ctl.image());
        assert!(ctl.selector().unwrap().is_empty());
        assert!(ctl.generation() > gen);
        assert_eq!(ctl.status(), "Inpainting completed! Processed 2 regions");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn failed_inpaint_leaves_image_and_returns_to_ready() {
        let dir = scratch("fail");
        let path = write_image(&dir, 64, 48);
        let mut ctl = with_model(Broken);
        ctl.load(&path);
        drag(&mut ctl, (0.0, 0.0), (32.0, 32.0));
        let before = ctl.image().cloned();

        assert!(ctl.request_inpaint());
        wait_for_worker(&mut ctl);

        assert_eq!(ctl.state(), AppState::Ready);
        assert_eq!(ctl.image().cloned(), before);
        assert!(ctl.result().is_none());
        let notice = ctl.front_notice().unwrap();
        assert_eq!(notice.title, "Inpainting Error");
        assert!(notice.message.contains("CUDA out of memory"));
        assert_eq!(ctl.status(), "Inpainting failed");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn panicking_model_does_not_leave_the_app_busy() {
        let dir = scratch("panic");
        let path = write_image(&dir, 64, 48);
        let mut ctl = with_model(Panics);
        ctl.load(&path);
        drag(&mut ctl, (0.0, 0.0), (32.0, 32.0));

        assert!(ctl.request_inpaint());
        wait_for_worker(&mut ctl);

        assert_eq!(ctl.state(), AppState::Ready);
        assert!(ctl.result().is_none());
        let notice = ctl.front_notice().unwrap();
        assert_eq!(notice.title, "Inpainting Error");
        assert!(notice.message.contains("tensor index out of bounds"));
        // the app accepts new work afterwards
        assert!(ctl.load(&path));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn second_request_while_busy_is_rejected() {
        let dir = scratch("busy");
        let path = write_image(&dir, 32, 32);
        let gate = Arc::new(Barrier::new(2));
        let mut ctl = with_model(Gated(gate.clone()));
        ctl.load(&path);
        drag(&mut ctl, (0.0, 0.0), (20.0, 20.0));

        assert!(ctl.request_inpaint());
        assert!(!ctl.request_inpaint());
        assert!(!ctl.load(&path));
        assert_eq!(ctl.state(), AppState::Busy);

        gate.wait();
        wait_for_worker(&mut ctl);
        assert_eq!(ctl.state(), AppState::Ready);
        // only one job ever ran
        assert!(ctl.rx.recv_timeout(Duration::from_millis(200)).is_err());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn save_requires_a_result_and_round_trips() {
        let dir = scratch("save");
        let path = write_image(&dir, 40, 30);
        let mut ctl = with_model(MaskEcho);
        ctl.load(&path);

        assert!(ctl.save(&dir.join("out.png")).is_none());
        assert_eq!(ctl.front_notice().unwrap().title, "No Result");
        ctl.dismiss_notice();

        drag(&mut ctl, (5.0, 5.0), (25.0, 25.0));
        ctl.request_inpaint();
        wait_for_worker(&mut ctl);

        let written = ctl.save(&dir.join("out")).unwrap();
        assert_eq!(written, dir.join("out.png"));
        let reloaded = imageio::load_rgb(&written).unwrap();
        assert_eq!(Some(&reloaded), ctl.result());
        assert_eq!(ctl.status(), "Image saved: out.png");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn model_init_failure_keeps_inpaint_gated() {
        let mut ctl = controller();
        ctl.start_model_init(|| Err(anyhow::anyhow!("no network")));
        assert!(ctl.is_initializing());
        wait_for_worker(&mut ctl);

        assert!(!ctl.is_initializing());
        assert!(!ctl.is_model_ready());
        assert_eq!(ctl.status(), "Model initialization failed");
        assert_eq!(ctl.front_notice().unwrap().title, "Model Error");
    }

    #[test]
    fn model_init_success_is_delivered_through_poll() {
        let mut ctl = controller();
        ctl.start_model_init(|| Ok(Arc::new(MaskEcho) as SharedModel));
        let msg = ctl.rx.recv_timeout(Duration::from_secs(10)).unwrap();
        ctl.tx.send(msg).unwrap();
        assert!(ctl.poll());
        assert!(ctl.is_model_ready());
        assert!(!ctl.poll());
    }

    #[test]
    fn clear_selections_is_idempotent() {
        let dir = scratch("clear");
        let path = write_image(&dir, 64, 64);
        let mut ctl = controller();
        ctl.clear_selections();
        ctl.load(&path);
        drag(&mut ctl, (0.0, 0.0), (40.0, 40.0));
        ctl.clear_selections();
        ctl.clear_selections();
        assert!(ctl.selector().unwrap().is_empty());
        assert!(ctl.selector().unwrap().markers().is_empty());
        assert_eq!(ctl.status(), "Selections cleared");
        let _ = std::fs::remove_dir_all(&dir);
    }
}
