//! Background jobs. Each job runs on its own thread and reports back with
//! exactly one [`WorkerMessage`]; the UI thread drains the channel.

use image::RgbImage;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread;

use crate::error::InpaintError;
use crate::mask;
use crate::model::{normalize, InpaintModel};
use crate::selector::BoundingBox;

pub type SharedModel = Arc<dyn InpaintModel>;

/// Called after a message is sent so the UI wakes up and polls.
pub type Wake = Arc<dyn Fn() + Send + Sync>;

pub enum WorkerMessage {
    ModelReady(SharedModel),
    ModelFailed(String),
    InpaintDone { image: RgbImage, regions: usize },
    InpaintFailed(InpaintError),
}

impl std::fmt::Debug for WorkerMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerMessage::ModelReady(m) => write!(f, "ModelReady({})", m.name()),
            WorkerMessage::ModelFailed(e) => write!(f, "ModelFailed({e})"),
            WorkerMessage::InpaintDone { image, regions } => write!(
                f,
                "InpaintDone({}x{}, {regions} regions)",
                image.width(),
                image.height()
            ),
            WorkerMessage::InpaintFailed(e) => write!(f, "InpaintFailed({e})"),
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn post(tx: &Sender<WorkerMessage>, wake: &Wake, msg: WorkerMessage) {
    if tx.send(msg).is_err() {
        log::warn!("worker result dropped: receiver is gone");
    }
    wake();
}

/// Run the (slow, possibly downloading) model constructor off the UI thread.
pub fn spawn_model_init<F>(tx: Sender<WorkerMessage>, wake: Wake, init: F)
where
    F: FnOnce() -> anyhow::Result<SharedModel> + Send + 'static,
{
    thread::spawn(move || {
        let msg = match panic::catch_unwind(AssertUnwindSafe(init)) {
            Ok(Ok(model)) => {
                log::info!("model '{}' ready", model.name());
                WorkerMessage::ModelReady(model)
            }
            Ok(Err(e)) => {
                log::error!("model initialization failed: {e:#}");
                WorkerMessage::ModelFailed(format!("{e:#}"))
            }
            Err(payload) => {
                let reason = format!("model initialization panicked: {}", panic_message(payload));
                log::error!("{reason}");
                WorkerMessage::ModelFailed(reason)
            }
        };
        post(&tx, &wake, msg);
    });
}

/// Inpaint a snapshot of the image. `image` and `boxes` are moved in, so the
/// UI thread keeps no shared state with the job.
pub fn spawn_inpaint(
    tx: Sender<WorkerMessage>,
    wake: Wake,
    model: SharedModel,
    image: RgbImage,
    boxes: Vec<BoundingBox>,
) {
    thread::spawn(move || {
        let regions = boxes.len();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            run_inpaint(model.as_ref(), &image, &boxes)
        }))
        .unwrap_or_else(|payload| {
            Err(InpaintError::new(format!(
                "model panicked: {}",
                panic_message(payload)
            )))
        });
        let msg = match outcome {
            Ok(image) => WorkerMessage::InpaintDone { image, regions },
            Err(e) => {
                log::error!("inpainting failed: {e}");
                WorkerMessage::InpaintFailed(e)
            }
        };
        post(&tx, &wake, msg);
    });
}

/// Mask the boxes, call the model, normalize its answer and keep the
/// unmasked pixels of the source.
pub fn run_inpaint(
    model: &dyn InpaintModel,
    image: &RgbImage,
    boxes: &[BoundingBox],
) -> Result<RgbImage, InpaintError> {
    let (width, height) = image.dimensions();
    let mask = mask::rasterize(width, height, boxes);
    log::debug!(
        "image {}x{}x3, mask {}x{} with {} px to fill",
        width,
        height,
        mask.width(),
        mask.height(),
        mask::coverage(&mask)
    );

    let output = model.infer(image, &mask)?;
    let mut result = normalize(output)?;
    if result.dimensions() != (width, height) {
        return Err(InpaintError::new(format!(
            "Unexpected result size {}x{}, expected {width}x{height}",
            result.width(),
            result.height()
        )));
    }
    mask::composite(image, &mut result, &mask);
    Ok(result)
}
