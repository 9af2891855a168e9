use clap::Parser;
use eframe::egui;
use std::path::PathBuf;

mod app;
mod controller;
mod error;
mod imageio;
#[cfg(feature = "lama")]
mod lama;
mod mask;
mod model;
mod selector;
mod settings;
mod worker;

use app::{EraserApp, ModelInit};
use error::AppError;
use settings::Settings;

// ── CLI ─────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "bbox-eraser",
    version,
    about = "Erase rectangular regions of an image with a LaMa inpainting model"
)]
struct Cli {
    /// Image to open on startup
    image: Option<PathBuf>,

    /// Local LaMa ONNX file (skips the download)
    #[arg(long)]
    model: Option<PathBuf>,

    /// ONNX Runtime shared library
    #[arg(long)]
    onnxruntime: Option<PathBuf>,

    /// Settings file [default: <config dir>/bbox-eraser/settings.json]
    #[arg(long)]
    config: Option<PathBuf>,

    /// Largest on-screen image size, e.g. 1024x768
    #[arg(long, value_name = "WxH", value_parser = settings::parse_display_bound)]
    max_display: Option<(f32, f32)>,
}

impl Cli {
    fn apply(&self, settings: &mut Settings) {
        if let Some(p) = &self.model {
            settings.model_path = Some(p.clone());
        }
        if let Some(p) = &self.onnxruntime {
            settings.onnxruntime_path = Some(p.clone());
        }
        if let Some((w, h)) = self.max_display {
            settings.max_display_width = w;
            settings.max_display_height = h;
        }
    }
}

// ── Model backend ───────────────────────────────────────────────────────────

/// Check that the model runtime is present and return the (deferred) model
/// constructor. Runs before any window exists.
#[cfg(feature = "lama")]
fn prepare_model(settings: &Settings) -> Result<ModelInit, AppError> {
    let runtime = lama::probe_runtime(settings)?;
    let settings = settings.clone();
    Ok(Box::new(move || {
        let model = lama::LamaModel::init(&settings, runtime)?;
        Ok(std::sync::Arc::new(model) as worker::SharedModel)
    }))
}

#[cfg(not(feature = "lama"))]
fn prepare_model(_settings: &Settings) -> Result<ModelInit, AppError> {
    Err(AppError::DependencyMissing(
        "this build has no inpainting backend; rebuild with `--features lama`".to_string(),
    ))
}

fn report_fatal(err: &AppError) {
    log::error!("{err}");
    rfd::MessageDialog::new()
        .set_level(rfd::MessageLevel::Error)
        .set_title("Missing Dependency")
        .set_description(err.to_string())
        .set_buttons(rfd::MessageButtons::Ok)
        .show();
}

// ── Main ────────────────────────────────────────────────────────────────────

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings_path = cli.config.clone().unwrap_or_else(Settings::default_path);
    let mut settings = Settings::load_or_default(&settings_path);
    cli.apply(&mut settings);
    log::debug!("settings from {}: {settings:?}", settings_path.display());

    let init = match prepare_model(&settings) {
        Ok(init) => init,
        Err(e) => {
            report_fatal(&e);
            return Err(e.into());
        }
    };

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1200.0, 800.0])
            .with_title("LaMa Bounding Box Inpainting"),
        ..Default::default()
    };

    let initial_image = cli.image.clone();
    eframe::run_native(
        "bbox-eraser",
        options,
        Box::new(move |cc| {
            Ok(Box::new(EraserApp::new(
                cc,
                settings,
                settings_path,
                initial_image,
                init,
            )))
        }),
    )
    .map_err(|e| anyhow::anyhow!("failed to run eframe: {e}"))
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("bbox-eraser {} starting", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run() {
        eprintln!("bbox-eraser: {e:#}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_settings() {
        let cli = Cli::parse_from([
            "bbox-eraser",
            "photo.jpg",
            "--model",
            "/models/lama.onnx",
            "--max-display",
            "1024x768",
        ]);
        let mut settings = Settings::default();
        cli.apply(&mut settings);
        assert_eq!(cli.image, Some(PathBuf::from("photo.jpg")));
        assert_eq!(settings.model_path, Some(PathBuf::from("/models/lama.onnx")));
        assert_eq!(settings.max_display(), (1024.0, 768.0));
        assert!(settings.onnxruntime_path.is_none());
    }

    #[test]
    fn bad_display_bound_is_rejected() {
        assert!(Cli::try_parse_from(["bbox-eraser", "--max-display", "wide"]).is_err());
    }
}
