//! LaMa inpainting through ONNX Runtime. The runtime library is loaded at
//! run time, so a machine without it fails at startup with a clear message
//! instead of at link time.

use anyhow::{anyhow, Context};
use hf_hub::api::sync::Api;
use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, RgbImage};
use ndarray::{Array, Array4, Ix4};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use std::path::PathBuf;
use std::sync::Mutex;
use std::thread;

use crate::error::{AppError, InpaintError};
use crate::model::{normalize, InpaintModel, ModelOutput, RawArray, SampleRange, Samples};
use crate::settings::Settings;

/// The exported graph has a fixed input size.
const LAMA_SIZE: u32 = 512;

#[cfg(target_os = "windows")]
const RUNTIME_LIB: &str = "onnxruntime.dll";
#[cfg(target_os = "macos")]
const RUNTIME_LIB: &str = "libonnxruntime.dylib";
#[cfg(not(any(target_os = "windows", target_os = "macos")))]
const RUNTIME_LIB: &str = "libonnxruntime.so";

fn runtime_candidates(settings: &Settings) -> Vec<PathBuf> {
    let mut out = Vec::new();
    if let Some(p) = &settings.onnxruntime_path {
        out.push(p.clone());
        // an explicit path is authoritative
        return out;
    }
    if let Some(p) = std::env::var_os("ORT_DYLIB_PATH") {
        out.push(PathBuf::from(p));
    }
    if let Some(dir) = std::env::current_exe().ok().and_then(|e| e.parent().map(PathBuf::from)) {
        out.push(dir.join(RUNTIME_LIB));
    }
    // bare name: resolved through the system loader search path
    out.push(PathBuf::from(RUNTIME_LIB));
    out
}

/// Find an ONNX Runtime library that actually loads.
pub fn probe_runtime(settings: &Settings) -> Result<PathBuf, AppError> {
    let mut tried = Vec::new();
    for candidate in runtime_candidates(settings) {
        // SAFETY: loading ONNX Runtime only runs its (side-effect free)
        // initializers; the handle is dropped immediately.
        match unsafe { libloading::Library::new(&candidate) } {
            Ok(_lib) => {
                log::info!("using ONNX Runtime at {}", candidate.display());
                return Ok(candidate);
            }
            Err(e) => {
                log::debug!("ONNX Runtime not loadable from {}: {e}", candidate.display());
                tried.push(format!("{} ({e})", candidate.display()));
            }
        }
    }
    Err(AppError::DependencyMissing(format!(
        "ONNX Runtime shared library could not be loaded.\n\nTried:\n  {}\n\n\
         Install ONNX Runtime 1.20+ and pass --onnxruntime <PATH> or set ORT_DYLIB_PATH.",
        tried.join("\n  ")
    )))
}

pub struct LamaModel {
    session: Mutex<Session>,
    label: String,
}

impl LamaModel {
    /// Bind the runtime, fetch the model if needed (first run downloads
    /// ~200MB) and build a CPU session.
    pub fn init(settings: &Settings, runtime: PathBuf) -> anyhow::Result<Self> {
        ort::init_from(runtime.to_string_lossy())
            .with_name("bbox-eraser")
            .commit()
            .context("failed to initialize ONNX Runtime")?;

        let model_path = match &settings.model_path {
            Some(p) if p.exists() => p.clone(),
            Some(p) => return Err(anyhow!("model file not found: {}", p.display())),
            None => {
                log::info!(
                    "fetching {}/{} (downloading if first run)",
                    settings.model_repo,
                    settings.model_file
                );
                let api = Api::new()?;
                let repo = api.model(settings.model_repo.clone());
                repo.get(&settings.model_file)
                    .with_context(|| format!("failed to download {}", settings.model_file))?
            }
        };

        let threads = match settings.intra_threads {
            0 => thread::available_parallelism()?.get(),
            n => n,
        };
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(threads)?
            .commit_from_file(&model_path)
            .with_context(|| format!("failed to load {}", model_path.display()))?;

        log::info!("LaMa loaded from {} ({threads} threads, CPU)", model_path.display());
        Ok(Self {
            session: Mutex::new(session),
            label: format!("LaMa ({})", settings.model_file),
        })
    }

    fn run(&self, image: &RgbImage, mask: &GrayImage) -> anyhow::Result<Vec<f32>> {
        let image = imageops::resize(image, LAMA_SIZE, LAMA_SIZE, FilterType::CatmullRom);
        let side = LAMA_SIZE as usize;

        let mut image_data = Array::zeros((1, 3, side, side));
        for (x, y, px) in image.enumerate_pixels() {
            for c in 0..3 {
                image_data[[0, c, y as usize, x as usize]] = px.0[c] as f32 / 255.0;
            }
        }
        let mask_data = mask_tensor(mask, LAMA_SIZE);

        let session = self
            .session
            .lock()
            .map_err(|_| anyhow!("model session poisoned by an earlier panic"))?;
        let inputs = ort::inputs![
            "image" => image_data.view(),
            "mask" => mask_data.view(),
        ]?;
        let outputs = session.run(inputs)?;
        let output = outputs["output"].try_extract_tensor::<f32>()?;
        let output = output
            .view()
            .into_dimensionality::<Ix4>()
            .map_err(|_| anyhow!("Unexpected result shape: {:?}", output.shape()))?;

        let shape = output.shape().to_vec();
        if shape[1] != 3 || shape[2] != side || shape[3] != side {
            return Err(anyhow!("Unexpected result shape: {shape:?}"));
        }

        // NCHW -> HWC
        let mut hwc = Vec::with_capacity(3 * side * side);
        for y in 0..side {
            for x in 0..side {
                for c in 0..3 {
                    hwc.push(output[[0, c, y, x]]);
                }
            }
        }
        Ok(hwc)
    }
}

/// Resample the mask to `side`² and binarize it as a 1×1×side×side tensor.
/// Nearest keeps the rectangles' footprint; a smoothing filter would ring
/// past the box edges.
fn mask_tensor(mask: &GrayImage, side: u32) -> Array4<f32> {
    let mask = imageops::resize(mask, side, side, FilterType::Nearest);
    let n = side as usize;
    let mut data = Array4::zeros((1, 1, n, n));
    for (x, y, px) in mask.enumerate_pixels() {
        data[[0, 0, y as usize, x as usize]] = if px.0[0] > 0 { 1.0 } else { 0.0 };
    }
    data
}

/// Turn the model's HWC float output into an RGB image of the requested
/// size. The value range is settled on the raw samples, before resampling
/// (float resizing clamps to [0, 1]).
fn postprocess(hwc: Vec<f32>, side: u32, width: u32, height: u32) -> Result<RgbImage, InpaintError> {
    // the exports disagree on [0,1] vs [0,255] output
    let small = normalize(ModelOutput::Raw(RawArray {
        width: side,
        height: side,
        channels: 3,
        samples: Samples::F32 {
            data: hwc,
            range: SampleRange::Unknown,
        },
    }))?;
    if small.dimensions() == (width, height) {
        return Ok(small);
    }
    Ok(imageops::resize(&small, width, height, FilterType::CatmullRom))
}

impl InpaintModel for LamaModel {
    fn infer(&self, image: &RgbImage, mask: &GrayImage) -> Result<ModelOutput, InpaintError> {
        let hwc = self
            .run(image, mask)
            .map_err(|e| InpaintError::new(format!("{e:#}")))?;
        let (width, height) = image.dimensions();
        let full = postprocess(hwc, LAMA_SIZE, width, height)?;
        Ok(ModelOutput::Decoded(DynamicImage::ImageRgb8(full)))
    }

    fn name(&self) -> &str {
        &self.label
    }
}
