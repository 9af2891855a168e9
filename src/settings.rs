use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{AppError, Result};

pub const DEFAULT_MODEL_REPO: &str = "Carve/LaMa-ONNX";
pub const DEFAULT_MODEL_FILE: &str = "lama_fp32.onnx";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Largest on-screen size of the image; bigger images are scaled down.
    pub max_display_width: f32,
    pub max_display_height: f32,

    /// Local ONNX file. When unset the model is fetched from `model_repo`.
    pub model_path: Option<PathBuf>,
    pub model_repo: String,
    pub model_file: String,

    /// ONNX Runtime shared library. When unset, `ORT_DYLIB_PATH` and then the
    /// platform's default library name are tried.
    pub onnxruntime_path: Option<PathBuf>,
    /// 0 = one per available core.
    pub intra_threads: usize,

    pub last_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_display_width: 800.0,
            max_display_height: 600.0,
            model_path: None,
            model_repo: DEFAULT_MODEL_REPO.to_string(),
            model_file: DEFAULT_MODEL_FILE.to_string(),
            onnxruntime_path: None,
            intra_threads: 0,
            last_dir: None,
        }
    }
}

impl Settings {
    pub fn default_path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push("bbox-eraser");
        path.push("settings.json");
        path
    }

    /// Read settings from `path`. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path).map_err(|e| AppError::Settings {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_json(&data).map_err(|reason| AppError::Settings {
            path: path.to_path_buf(),
            reason,
        })
    }

    /// Like [`Settings::load`], but falls back to defaults (with a warning)
    /// when the file is unreadable.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("{e}; using default settings");
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let fail = |reason: String| AppError::Settings {
            path: path.to_path_buf(),
            reason,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| fail(e.to_string()))?;
        }
        let data = serde_json::to_string_pretty(self).map_err(|e| fail(e.to_string()))?;
        std::fs::write(path, data).map_err(|e| fail(e.to_string()))
    }

    fn from_json(data: &str) -> std::result::Result<Self, String> {
        let settings: Self = serde_json::from_str(data).map_err(|e| e.to_string())?;
        if !(valid_bound(settings.max_display_width) && valid_bound(settings.max_display_height)) {
            return Err("display bounds must be positive and finite".to_string());
        }
        Ok(settings)
    }

    pub fn max_display(&self) -> (f32, f32) {
        (self.max_display_width, self.max_display_height)
    }
}

/// Parse `WIDTHxHEIGHT`, e.g. `1024x768`.
pub fn parse_display_bound(s: &str) -> std::result::Result<(f32, f32), String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{s}'"))?;
    let w: f32 = w.trim().parse().map_err(|_| format!("bad width '{w}'"))?;
    let h: f32 = h.trim().parse().map_err(|_| format!("bad height '{h}'"))?;
    if !(valid_bound(w) && valid_bound(h)) {
        return Err("display bounds must be positive and finite".to_string());
    }
    Ok((w, h))
}

fn valid_bound(v: f32) -> bool {
    v.is_finite() && v > 0.0
}
