use image::RgbImage;
use std::path::{Path, PathBuf};

use crate::error::{AppError, Result};

pub const OPEN_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tiff", "tif", "gif", "webp"];

/// Decode any supported raster file and flatten it to 8-bit RGB.
pub fn load_rgb(path: &Path) -> Result<RgbImage> {
    let img = image::open(path).map_err(|source| AppError::Load {
        path: path.to_path_buf(),
        source,
    })?;
    log::debug!(
        "decoded {} as {:?} {}x{}",
        path.display(),
        img.color(),
        img.width(),
        img.height()
    );
    Ok(img.to_rgb8())
}

/// Encode by extension. A bare file name gets `.png`. Returns the path that
/// was actually written.
pub fn save_rgb(img: &RgbImage, path: &Path) -> Result<PathBuf> {
    let path = with_default_extension(path);
    img.save(&path).map_err(|source| AppError::Save {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

fn with_default_extension(path: &Path) -> PathBuf {
    if path.extension().is_some() {
        path.to_path_buf()
    } else {
        path.with_extension("png")
    }
}

pub fn open_dialog(start_dir: Option<&Path>) -> Option<PathBuf> {
    let mut dialog = rfd::FileDialog::new()
        .set_title("Select Image")
        .add_filter("Image files", OPEN_EXTENSIONS);
    if let Some(dir) = start_dir {
        dialog = dialog.set_directory(dir);
    }
    dialog.pick_file()
}

pub fn save_dialog(start_dir: Option<&Path>) -> Option<PathBuf> {
    let mut dialog = rfd::FileDialog::new()
        .set_title("Save Inpainted Image")
        .set_file_name("inpainted.png")
        .add_filter("PNG files", &["png"])
        .add_filter("JPEG files", &["jpg", "jpeg"])
        .add_filter("All files", &["*"]);
    if let Some(dir) = start_dir {
        dialog = dialog.set_directory(dir);
    }
    dialog.save_file()
}
