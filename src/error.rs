use std::path::PathBuf;

/// Failure inside the background inpaint job: mask/image preparation, the
/// model call itself, or an output we cannot turn into an RGB bitmap.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{0}")]
pub struct InpaintError(pub String);

impl InpaintError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// The model runtime is unavailable; the application cannot start.
    #[error("required dependency missing: {0}")]
    DependencyMissing(String),

    #[error("failed to initialize inpainting model: {0}")]
    ModelInit(String),

    #[error("failed to load image {}: {source}", .path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to perform inpainting: {0}")]
    Inpaint(#[from] InpaintError),

    #[error("failed to save image {}: {source}", .path.display())]
    Save {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("invalid settings file {}: {reason}", .path.display())]
    Settings { path: PathBuf, reason: String },
}

pub type Result<T, E = AppError> = std::result::Result<T, E>;
