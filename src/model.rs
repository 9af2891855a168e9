//! The inpainting model seen from the application: an opaque capability that
//! takes an 8-bit RGB image plus a binary mask and hands back *something*
//! resembling a picture. Everything it may return is funnelled through
//! [`normalize`] into one RGB8 bitmap.

use image::{DynamicImage, GrayImage, RgbImage};

use crate::error::InpaintError;

pub trait InpaintModel: Send + Sync {
    /// Fill every pixel where `mask` is 255, preserve pixels where it is 0.
    fn infer(&self, image: &RgbImage, mask: &GrayImage) -> Result<ModelOutput, InpaintError>;

    fn name(&self) -> &str;
}

/// Numeric range of float samples, when the backend knows it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleRange {
    /// 0.0 ..= 1.0
    Unit,
    /// 0.0 ..= 255.0
    Byte,
    /// Guess from the data: max <= 1.0 is taken as unit range.
    Unknown,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Samples {
    U8(Vec<u8>),
    F32 { data: Vec<f32>, range: SampleRange },
}

impl Samples {
    fn len(&self) -> usize {
        match self {
            Samples::U8(v) => v.len(),
            Samples::F32 { data, .. } => data.len(),
        }
    }
}

/// Interleaved HWC pixel array.
#[derive(Clone, Debug, PartialEq)]
pub struct RawArray {
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    pub samples: Samples,
}

#[derive(Clone, Debug)]
pub enum ModelOutput {
    Raw(RawArray),
    Decoded(DynamicImage),
}

/// Turn whatever the model produced into an 8-bit RGB bitmap.
pub fn normalize(output: ModelOutput) -> Result<RgbImage, InpaintError> {
    match output {
        ModelOutput::Decoded(img) => {
            log::debug!(
                "model returned decoded image {}x{} ({:?})",
                img.width(),
                img.height(),
                img.color()
            );
            Ok(img.to_rgb8())
        }
        ModelOutput::Raw(raw) => normalize_raw(raw),
    }
}

fn normalize_raw(raw: RawArray) -> Result<RgbImage, InpaintError> {
    let RawArray {
        width,
        height,
        channels,
        samples,
    } = raw;

    if width == 0 || height == 0 {
        return Err(InpaintError::new(format!(
            "Unexpected result shape: ({height}, {width}, {channels})"
        )));
    }
    if !matches!(channels, 1 | 3 | 4) {
        return Err(InpaintError::new(format!(
            "Unexpected result shape: ({height}, {width}, {channels})"
        )));
    }
    let expected = width as usize * height as usize * channels as usize;
    if samples.len() != expected {
        return Err(InpaintError::new(format!(
            "Result has {} samples, expected {expected} for ({height}, {width}, {channels})",
            samples.len()
        )));
    }

    let bytes = match samples {
        Samples::U8(v) => v,
        Samples::F32 { data, range } => {
            let max = data.iter().copied().fold(f32::MIN, f32::max);
            let factor = match range {
                SampleRange::Unit => 255.0,
                SampleRange::Byte => 1.0,
                SampleRange::Unknown if max <= 1.0 => 255.0,
                SampleRange::Unknown => 1.0,
            };
            log::debug!("float result: max {max}, range {range:?}, scale x{factor}");
            data.into_iter()
                .map(|v| (v * factor).clamp(0.0, 255.0) as u8)
                .collect()
        }
    };

    let rgb: Vec<u8> = match channels {
        1 => bytes.iter().flat_map(|&g| [g, g, g]).collect(),
        3 => bytes,
        _ => bytes
            .chunks_exact(4)
            .flat_map(|px| [px[0], px[1], px[2]])
            .collect(),
    };

    RgbImage::from_raw(width, height, rgb)
        .ok_or_else(|| InpaintError::new("result buffer does not match its dimensions"))
}
