use image::{GrayImage, Luma, RgbImage};

use crate::selector::BoundingBox;

pub const MASK_KEEP: u8 = 0;
pub const MASK_FILL: u8 = 255;

/// Rasterize boxes into a binary mask: 255 inside any box, 0 elsewhere.
pub fn rasterize(width: u32, height: u32, boxes: &[BoundingBox]) -> GrayImage {
    let mut mask = GrayImage::from_pixel(width, height, Luma([MASK_KEEP]));
    for b in boxes {
        let (x2, y2) = (b.x2.min(width), b.y2.min(height));
        for y in b.y1.min(y2)..y2 {
            for x in b.x1.min(x2)..x2 {
                mask.put_pixel(x, y, Luma([MASK_FILL]));
            }
        }
    }
    mask
}

/// Number of pixels marked for reconstruction.
pub fn coverage(mask: &GrayImage) -> usize {
    mask.pixels().filter(|p| p.0[0] == MASK_FILL).count()
}

/// Copy `original` back into `filled` wherever the mask says keep.
pub fn composite(original: &RgbImage, filled: &mut RgbImage, mask: &GrayImage) {
    for ((src, dst), m) in original.pixels().zip(filled.pixels_mut()).zip(mask.pixels()) {
        if m.0[0] != MASK_FILL {
            *dst = *src;
        }
    }
}
