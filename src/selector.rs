use serde::{Deserialize, Serialize};

/// Boxes whose mapped width or height is not above this many image pixels
/// are dropped on release.
pub const MIN_BOX_SIZE: u32 = 10;

/// Axis-aligned region in original-image pixel space. `x2`/`y2` are exclusive
/// when rasterized.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl BoundingBox {
    pub fn width(&self) -> u32 {
        self.x2.saturating_sub(self.x1)
    }

    pub fn height(&self) -> u32 {
        self.y2.saturating_sub(self.y1)
    }
}

/// Converts drag gestures over the displayed (scaled) image into validated
/// image-space boxes. Display positions are relative to the image's top-left
/// corner on screen, so scroll offset is already removed by the caller.
///
/// One selector lives for exactly one image display; redisplaying an image
/// builds a new one.
#[derive(Clone, Debug)]
pub struct BoxSelector {
    image_width: u32,
    image_height: u32,
    scale: f32,

    start: Option<egui::Pos2>,
    preview: Option<egui::Rect>,

    boxes: Vec<BoundingBox>,
    markers: Vec<egui::Rect>,
}

impl BoxSelector {
    pub fn new(image_width: u32, image_height: u32, scale: f32) -> Self {
        Self {
            image_width,
            image_height,
            scale,
            start: None,
            preview: None,
            boxes: Vec::new(),
            markers: Vec::new(),
        }
    }

    pub fn begin(&mut self, pos: egui::Pos2) {
        self.start = Some(pos);
    }

    pub fn update(&mut self, pos: egui::Pos2) {
        if let Some(start) = self.start {
            self.preview = Some(egui::Rect::from_two_pos(start, pos));
        }
    }

    /// Finish the current drag. Returns the committed box, or `None` when the
    /// drag was too small (or no drag was active).
    pub fn commit(&mut self, pos: egui::Pos2) -> Option<BoundingBox> {
        let start = self.start.take()?;
        let preview = self.preview.take();

        let bbox = BoundingBox {
            x1: self.to_image(start.x.min(pos.x), self.image_width),
            y1: self.to_image(start.y.min(pos.y), self.image_height),
            x2: self.to_image(start.x.max(pos.x), self.image_width),
            y2: self.to_image(start.y.max(pos.y), self.image_height),
        };

        if bbox.width() > MIN_BOX_SIZE && bbox.height() > MIN_BOX_SIZE {
            self.boxes.push(bbox);
            self.markers
                .push(preview.unwrap_or_else(|| egui::Rect::from_two_pos(start, pos)));
            Some(bbox)
        } else {
            None
        }
    }

    pub fn clear(&mut self) {
        self.boxes.clear();
        self.markers.clear();
    }

    /// Display coordinate → image coordinate, truncated toward zero and
    /// clamped into `[0, limit]`.
    fn to_image(&self, display: f32, limit: u32) -> u32 {
        let v = (display / self.scale) as i64;
        v.clamp(0, limit as i64) as u32
    }

    pub fn boxes(&self) -> &[BoundingBox] {
        &self.boxes
    }

    pub fn markers(&self) -> &[egui::Rect] {
        &self.markers
    }

    pub fn preview(&self) -> Option<egui::Rect> {
        self.preview
    }

    pub fn is_dragging(&self) -> bool {
        self.start.is_some()
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn image_size(&self) -> (u32, u32) {
        (self.image_width, self.image_height)
    }

    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }
}
