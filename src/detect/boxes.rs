//! Bounding box geometry for the detection cascade.

use image::{imageops, imageops::FilterType, RgbImage};

/// Axis-aligned face box in pixel coordinates of the source image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    /// Expand the shorter side so the box becomes square around its center.
    pub fn to_square(&self) -> BoundingBox {
        let side = self.width().max(self.height());
        let cx = (self.x1 + self.x2) * 0.5;
        let cy = (self.y1 + self.y2) * 0.5;
        BoundingBox {
            x1: cx - side * 0.5,
            y1: cy - side * 0.5,
            x2: cx + side * 0.5,
            y2: cy + side * 0.5,
        }
    }

    /// Shift the box edges by regression offsets scaled by the box size.
    pub fn regress(&self, reg: [f32; 4]) -> BoundingBox {
        let w = self.width();
        let h = self.height();
        BoundingBox {
            x1: self.x1 + reg[0] * w,
            y1: self.y1 + reg[1] * h,
            x2: self.x2 + reg[2] * w,
            y2: self.y2 + reg[3] * h,
        }
    }

    /// Grow the box by a context margin, expressed in crop pixels.
    ///
    /// The margin is scaled from crop units into source-image units so the
    /// amount of context is independent of face size.
    pub fn with_margin(&self, margin: u32, crop_size: u32) -> BoundingBox {
        if margin == 0 {
            return *self;
        }
        let denom = (crop_size.saturating_sub(margin)).max(1) as f32;
        let mx = margin as f32 * self.width() / denom;
        let my = margin as f32 * self.height() / denom;
        BoundingBox {
            x1: self.x1 - mx * 0.5,
            y1: self.y1 - my * 0.5,
            x2: self.x2 + mx * 0.5,
            y2: self.y2 + my * 0.5,
        }
    }
}

/// Intersection over union of two boxes.
pub fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let inter = intersection(a, b);
    let union = a.area() + b.area() - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

/// Intersection over the smaller of the two box areas.
pub fn overlap_min(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let inter = intersection(a, b);
    let min_area = a.area().min(b.area());
    if min_area > 0.0 {
        inter / min_area
    } else {
        0.0
    }
}

fn intersection(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x1.max(b.x1);
    let y1 = a.y1.max(b.y1);
    let x2 = a.x2.min(b.x2);
    let y2 = a.y2.min(b.y2);
    (x2 - x1).max(0.0) * (y2 - y1).max(0.0)
}

/// Overlap metric used when suppressing boxes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NmsMode {
    /// Intersection over union.
    Union,
    /// Intersection over the smaller box, as the cascade's final stage uses.
    Min,
}

/// Non-maximum suppression, returning indices of the kept boxes.
///
/// Indices come back ordered by descending score so callers can keep their
/// side tables aligned.
pub fn nms_indices(
    boxes: &[BoundingBox],
    scores: &[f32],
    threshold: f32,
    mode: NmsMode,
) -> Vec<usize> {
    let mut order: Vec<usize> = (0..boxes.len()).collect();
    order.sort_by(|&a, &b| {
        scores[b]
            .partial_cmp(&scores[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep = Vec::new();
    let mut suppressed = vec![false; boxes.len()];

    for (rank, &i) in order.iter().enumerate() {
        if suppressed[i] {
            continue;
        }

        keep.push(i);

        for &j in &order[rank + 1..] {
            if suppressed[j] {
                continue;
            }

            let overlap = match mode {
                NmsMode::Union => iou(&boxes[i], &boxes[j]),
                NmsMode::Min => overlap_min(&boxes[i], &boxes[j]),
            };
            if overlap > threshold {
                suppressed[j] = true;
            }
        }
    }

    keep
}

/// Crop a box out of the image, clamped to its bounds, resized to a square.
pub fn crop_resized(img: &RgbImage, bbox: &BoundingBox, size: u32) -> RgbImage {
    let (img_w, img_h) = img.dimensions();

    let x1 = (bbox.x1.round().max(0.0) as u32).min(img_w - 1);
    let y1 = (bbox.y1.round().max(0.0) as u32).min(img_h - 1);
    let x2 = (bbox.x2.round().max(0.0) as u32).min(img_w);
    let y2 = (bbox.y2.round().max(0.0) as u32).min(img_h);
    let w = x2.saturating_sub(x1).max(1);
    let h = y2.saturating_sub(y1).max(1);

    let crop = imageops::crop_imm(img, x1, y1, w, h).to_image();
    imageops::resize(&crop, size, size, FilterType::Triangle)
}
