//! MTCNN face detection cascade.
//!
//! Three pretrained networks run in sequence over an image pyramid: P-Net
//! proposes candidate windows at every scale, R-Net rejects most of them,
//! and O-Net produces the final boxes. The network weights are external
//! ONNX artifacts; this module owns the orchestration between them and the
//! cropping of detected faces into embedder-ready tensors.

use std::sync::Mutex;

use image::{imageops, imageops::FilterType, RgbImage};
use ndarray::Array3;
use ort::session::Session;
use ort::value::Tensor;

use super::boxes::{crop_resized, nms_indices, BoundingBox, NmsMode};
use crate::config::DetectorConfig;
use crate::error::{FacepipeError, Result};

/// Sliding-window cell size of the proposal network.
const CELL_SIZE: f32 = 12.0;
/// Output stride of the proposal network.
const STRIDE: f32 = 2.0;
/// Input side length of the refinement network.
const RNET_SIZE: u32 = 24;
/// Input side length of the output network.
const ONET_SIZE: u32 = 48;

const PNET_SCALE_NMS: f32 = 0.5;
const PNET_CROSS_NMS: f32 = 0.7;
const RNET_NMS: f32 = 0.7;
const ONET_NMS: f32 = 0.7;

/// A face located by the cascade.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    /// Box in source-image pixel coordinates.
    pub bbox: BoundingBox,
    pub confidence: f32,
    /// Fixed-size crop in CHW order, `3 * image_size * image_size` values,
    /// normalized when the detector's post-processing is enabled.
    pub crop: Vec<f32>,
}

/// A proposal carried between cascade stages.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    bbox: BoundingBox,
    score: f32,
    reg: [f32; 4],
}

pub struct MtcnnDetector {
    pnet: Mutex<Session>,
    rnet: Mutex<Session>,
    onet: Mutex<Session>,
    config: DetectorConfig,
}

impl MtcnnDetector {
    pub fn new(pnet: Session, rnet: Session, onet: Session, config: DetectorConfig) -> Self {
        Self {
            pnet: Mutex::new(pnet),
            rnet: Mutex::new(rnet),
            onet: Mutex::new(onet),
            config,
        }
    }

    /// Find every face larger than the configured minimum size.
    ///
    /// Zero faces is a normal outcome and yields an empty vector.
    pub fn detect(&self, img: &RgbImage) -> Result<Vec<DetectedFace>> {
        let proposals = self.propose(img)?;
        if proposals.is_empty() {
            return Ok(Vec::new());
        }

        let refined = self.refine(img, proposals)?;
        if refined.is_empty() {
            return Ok(Vec::new());
        }

        let final_boxes = self.output(img, refined)?;

        let mut faces: Vec<DetectedFace> = final_boxes
            .into_iter()
            .map(|(bbox, confidence)| {
                let crop_box = bbox.with_margin(self.config.margin, self.config.image_size);
                let crop_img = crop_resized(img, &crop_box, self.config.image_size);
                DetectedFace {
                    bbox,
                    confidence,
                    crop: chw_pixels(&crop_img, self.config.post_process),
                }
            })
            .collect();

        if !self.config.keep_all && faces.len() > 1 {
            faces.sort_by(|a, b| {
                b.confidence
                    .partial_cmp(&a.confidence)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            faces.truncate(1);
        }

        tracing::debug!(faces = faces.len(), "detection cascade finished");
        Ok(faces)
    }

    /// Stage 1: scan the image pyramid with the proposal network.
    fn propose(&self, img: &RgbImage) -> Result<Vec<(BoundingBox, f32)>> {
        let (width, height) = img.dimensions();
        let min_side = width.min(height) as f32;
        let scales = pyramid_scales(
            min_side,
            self.config.min_face_size as f32,
            self.config.scale_factor,
        );

        let mut candidates: Vec<Candidate> = Vec::new();
        for scale in scales {
            let scaled_w = ((width as f32 * scale).ceil() as u32).max(CELL_SIZE as u32);
            let scaled_h = ((height as f32 * scale).ceil() as u32).max(CELL_SIZE as u32);
            let resized = imageops::resize(img, scaled_w, scaled_h, FilterType::Triangle);
            let input = chw_pixels(&resized, true);

            let outputs = self.run(
                &self.pnet,
                input,
                [1, 3, scaled_h as usize, scaled_w as usize],
            )?;
            let (probs_shape, probs_data) = output_with_channels(&outputs, 2)?;
            let (_, regs_data) = output_with_channels(&outputs, 4)?;

            let map_h = probs_shape[2] as usize;
            let map_w = probs_shape[3] as usize;
            let probs = Array3::from_shape_vec((2, map_h, map_w), probs_data.clone())
                .map_err(|e| FacepipeError::Other(format!("bad P-Net output shape: {e}")))?;
            let regs = Array3::from_shape_vec((4, map_h, map_w), regs_data.clone())
                .map_err(|e| FacepipeError::Other(format!("bad P-Net output shape: {e}")))?;

            let mut scale_candidates = Vec::new();
            for y in 0..map_h {
                for x in 0..map_w {
                    let score = probs[[1, y, x]];
                    if score < self.config.thresholds[0] {
                        continue;
                    }
                    let bbox = BoundingBox {
                        x1: (STRIDE * x as f32 + 1.0) / scale,
                        y1: (STRIDE * y as f32 + 1.0) / scale,
                        x2: (STRIDE * x as f32 + CELL_SIZE) / scale,
                        y2: (STRIDE * y as f32 + CELL_SIZE) / scale,
                    };
                    let reg = [
                        regs[[0, y, x]],
                        regs[[1, y, x]],
                        regs[[2, y, x]],
                        regs[[3, y, x]],
                    ];
                    scale_candidates.push(Candidate { bbox, score, reg });
                }
            }

            candidates.extend(nms_candidates(scale_candidates, PNET_SCALE_NMS, NmsMode::Union));
        }

        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let kept = nms_candidates(candidates, PNET_CROSS_NMS, NmsMode::Union);
        Ok(kept
            .into_iter()
            .map(|c| (c.bbox.regress(c.reg).to_square(), c.score))
            .collect())
    }

    /// Stage 2: re-score proposals with the refinement network.
    fn refine(
        &self,
        img: &RgbImage,
        boxes: Vec<(BoundingBox, f32)>,
    ) -> Result<Vec<(BoundingBox, f32)>> {
        let input = stage_inputs(img, &boxes, RNET_SIZE);
        let outputs = self.run(
            &self.rnet,
            input,
            [boxes.len(), 3, RNET_SIZE as usize, RNET_SIZE as usize],
        )?;
        let (_, probs) = output_with_channels(&outputs, 2)?;
        let (_, regs) = output_with_channels(&outputs, 4)?;

        let mut candidates = Vec::new();
        for (i, (bbox, _)) in boxes.iter().enumerate() {
            let score = probs[i * 2 + 1];
            if score < self.config.thresholds[1] {
                continue;
            }
            candidates.push(Candidate {
                bbox: *bbox,
                score,
                reg: [regs[i * 4], regs[i * 4 + 1], regs[i * 4 + 2], regs[i * 4 + 3]],
            });
        }

        let kept = nms_candidates(candidates, RNET_NMS, NmsMode::Union);
        Ok(kept
            .into_iter()
            .map(|c| (c.bbox.regress(c.reg).to_square(), c.score))
            .collect())
    }

    /// Stage 3: final boxes from the output network.
    fn output(
        &self,
        img: &RgbImage,
        boxes: Vec<(BoundingBox, f32)>,
    ) -> Result<Vec<(BoundingBox, f32)>> {
        let input = stage_inputs(img, &boxes, ONET_SIZE);
        let outputs = self.run(
            &self.onet,
            input,
            [boxes.len(), 3, ONET_SIZE as usize, ONET_SIZE as usize],
        )?;
        let (_, probs) = output_with_channels(&outputs, 2)?;
        let (_, regs) = output_with_channels(&outputs, 4)?;

        // Regression is applied before suppression in the final stage
        let mut final_boxes = Vec::new();
        let mut scores = Vec::new();
        for (i, (bbox, _)) in boxes.iter().enumerate() {
            let score = probs[i * 2 + 1];
            if score < self.config.thresholds[2] {
                continue;
            }
            let reg = [regs[i * 4], regs[i * 4 + 1], regs[i * 4 + 2], regs[i * 4 + 3]];
            final_boxes.push(bbox.regress(reg));
            scores.push(score);
        }

        let keep = nms_indices(&final_boxes, &scores, ONET_NMS, NmsMode::Min);
        Ok(keep
            .into_iter()
            .map(|i| (final_boxes[i], scores[i]))
            .collect())
    }

    fn run(
        &self,
        session: &Mutex<Session>,
        input: Vec<f32>,
        dims: [usize; 4],
    ) -> Result<Vec<(Vec<i64>, Vec<f32>)>> {
        let input_tensor = Tensor::from_array((dims, input.into_boxed_slice()))?;

        let mut session = session
            .lock()
            .map_err(|_| FacepipeError::Other("model session lock poisoned".to_string()))?;
        let outputs = session.run(ort::inputs!["input" => input_tensor])?;

        let mut collected = Vec::new();
        for (_name, value) in outputs.iter() {
            let (shape, data) = value.try_extract_tensor::<f32>()?;
            collected.push((shape.to_vec(), data.to_vec()));
        }
        Ok(collected)
    }
}

/// Pick the network output whose second dimension has the given extent.
///
/// Output names vary between ONNX exports of the same cascade, so outputs
/// are matched on shape: 2 channels for face probabilities, 4 for box
/// regressions, 10 for the (unused) landmark offsets.
fn output_with_channels(
    outputs: &[(Vec<i64>, Vec<f32>)],
    channels: i64,
) -> Result<(&Vec<i64>, &Vec<f32>)> {
    outputs
        .iter()
        .find(|(shape, _)| shape.len() >= 2 && shape[1] == channels)
        .map(|(shape, data)| (shape, data))
        .ok_or_else(|| {
            FacepipeError::Other(format!(
                "no network output with {channels} channels among {:?}",
                outputs.iter().map(|(s, _)| s.clone()).collect::<Vec<_>>()
            ))
        })
}

/// Scale factors for the detection pyramid, largest first.
pub(crate) fn pyramid_scales(min_side: f32, min_face_size: f32, factor: f32) -> Vec<f32> {
    let mut scales = Vec::new();
    let mut scale = CELL_SIZE / min_face_size;
    let mut span = min_side * scale;
    while span >= CELL_SIZE {
        scales.push(scale);
        scale *= factor;
        span *= factor;
    }
    scales
}

/// Flatten an image into CHW float samples, normalized for the networks.
pub(crate) fn chw_pixels(img: &RgbImage, normalize: bool) -> Vec<f32> {
    let (w, h) = img.dimensions();
    let plane = (w * h) as usize;
    let mut data = vec![0.0f32; 3 * plane];

    for y in 0..h as usize {
        for x in 0..w as usize {
            let pixel = img.get_pixel(x as u32, y as u32);
            let idx = y * w as usize + x;
            if normalize {
                data[idx] = (pixel[0] as f32 - 127.5) / 128.0;
                data[plane + idx] = (pixel[1] as f32 - 127.5) / 128.0;
                data[2 * plane + idx] = (pixel[2] as f32 - 127.5) / 128.0;
            } else {
                data[idx] = pixel[0] as f32;
                data[plane + idx] = pixel[1] as f32;
                data[2 * plane + idx] = pixel[2] as f32;
            }
        }
    }

    data
}

/// Crop every box out of the source image and pack the batch in NCHW order.
fn stage_inputs(img: &RgbImage, boxes: &[(BoundingBox, f32)], size: u32) -> Vec<f32> {
    let mut batch = Vec::with_capacity(boxes.len() * 3 * (size * size) as usize);
    for (bbox, _) in boxes {
        let crop = crop_resized(img, bbox, size);
        batch.extend(chw_pixels(&crop, true));
    }
    batch
}

fn nms_candidates(candidates: Vec<Candidate>, threshold: f32, mode: NmsMode) -> Vec<Candidate> {
    let boxes: Vec<BoundingBox> = candidates.iter().map(|c| c.bbox).collect();
    let scores: Vec<f32> = candidates.iter().map(|c| c.score).collect();
    nms_indices(&boxes, &scores, threshold, mode)
        .into_iter()
        .map(|i| candidates[i])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_pyramid_scales_for_default_setup() {
        // 160px short side, 20px minimum face, factor 0.709
        let scales = pyramid_scales(160.0, 20.0, 0.709);
        assert_eq!(scales.len(), 7);
        assert!((scales[0] - 0.6).abs() < 1e-6);
        for pair in scales.windows(2) {
            assert!((pair[1] / pair[0] - 0.709).abs() < 1e-5);
        }
        // Smallest pyramid level still covers the detection cell
        assert!(160.0 * scales[6] >= 12.0);
        assert!(160.0 * scales[6] * 0.709 < 12.0);
    }

    #[test]
    fn test_pyramid_empty_for_tiny_images() {
        assert!(pyramid_scales(16.0, 20.0, 0.709).is_empty());
    }

    #[test]
    fn test_chw_normalization() {
        let mut img = RgbImage::new(2, 1);
        img.put_pixel(0, 0, Rgb([255, 0, 127]));
        img.put_pixel(1, 0, Rgb([128, 128, 128]));

        let data = chw_pixels(&img, true);
        assert_eq!(data.len(), 6);
        // Planes: R, G, B, each 2 wide
        assert!((data[0] - (255.0 - 127.5) / 128.0).abs() < 1e-6);
        assert!((data[2] - (0.0 - 127.5) / 128.0).abs() < 1e-6);
        assert!((data[4] - (127.0 - 127.5) / 128.0).abs() < 1e-6);
        assert!((data[1] - (128.0 - 127.5) / 128.0).abs() < 1e-6);
    }

    #[test]
    fn test_chw_raw_keeps_sample_values() {
        let mut img = RgbImage::new(1, 1);
        img.put_pixel(0, 0, Rgb([10, 20, 30]));
        assert_eq!(chw_pixels(&img, false), vec![10.0, 20.0, 30.0]);
    }

    #[test]
    fn test_output_matching_by_channel_count() {
        let outputs = vec![
            (vec![1i64, 4, 8, 8], vec![0.0; 256]),
            (vec![1i64, 2, 8, 8], vec![0.0; 128]),
        ];
        let (shape, _) = output_with_channels(&outputs, 2).unwrap();
        assert_eq!(shape[1], 2);
        assert!(output_with_channels(&outputs, 10).is_err());
    }

    #[test]
    fn test_stage_inputs_batch_layout() {
        let img = RgbImage::new(64, 64);
        let boxes = vec![
            (
                BoundingBox {
                    x1: 0.0,
                    y1: 0.0,
                    x2: 32.0,
                    y2: 32.0,
                },
                0.9,
            ),
            (
                BoundingBox {
                    x1: 16.0,
                    y1: 16.0,
                    x2: 48.0,
                    y2: 48.0,
                },
                0.8,
            ),
        ];
        let batch = stage_inputs(&img, &boxes, RNET_SIZE);
        assert_eq!(batch.len(), 2 * 3 * 24 * 24);
    }
}
