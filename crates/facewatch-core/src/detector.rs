//! SCRFD face detector via ONNX Runtime.
//!
//! Letterboxes the grayscale frame into the square model input, decodes the
//! per-stride anchor-free box and keypoint regressions and suppresses
//! overlaps.

use crate::types::{BoundingBox, DetectedFace, Frame, Landmarks};
use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const INPUT_SIZE: u32 = 640;
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 128.0;
const SCORE_THRESHOLD: f32 = 0.5;
const NMS_IOU_THRESHOLD: f32 = 0.4;
const STRIDES: [u32; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;
const KEYPOINTS: usize = 5;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("unsupported detection model: {0}")]
    UnsupportedModel(String),
    #[error("frame is {width}x{height} but carries {len} bytes")]
    InvalidFrame { width: u32, height: u32, len: usize },
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Where the resized frame sits inside the square model input.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Letterbox {
    scale: f32,
    width: u32,
    height: u32,
    pad_x: u32,
    pad_y: u32,
}

impl Letterbox {
    fn fit(width: u32, height: u32, target: u32) -> Self {
        let scale = (target as f32 / width as f32).min(target as f32 / height as f32);
        let new_width = ((width as f32 * scale).round() as u32).clamp(1, target);
        let new_height = ((height as f32 * scale).round() as u32).clamp(1, target);
        Self {
            scale,
            width: new_width,
            height: new_height,
            pad_x: (target - new_width) / 2,
            pad_y: (target - new_height) / 2,
        }
    }

    fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.pad_x
            && x < self.pad_x + self.width
            && y >= self.pad_y
            && y < self.pad_y + self.height
    }

    /// Map a point in model-input space back to frame space.
    fn to_frame(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.pad_x as f32) / self.scale,
            (y - self.pad_y as f32) / self.scale,
        )
    }
}

/// Output positions of the score, box and keypoint tensors for one stride.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StrideOutputs {
    scores: usize,
    boxes: usize,
    keypoints: Option<usize>,
}

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    outputs: [StrideOutputs; 3],
}

impl FaceDetector {
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        if names.len() < 6 {
            return Err(DetectorError::UnsupportedModel(format!(
                "expected score and box outputs for 3 strides, got {} outputs",
                names.len()
            )));
        }

        let outputs = map_outputs(&names);
        if outputs.iter().any(|o| o.keypoints.is_none()) {
            tracing::warn!("SCRFD model has no keypoint outputs; faces will not be aligned");
        }
        tracing::info!(path = %model_path.display(), ?names, ?outputs, "loaded SCRFD model");

        Ok(Self { session, outputs })
    }

    /// Detect faces in a grayscale frame, highest confidence first.
    pub fn detect(&mut self, frame: &Frame) -> Result<Vec<DetectedFace>, DetectorError> {
        let pixels = frame.width as usize * frame.height as usize;
        if pixels == 0 || frame.data.len() < pixels {
            return Err(DetectorError::InvalidFrame {
                width: frame.width,
                height: frame.height,
                len: frame.data.len(),
            });
        }

        let gray = GrayImage::from_raw(frame.width, frame.height, frame.data[..pixels].to_vec())
            .ok_or(DetectorError::InvalidFrame {
                width: frame.width,
                height: frame.height,
                len: frame.data.len(),
            })?;

        let letterbox = Letterbox::fit(frame.width, frame.height, INPUT_SIZE);
        let input = to_input_tensor(&gray, &letterbox);
        let slots = self.outputs;

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (&stride, slot) in STRIDES.iter().zip(slots.iter()) {
            let (_, scores) = outputs[slot.scores]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("scores for stride {stride}: {e}")))?;
            let (_, boxes) = outputs[slot.boxes]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("boxes for stride {stride}: {e}")))?;
            let keypoints = match slot.keypoints {
                Some(idx) => Some(
                    outputs[idx]
                        .try_extract_tensor::<f32>()
                        .map_err(|e| {
                            DetectorError::InferenceFailed(format!("keypoints for stride {stride}: {e}"))
                        })?
                        .1,
                ),
                None => None,
            };

            candidates.extend(decode_stride(
                scores,
                boxes,
                keypoints,
                stride,
                &letterbox,
                SCORE_THRESHOLD,
            ));
        }

        let faces = non_max_suppression(candidates, NMS_IOU_THRESHOLD);
        tracing::trace!(faces = faces.len(), "SCRFD detection done");
        Ok(faces)
    }
}

/// Locate the tensors by their `score_8`-style names, or fall back to the
/// standard export order (scores 0–2, boxes 3–5, keypoints 6–8).
fn map_outputs(names: &[String]) -> [StrideOutputs; 3] {
    let position = |kind: &str, stride: u32| names.iter().position(|n| *n == format!("{kind}_{stride}"));

    let named: Option<Vec<StrideOutputs>> = STRIDES
        .iter()
        .map(|&stride| {
            Some(StrideOutputs {
                scores: position("score", stride)?,
                boxes: position("bbox", stride)?,
                keypoints: position("kps", stride),
            })
        })
        .collect();

    match named {
        Some(slots) => [slots[0], slots[1], slots[2]],
        None => std::array::from_fn(|i| StrideOutputs {
            scores: i,
            boxes: i + 3,
            keypoints: (names.len() >= 9).then_some(i + 6),
        }),
    }
}

/// Letterboxed, normalized NCHW tensor; padding normalizes to 0.0.
fn to_input_tensor(gray: &GrayImage, letterbox: &Letterbox) -> Array4<f32> {
    let resized = imageops::resize(gray, letterbox.width, letterbox.height, FilterType::Triangle);
    let size = INPUT_SIZE as usize;

    Array4::from_shape_fn((1, 3, size, size), |(_, _, y, x)| {
        let (x, y) = (x as u32, y as u32);
        let pixel = if letterbox.contains(x, y) {
            resized.get_pixel(x - letterbox.pad_x, y - letterbox.pad_y)[0] as f32
        } else {
            PIXEL_MEAN
        };
        (pixel - PIXEL_MEAN) / PIXEL_STD
    })
}

/// Turn one stride's score, distance and keypoint maps into frame-space faces.
fn decode_stride(
    scores: &[f32],
    boxes: &[f32],
    keypoints: Option<&[f32]>,
    stride: u32,
    letterbox: &Letterbox,
    threshold: f32,
) -> Vec<DetectedFace> {
    let columns = (INPUT_SIZE / stride) as usize;
    let step = stride as f32;

    scores
        .iter()
        .enumerate()
        .filter(|(_, &score)| score > threshold)
        .filter_map(|(idx, &score)| {
            let cell = idx / ANCHORS_PER_CELL;
            let cx = (cell % columns) as f32 * step;
            let cy = (cell / columns) as f32 * step;
            let d = boxes.get(idx * 4..idx * 4 + 4)?;

            let (x1, y1) = letterbox.to_frame(cx - d[0] * step, cy - d[1] * step);
            let (x2, y2) = letterbox.to_frame(cx + d[2] * step, cy + d[3] * step);

            let landmarks = keypoints
                .and_then(|k| k.get(idx * KEYPOINTS * 2..(idx + 1) * KEYPOINTS * 2))
                .map(|k| -> Landmarks {
                    std::array::from_fn(|i| letterbox.to_frame(cx + k[i * 2] * step, cy + k[i * 2 + 1] * step))
                });

            Some(DetectedFace {
                bbox: BoundingBox {
                    x: x1,
                    y: y1,
                    width: x2 - x1,
                    height: y2 - y1,
                    confidence: score,
                },
                landmarks,
            })
        })
        .collect()
}

/// Greedy NMS; result is sorted by descending confidence.
fn non_max_suppression(mut candidates: Vec<DetectedFace>, iou_threshold: f32) -> Vec<DetectedFace> {
    candidates.sort_by(|a, b| b.bbox.confidence.total_cmp(&a.bbox.confidence));

    let mut kept: Vec<DetectedFace> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if kept.iter().all(|k| k.bbox.iou(&candidate.bbox) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_face(x: f32, y: f32, w: f32, h: f32, conf: f32) -> DetectedFace {
        DetectedFace {
            bbox: BoundingBox { x, y, width: w, height: h, confidence: conf },
            landmarks: None,
        }
    }

    #[test]
    fn test_letterbox_landscape_frame() {
        let lb = Letterbox::fit(640, 480, INPUT_SIZE);
        assert_eq!((lb.width, lb.height), (640, 480));
        assert_eq!((lb.pad_x, lb.pad_y), (0, 80));
        assert!(lb.contains(10, 80));
        assert!(!lb.contains(10, 79));
        assert!(!lb.contains(10, 560));
    }

    #[test]
    fn test_letterbox_maps_back_to_frame() {
        let lb = Letterbox::fit(320, 240, INPUT_SIZE);
        // 320x240 scales by 2 into 640x480 with 80px vertical padding.
        let (x, y) = lb.to_frame(100.0 * 2.0, 50.0 * 2.0 + 80.0);
        assert!((x - 100.0).abs() < 1e-3, "x = {x}");
        assert!((y - 50.0).abs() < 1e-3, "y = {y}");
    }

    #[test]
    fn test_input_tensor_padding_normalizes_to_zero() {
        let gray = GrayImage::from_pixel(64, 32, image::Luma([255]));
        let lb = Letterbox::fit(64, 32, INPUT_SIZE);
        let tensor = to_input_tensor(&gray, &lb);

        assert_eq!(tensor.shape(), &[1, 3, 640, 640]);
        assert_eq!(tensor[[0, 0, 0, 0]], 0.0);
        let inside = (255.0 - PIXEL_MEAN) / PIXEL_STD;
        assert!((tensor[[0, 2, 320, 320]] - inside).abs() < 1e-6);
    }

    #[test]
    fn test_decode_stride_single_anchor() {
        let lb = Letterbox::fit(640, 640, INPUT_SIZE);
        let stride = 32u32;
        let columns = (INPUT_SIZE / stride) as usize;
        let anchors = columns * columns * ANCHORS_PER_CELL;

        let mut scores = vec![0.0f32; anchors];
        let mut boxes = vec![0.0f32; anchors * 4];
        // Anchor at cell (row 2, col 3), second anchor of the cell.
        let idx = (2 * columns + 3) * ANCHORS_PER_CELL + 1;
        scores[idx] = 0.9;
        boxes[idx * 4..idx * 4 + 4].copy_from_slice(&[1.0, 1.0, 2.0, 3.0]);

        let faces = decode_stride(&scores, &boxes, None, stride, &lb, 0.5);
        assert_eq!(faces.len(), 1);
        let face = faces[0].bbox;
        assert!((face.x - (96.0 - 32.0)).abs() < 1e-3);
        assert!((face.y - (64.0 - 32.0)).abs() < 1e-3);
        assert!((face.width - 96.0).abs() < 1e-3);
        assert!((face.height - 128.0).abs() < 1e-3);
        assert_eq!(face.confidence, 0.9);
        assert!(faces[0].landmarks.is_none());
    }

    #[test]
    fn test_decode_stride_keypoints_through_letterbox() {
        // 320x240 frame: scale 2, 80px vertical padding.
        let lb = Letterbox::fit(320, 240, INPUT_SIZE);
        let stride = 16u32;
        let columns = (INPUT_SIZE / stride) as usize;
        let anchors = columns * columns * ANCHORS_PER_CELL;

        let mut scores = vec![0.0f32; anchors];
        let boxes = vec![1.0f32; anchors * 4];
        let mut kps = vec![0.0f32; anchors * KEYPOINTS * 2];
        // Cell (row 10, col 10): anchor center (160, 160) in model space.
        let idx = (10 * columns + 10) * ANCHORS_PER_CELL;
        scores[idx] = 0.8;
        kps[idx * 10..idx * 10 + 10]
            .copy_from_slice(&[-1.0, -1.0, 1.0, -1.0, 0.0, 0.0, -1.0, 1.0, 1.0, 1.0]);

        let faces = decode_stride(&scores, &boxes, Some(&kps), stride, &lb, 0.5);
        let landmarks = faces[0].landmarks.unwrap();
        // (160 - 16, 160 - 16) in model space -> (72, 32) in the frame.
        assert!((landmarks[0].0 - 72.0).abs() < 1e-3, "{landmarks:?}");
        assert!((landmarks[0].1 - 32.0).abs() < 1e-3, "{landmarks:?}");
        // Nose sits on the anchor center: (80, 40).
        assert!((landmarks[2].0 - 80.0).abs() < 1e-3);
        assert!((landmarks[2].1 - 40.0).abs() < 1e-3);
        assert!((landmarks[4].0 - 88.0).abs() < 1e-3);
        assert!((landmarks[4].1 - 48.0).abs() < 1e-3);
    }

    #[test]
    fn test_decode_stride_skips_low_scores() {
        let lb = Letterbox::fit(640, 640, INPUT_SIZE);
        let scores = vec![0.5f32, 0.1, 0.49];
        let boxes = vec![1.0f32; 12];
        assert!(decode_stride(&scores, &boxes, None, 32, &lb, 0.5).is_empty());
    }

    #[test]
    fn test_nms_suppresses_overlapping() {
        let faces = non_max_suppression(
            vec![
                make_face(5.0, 5.0, 100.0, 100.0, 0.8),
                make_face(0.0, 0.0, 100.0, 100.0, 0.9),
                make_face(200.0, 200.0, 50.0, 50.0, 0.7),
            ],
            NMS_IOU_THRESHOLD,
        );
        assert_eq!(faces.len(), 2);
        assert_eq!(faces[0].bbox.confidence, 0.9);
        assert_eq!(faces[1].bbox.confidence, 0.7);
    }

    #[test]
    fn test_nms_empty() {
        assert!(non_max_suppression(Vec::new(), NMS_IOU_THRESHOLD).is_empty());
    }

    #[test]
    fn test_map_outputs_by_name() {
        let names: Vec<String> = [
            "bbox_8", "kps_8", "score_8", "bbox_16", "kps_16", "score_16", "bbox_32", "kps_32",
            "score_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let slots = map_outputs(&names);
        assert_eq!(slots[0], StrideOutputs { scores: 2, boxes: 0, keypoints: Some(1) });
        assert_eq!(slots[1], StrideOutputs { scores: 5, boxes: 3, keypoints: Some(4) });
        assert_eq!(slots[2], StrideOutputs { scores: 8, boxes: 6, keypoints: Some(7) });
    }

    #[test]
    fn test_map_outputs_positional_fallback() {
        let names: Vec<String> = (0..9).map(|i: usize| (440 + i).to_string()).collect();
        let slots = map_outputs(&names);
        assert_eq!(slots[0], StrideOutputs { scores: 0, boxes: 3, keypoints: Some(6) });
        assert_eq!(slots[2], StrideOutputs { scores: 2, boxes: 5, keypoints: Some(8) });

        let six: Vec<String> = (0..6).map(|i: usize| i.to_string()).collect();
        assert_eq!(map_outputs(&six)[1], StrideOutputs { scores: 1, boxes: 4, keypoints: None });
    }
}
