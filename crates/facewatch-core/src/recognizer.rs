//! ArcFace descriptor extraction via ONNX Runtime.
//!
//! Faces with keypoints are warped onto the 112×112 template; faces without
//! them fall back to a margin crop resized to the model input. Either way the
//! output is an L2-normalized 512-value descriptor.

use crate::alignment::{self, ALIGNED_SIZE};
use crate::types::{BoundingBox, DetectedFace, Descriptor, Frame};
use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const INPUT_SIZE: u32 = ALIGNED_SIZE;
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 127.5;
const DESCRIPTOR_LEN: usize = 512;
/// Fraction of the box size added on every side before cropping.
const CROP_MARGIN: f32 = 0.1;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("face box {0:?} lies outside the frame")]
    EmptyCrop(BoundingBox),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

pub struct FaceRecognizer {
    session: Session,
}

impl FaceRecognizer {
    pub fn load(model_path: &Path) -> Result<Self, RecognizerError> {
        if !model_path.exists() {
            return Err(RecognizerError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ArcFace model"
        );

        Ok(Self { session })
    }

    /// Extract the descriptor of a detected face.
    pub fn describe(&mut self, frame: &Frame, face: &DetectedFace) -> Result<Descriptor, RecognizerError> {
        let crop = face_input(frame, face).ok_or(RecognizerError::EmptyCrop(face.bbox))?;
        let input = to_input_tensor(&crop);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("descriptor extraction: {e}")))?;

        if raw.len() != DESCRIPTOR_LEN {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {DESCRIPTOR_LEN} values, got {}",
                raw.len()
            )));
        }

        Ok(Descriptor::new(l2_normalize(raw.to_vec())))
    }
}

/// Widened, frame-clamped crop rectangle `(x, y, width, height)`, or `None`
/// when nothing of the box is inside the frame.
fn crop_region(bbox: &BoundingBox, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
    let margin_x = bbox.width * CROP_MARGIN;
    let margin_y = bbox.height * CROP_MARGIN;

    let left = (bbox.x - margin_x).max(0.0);
    let top = (bbox.y - margin_y).max(0.0);
    let right = (bbox.x + bbox.width + margin_x).min(width as f32);
    let bottom = (bbox.y + bbox.height + margin_y).min(height as f32);

    if right - left < 1.0 || bottom - top < 1.0 {
        return None;
    }

    let x = left.floor() as u32;
    let y = top.floor() as u32;
    let w = (right.ceil() as u32).min(width) - x;
    let h = (bottom.ceil() as u32).min(height) - y;
    Some((x, y, w, h))
}

fn frame_image(frame: &Frame) -> Option<GrayImage> {
    let pixels = frame.width as usize * frame.height as usize;
    GrayImage::from_raw(frame.width, frame.height, frame.data.get(..pixels)?.to_vec())
}

/// 112×112 model input: aligned when keypoints are usable, cropped otherwise.
fn face_input(frame: &Frame, face: &DetectedFace) -> Option<GrayImage> {
    let gray = frame_image(frame)?;
    if let Some(landmarks) = &face.landmarks {
        if let Some(aligned) = alignment::align_face(&gray, landmarks) {
            return Some(aligned);
        }
        tracing::debug!(?landmarks, "degenerate keypoints; using box crop");
    }
    crop_face(&gray, &face.bbox)
}

fn crop_face(gray: &GrayImage, bbox: &BoundingBox) -> Option<GrayImage> {
    let (x, y, w, h) = crop_region(bbox, gray.width(), gray.height())?;
    let crop = imageops::crop_imm(gray, x, y, w, h).to_image();
    Some(imageops::resize(&crop, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle))
}

/// Grayscale replicated into three normalized channels.
fn to_input_tensor(face: &GrayImage) -> Array4<f32> {
    let size = INPUT_SIZE as usize;
    Array4::from_shape_fn((1, 3, size, size), |(_, _, y, x)| {
        let pixel = face.get_pixel(x as u32, y as u32)[0] as f32;
        (pixel - PIXEL_MEAN) / PIXEL_STD
    })
}

fn l2_normalize(values: Vec<f32>) -> Vec<f32> {
    let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        values.into_iter().map(|v| v / norm).collect()
    } else {
        values
    }
}
