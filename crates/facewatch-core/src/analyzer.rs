//! Face analysis seam: one call turns a frame into detections with
//! descriptors.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{Detection, Frame};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
pub const RECOGNIZER_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("{0}")]
    Other(String),
}

/// Detection and description of every face in a frame.
///
/// Implementations may block; they run on the engine thread.
pub trait FaceAnalyzer: Send + 'static {
    /// All faces in `frame`, highest confidence first.
    fn detect_all(&mut self, frame: &Frame) -> Result<Vec<Detection>, AnalyzerError>;
}

/// SCRFD detection followed by ArcFace description of every detected face.
pub struct OnnxAnalyzer {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxAnalyzer {
    /// Load both models from `model_dir`.
    pub fn load(model_dir: &Path) -> Result<Self, AnalyzerError> {
        let (detector_path, recognizer_path) = model_paths(model_dir);
        let detector = FaceDetector::load(&detector_path)?;
        let recognizer = FaceRecognizer::load(&recognizer_path)?;
        Ok(Self { detector, recognizer })
    }
}

impl FaceAnalyzer for OnnxAnalyzer {
    fn detect_all(&mut self, frame: &Frame) -> Result<Vec<Detection>, AnalyzerError> {
        let faces = self.detector.detect(frame)?;
        let mut detections = Vec::with_capacity(faces.len());
        for face in faces {
            let descriptor = self.recognizer.describe(frame, &face)?;
            detections.push(Detection {
                bbox: face.bbox,
                descriptor,
            });
        }
        Ok(detections)
    }
}

/// Detector and recognizer model paths inside `model_dir`.
pub fn model_paths(model_dir: &Path) -> (PathBuf, PathBuf) {
    (
        model_dir.join(DETECTOR_MODEL_FILE),
        model_dir.join(RECOGNIZER_MODEL_FILE),
    )
}

/// Decode an encoded image (PNG, JPEG, ...) into a grayscale frame.
pub fn decode_image(bytes: &[u8]) -> Result<Frame, image::ImageError> {
    let gray = image::load_from_memory(bytes)?.to_luma8();
    let (width, height) = gray.dimensions();
    Ok(Frame::new(gray.into_raw(), width, height))
}
