//! facewatch-core: live face recognition session.
//!
//! Keeps the registered face samples and their matcher, drives the
//! per-tick recognition loop with its debounced status reporting, and ships
//! an SCRFD + ArcFace analyzer running on ONNX Runtime.

pub mod alignment;
pub mod analyzer;
pub mod camera;
pub mod detector;
pub mod engine;
pub mod matcher;
pub mod present;
pub mod recognition;
pub mod recognizer;
pub mod registry;
pub mod session;
pub mod status;
pub mod types;

#[cfg(test)]
mod testing;

pub use analyzer::{decode_image, AnalyzerError, FaceAnalyzer, OnnxAnalyzer};
pub use camera::{CameraError, CameraSource, CaptureConstraints, FacingMode, VideoStream};
pub use engine::{spawn_engine, EngineError, EngineHandle};
pub use matcher::{
    distance_for_similarity, BestMatch, FaceMatcher, MatchLabel, DEFAULT_MATCH_SIMILARITY,
    DEFAULT_MATCH_THRESHOLD, UNKNOWN_LABEL,
};
pub use present::{BoxColor, Presenter, RecognitionOutcome};
pub use recognition::{LoopPhase, RecognitionLoop, RecognitionState, StepOutcome};
pub use registry::{RegisterOutcome, RegistryError, SampleRegistry, SharedRegistry};
pub use session::{RecognitionSettings, Session, SessionError};
pub use status::{DebounceTimings, LabelState};
pub use types::{BoundingBox, DetectedFace, Descriptor, Detection, Frame, LabeledSample, Landmarks};
