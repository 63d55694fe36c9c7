//! A recognition session: registered samples, the analyzer engine, the
//! camera and the presenter, with an explicit init/teardown lifecycle.

use crate::analyzer::{decode_image, AnalyzerError, FaceAnalyzer};
use crate::camera::{CameraError, CameraSource, CaptureConstraints};
use crate::engine::{spawn_engine, EngineError, EngineHandle};
use crate::matcher::DEFAULT_MATCH_THRESHOLD;
use crate::present::Presenter;
use crate::recognition::{RecognitionLoop, RecognitionState, DEFAULT_TICK};
use crate::registry::{self, RegisterOutcome, RegistryError, SampleRegistry, SharedRegistry};
use crate::status::DebounceTimings;
use crate::types::{Frame, LabeledSample};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_MESSAGE_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("face recognition models are not loaded")]
    ModelsNotLoaded,
    #[error("failed to load face recognition models: {0}")]
    ModelLoad(#[source] AnalyzerError),
    #[error("camera unavailable: {0}")]
    Camera(#[from] CameraError),
    #[error("a name is required")]
    EmptyLabel,
    #[error("no face detected in the image")]
    NoFaceDetected,
    #[error("could not decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Tunables for matching, debouncing and scheduling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecognitionSettings {
    pub match_threshold: f32,
    pub timings: DebounceTimings,
    pub tick: Duration,
    /// Auto-hide delay for transient status messages.
    pub message_timeout: Duration,
    pub constraints: CaptureConstraints,
}

impl Default for RecognitionSettings {
    fn default() -> Self {
        Self {
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            timings: DebounceTimings::default(),
            tick: DEFAULT_TICK,
            message_timeout: DEFAULT_MESSAGE_TIMEOUT,
            constraints: CaptureConstraints::default(),
        }
    }
}

pub struct Session {
    registry: SharedRegistry,
    camera: Arc<dyn CameraSource>,
    presenter: Arc<dyn Presenter>,
    settings: RecognitionSettings,
    engine: Option<EngineHandle>,
    recognition: Option<Arc<RecognitionLoop>>,
}

impl Session {
    pub fn new(
        camera: Arc<dyn CameraSource>,
        presenter: Arc<dyn Presenter>,
        settings: RecognitionSettings,
    ) -> Self {
        Self {
            registry: SampleRegistry::shared(settings.match_threshold),
            camera,
            presenter,
            settings,
            engine: None,
            recognition: None,
        }
    }

    pub fn settings(&self) -> &RecognitionSettings {
        &self.settings
    }

    /// Whether models are loaded and recognition can start.
    pub fn is_ready(&self) -> bool {
        self.engine.is_some()
    }

    /// Load the analyzer with `load`, reporting progress and failure through
    /// the presenter. A failure leaves the session not ready.
    pub fn load_analyzer<A, F>(&mut self, load: F) -> Result<(), SessionError>
    where
        A: FaceAnalyzer,
        F: FnOnce() -> Result<A, AnalyzerError>,
    {
        self.presenter.show_status("Loading face recognition models...", None);
        match load() {
            Ok(analyzer) => {
                self.attach_analyzer(analyzer)?;
                self.presenter.clear_status();
                Ok(())
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to load face recognition models");
                self.presenter
                    .show_status(&format!("Failed to load face recognition models: {err}"), None);
                Err(SessionError::ModelLoad(err))
            }
        }
    }

    /// Move an already loaded analyzer onto the engine thread.
    pub fn attach_analyzer<A: FaceAnalyzer>(&mut self, analyzer: A) -> Result<(), SessionError> {
        if let Some(recognition) = self.recognition.take() {
            recognition.stop();
        }

        let engine = spawn_engine(analyzer)?;
        self.recognition = Some(Arc::new(RecognitionLoop::new(
            engine.clone(),
            Arc::clone(&self.registry),
            Arc::clone(&self.camera),
            Arc::clone(&self.presenter),
            self.settings.timings,
            self.settings.tick,
        )));
        self.engine = Some(engine);
        tracing::info!("face analyzer ready");
        Ok(())
    }

    /// Register the first face found in an encoded image under `label`.
    pub async fn register_from_image(
        &self,
        label: &str,
        image: &[u8],
    ) -> Result<RegisterOutcome, SessionError> {
        self.ensure_ready()?;
        if label.trim().is_empty() {
            return Err(self.registration_failed(SessionError::EmptyLabel));
        }

        self.presenter.show_status("Processing image...", None);
        let frame = match decode_image(image) {
            Ok(frame) => frame,
            Err(err) => return Err(self.registration_failed(err.into())),
        };
        self.register_from_frame(label, frame).await
    }

    /// Register the first face found in `frame` under `label`.
    pub async fn register_from_frame(
        &self,
        label: &str,
        frame: Frame,
    ) -> Result<RegisterOutcome, SessionError> {
        let engine = self.ensure_ready()?;
        let label = label.trim();
        if label.is_empty() {
            return Err(self.registration_failed(SessionError::EmptyLabel));
        }

        let detections = match engine.detect_all(frame).await {
            Ok(detections) => detections,
            Err(err) => return Err(self.registration_failed(err.into())),
        };
        let Some(face) = detections.into_iter().next() else {
            return Err(self.registration_failed(SessionError::NoFaceDetected));
        };

        let result = registry::write(&self.registry).register(label, face.descriptor);
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(err) => return Err(self.registration_failed(err.into())),
        };

        let message = match outcome {
            RegisterOutcome::Created => format!("User {label} registered successfully!"),
            RegisterOutcome::Updated => format!("Registration of {label} updated successfully!"),
        };
        tracing::info!(label, ?outcome, confidence = face.bbox.confidence, "face registered");
        self.presenter
            .show_status(&message, Some(self.settings.message_timeout));
        self.presenter.render_samples(&self.labels());
        Ok(outcome)
    }

    /// Remove the sample registered under `label`. Returns whether it existed.
    pub fn remove(&self, label: &str) -> bool {
        let removed = registry::write(&self.registry).remove(label);
        if removed {
            tracing::info!(label, "face removed");
            self.presenter.show_status(
                &format!("User {label} removed successfully!"),
                Some(self.settings.message_timeout),
            );
            self.presenter.render_samples(&self.labels());
        }
        removed
    }

    pub fn labels(&self) -> Vec<String> {
        registry::read(&self.registry).labels()
    }

    pub fn samples(&self) -> Vec<LabeledSample> {
        registry::read(&self.registry).samples().to_vec()
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    /// Acquire the camera and start the recognition loop.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_recognition(&self) -> Result<(), SessionError> {
        let Some(recognition) = &self.recognition else {
            tracing::warn!("recognition requested before models were loaded");
            return Err(SessionError::ModelsNotLoaded);
        };

        self.presenter
            .show_status("Starting camera and recognition...", None);
        if let Err(err) = recognition.start(&self.settings.constraints) {
            tracing::error!(error = %err, "could not access the camera");
            self.presenter.show_status(
                &format!("Could not access the camera, check permissions: {err}"),
                None,
            );
            return Err(err.into());
        }

        self.presenter.show_status(
            "Face recognition active. Position yourself in front of the camera.",
            Some(self.settings.message_timeout),
        );
        Ok(())
    }

    /// Stop the recognition loop and release the camera.
    pub fn stop_recognition(&self) {
        if let Some(recognition) = &self.recognition {
            recognition.stop();
        }
        self.presenter.show_status(
            "Face recognition stopped.",
            Some(self.settings.message_timeout),
        );
    }

    pub fn is_recognizing(&self) -> bool {
        self.recognition.as_ref().is_some_and(|r| r.is_active())
    }

    pub fn recognition_state(&self) -> RecognitionState {
        self.recognition
            .as_ref()
            .map_or_else(RecognitionState::inactive, |r| r.state())
    }

    pub fn recognition(&self) -> Option<&Arc<RecognitionLoop>> {
        self.recognition.as_ref()
    }

    /// Stop recognition and drop the engine handle; the engine thread exits
    /// once the loop task lets go of its handle too.
    pub fn shutdown(mut self) {
        if let Some(recognition) = self.recognition.take() {
            recognition.stop();
        }
        self.engine = None;
        tracing::info!("session closed");
    }

    fn ensure_ready(&self) -> Result<&EngineHandle, SessionError> {
        self.engine.as_ref().ok_or(SessionError::ModelsNotLoaded)
    }

    fn registration_failed(&self, err: SessionError) -> SessionError {
        let message = match &err {
            SessionError::EmptyLabel => "Please enter a name for the user".to_string(),
            SessionError::NoFaceDetected => "No face detected in the image. Try another one.".to_string(),
            SessionError::Registry(inner) => format!("Could not register face: {inner}"),
            _ => "Error processing image. Try again.".to_string(),
        };
        tracing::warn!(error = %err, "registration failed");
        self.presenter
            .show_status(&message, Some(self.settings.message_timeout));
        err
    }
}
