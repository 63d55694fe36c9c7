//! In-process fakes for the analyzer, camera and presenter seams.

use crate::analyzer::{AnalyzerError, FaceAnalyzer};
use crate::camera::{CameraError, CameraSource, CaptureConstraints, VideoStream};
use crate::present::{BoxColor, Presenter, RecognitionOutcome};
use crate::types::{BoundingBox, Descriptor, Detection, Frame};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub fn detection(values: &[f32]) -> Detection {
    Detection {
        bbox: BoundingBox { x: 10.0, y: 10.0, width: 40.0, height: 40.0, confidence: 0.9 },
        descriptor: Descriptor::new(values.to_vec()),
    }
}

/// Analyzer answering from a queue; an empty queue means "no faces".
#[derive(Clone, Default)]
pub struct ScriptedAnalyzer {
    pub script: Arc<Mutex<VecDeque<Result<Vec<Detection>, AnalyzerError>>>>,
    pub delay: Option<Duration>,
    pub running: Arc<AtomicUsize>,
    pub max_running: Arc<AtomicUsize>,
    pub calls: Arc<AtomicUsize>,
}

impl ScriptedAnalyzer {
    pub fn with_delay(delay: Duration) -> Self {
        Self { delay: Some(delay), ..Self::default() }
    }

    pub fn push(&self, result: Result<Vec<Detection>, AnalyzerError>) {
        self.script.lock().unwrap().push_back(result);
    }

    pub fn push_faces(&self, faces: Vec<Detection>) {
        self.push(Ok(faces));
    }
}

impl FaceAnalyzer for ScriptedAnalyzer {
    fn detect_all(&mut self, _frame: &Frame) -> Result<Vec<Detection>, AnalyzerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now_running, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        let result = self.script.lock().unwrap().pop_front().unwrap_or(Ok(Vec::new()));
        self.running.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Camera whose frames carry the instant stored in `clock`.
#[derive(Clone)]
pub struct FakeCamera {
    pub clock: Arc<Mutex<Instant>>,
    pub acquired: Arc<AtomicUsize>,
    pub released: Arc<AtomicUsize>,
    pub captured: Arc<AtomicUsize>,
    pub fail_acquire: Arc<AtomicBool>,
    /// How long each capture blocks, like a dequeue waiting on the device.
    pub capture_delay: Arc<Mutex<Duration>>,
}

impl Default for FakeCamera {
    fn default() -> Self {
        Self {
            clock: Arc::new(Mutex::new(Instant::now())),
            acquired: Arc::default(),
            released: Arc::default(),
            captured: Arc::default(),
            fail_acquire: Arc::default(),
            capture_delay: Arc::default(),
        }
    }
}

impl FakeCamera {
    /// Move the frame clock to `start + secs`.
    pub fn set_time(&self, start: Instant, secs: f32) {
        *self.clock.lock().unwrap() = start + Duration::from_secs_f32(secs);
    }

    pub fn now(&self) -> Instant {
        *self.clock.lock().unwrap()
    }
}

struct FakeStream {
    clock: Arc<Mutex<Instant>>,
    captured: Arc<AtomicUsize>,
    delay: Arc<Mutex<Duration>>,
}

impl VideoStream for FakeStream {
    fn dimensions(&self) -> (u32, u32) {
        (4, 4)
    }

    fn capture(&mut self) -> Result<Frame, CameraError> {
        let sequence = self.captured.fetch_add(1, Ordering::SeqCst) as u32;
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        Ok(Frame {
            data: vec![128; 16],
            width: 4,
            height: 4,
            timestamp: *self.clock.lock().unwrap(),
            sequence,
        })
    }
}

impl CameraSource for FakeCamera {
    fn acquire(&self, _constraints: &CaptureConstraints) -> Result<Box<dyn VideoStream>, CameraError> {
        if self.fail_acquire.load(Ordering::SeqCst) {
            return Err(CameraError::PermissionDenied("/dev/video0".into()));
        }
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeStream {
            clock: Arc::clone(&self.clock),
            captured: Arc::clone(&self.captured),
            delay: Arc::clone(&self.capture_delay),
        }))
    }

    fn release(&self, stream: Box<dyn VideoStream>) {
        self.released.fetch_add(1, Ordering::SeqCst);
        drop(stream);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Frame,
    Box(String, BoxColor),
    ClearSurface,
    Recognition(String, RecognitionOutcome),
    ClearRecognition,
    Status(String, Option<Duration>),
    ClearStatus,
    Samples(Vec<String>),
    FinishFrame,
}

/// Presenter that records every call.
#[derive(Default)]
pub struct RecordingPresenter {
    pub events: Mutex<Vec<Event>>,
}

impl RecordingPresenter {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn take(&self) -> Vec<Event> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }

    pub fn recognitions(&self) -> Vec<(String, RecognitionOutcome)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Recognition(text, outcome) => Some((text, outcome)),
                _ => None,
            })
            .collect()
    }

    pub fn boxes(&self) -> Vec<(String, BoxColor)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Box(label, color) => Some((label, color)),
                _ => None,
            })
            .collect()
    }

    pub fn statuses(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Status(text, _) => Some(text),
                _ => None,
            })
            .collect()
    }

    fn record(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

impl Presenter for RecordingPresenter {
    fn draw_frame(&self, _frame: &Frame) {
        self.record(Event::Frame);
    }

    fn draw_box(&self, _bbox: &BoundingBox, label: &str, color: BoxColor) {
        self.record(Event::Box(label.to_string(), color));
    }

    fn clear_surface(&self) {
        self.record(Event::ClearSurface);
    }

    fn show_recognition(&self, message: &str, outcome: RecognitionOutcome) {
        self.record(Event::Recognition(message.to_string(), outcome));
    }

    fn clear_recognition(&self) {
        self.record(Event::ClearRecognition);
    }

    fn show_status(&self, message: &str, auto_hide: Option<Duration>) {
        self.record(Event::Status(message.to_string(), auto_hide));
    }

    fn clear_status(&self) {
        self.record(Event::ClearStatus);
    }

    fn render_samples(&self, labels: &[String]) {
        self.record(Event::Samples(labels.to_vec()));
    }

    fn finish_frame(&self) {
        self.record(Event::FinishFrame);
    }
}
