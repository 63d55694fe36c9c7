//! Presentation layer seam: where boxes, recognition messages and status
//! text end up.

use crate::types::{BoundingBox, Frame};
use std::time::Duration;

/// Box colour by match outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoxColor {
    /// Registered face (green).
    Matched,
    /// Face that matched nobody (red).
    Unknown,
    /// Face seen while nothing is registered (blue).
    Detected,
}

impl BoxColor {
    pub fn rgb(self) -> [u8; 3] {
        match self {
            BoxColor::Matched => [0, 200, 0],
            BoxColor::Unknown => [220, 0, 0],
            BoxColor::Detected => [0, 90, 255],
        }
    }
}

/// How a recognition message should be styled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecognitionOutcome {
    Recognized,
    NotRecognized,
    Neutral,
}

/// Rendering surface and message area driven by the session.
///
/// All methods take `&self`: implementations are shared between the
/// recognition task and command handlers and keep their own interior state.
pub trait Presenter: Send + Sync {
    /// Replace the drawable surface with `frame`, dropping previous boxes.
    fn draw_frame(&self, frame: &Frame);

    fn draw_box(&self, bbox: &BoundingBox, label: &str, color: BoxColor);

    fn clear_surface(&self);

    fn show_recognition(&self, message: &str, outcome: RecognitionOutcome);

    fn clear_recognition(&self);

    /// Show status text; `None` keeps it until replaced or cleared.
    fn show_status(&self, message: &str, auto_hide: Option<Duration>);

    fn clear_status(&self);

    /// Render the registered labels, each with a removal action.
    fn render_samples(&self, labels: &[String]);

    /// Called once after every completed recognition iteration.
    fn finish_frame(&self) {}
}
