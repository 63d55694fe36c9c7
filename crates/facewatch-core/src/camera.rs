//! Camera seam: acquire a video stream, grab frames from it, release it.

use crate::types::Frame;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
}

/// Which way the requested camera should face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FacingMode {
    #[default]
    User,
    Environment,
}

/// Requested stream properties. Sizes are ideals; the device may negotiate
/// something else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConstraints {
    pub facing: FacingMode,
    pub ideal_width: u32,
    pub ideal_height: u32,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            facing: FacingMode::User,
            ideal_width: 640,
            ideal_height: 480,
        }
    }
}

/// An acquired, running video stream.
pub trait VideoStream: Send {
    /// Negotiated frame size.
    fn dimensions(&self) -> (u32, u32);

    /// Grab the current frame as grayscale.
    fn capture(&mut self) -> Result<Frame, CameraError>;
}

pub trait CameraSource: Send + Sync {
    fn acquire(&self, constraints: &CaptureConstraints) -> Result<Box<dyn VideoStream>, CameraError>;

    /// Stop the stream and free the device.
    fn release(&self, stream: Box<dyn VideoStream>) {
        drop(stream);
    }
}
