//! facewatch-hw: V4L2 camera capture.
//!
//! Implements the core `CameraSource` / `VideoStream` seams on top of the
//! `v4l` crate and converts raw capture buffers to 8-bit grayscale.

pub mod camera;
pub mod frame;

pub use camera::{DeviceInfo, V4lCamera, V4lStream};
pub use facewatch_core::CameraError;
pub use frame::{is_dark_frame, FrameError, PixelFormat};
