//! V4L2 camera source via the `v4l` crate.

use crate::frame::{self, PixelFormat};
use facewatch_core::{CameraError, CameraSource, CaptureConstraints, FacingMode, Frame, VideoStream};
use std::io;
use std::path::Path;
use std::time::Instant;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const EBUSY: i32 = 16;
const CAPTURE_BUFFERS: u32 = 4;

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Camera source bound to one V4L2 device path (e.g. "/dev/video0").
#[derive(Debug, Clone)]
pub struct V4lCamera {
    device_path: String,
}

impl V4lCamera {
    pub fn new(device_path: impl Into<String>) -> Self {
        Self {
            device_path: device_path.into(),
        }
    }

    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        (0..16)
            .map(|i| format!("/dev/video{i}"))
            .filter(|path| Path::new(path).exists())
            .filter_map(|path| {
                let dev = Device::with_path(&path).ok()?;
                let caps = dev.query_caps().ok()?;
                if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                    return None;
                }
                Some(DeviceInfo {
                    path,
                    name: caps.card.clone(),
                    driver: caps.driver.clone(),
                    bus: caps.bus.clone(),
                })
            })
            .collect()
    }

    fn open(&self, constraints: &CaptureConstraints) -> Result<V4lStream, CameraError> {
        let path = self.device_path.as_str();
        if !Path::new(path).exists() {
            return Err(CameraError::DeviceNotFound(path.to_string()));
        }

        let device = Device::with_path(path).map_err(|e| open_error(path, e))?;
        let caps = device
            .query_caps()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to query capabilities: {e}")))?;

        tracing::info!(device = path, driver = %caps.driver, card = %caps.card, "opened camera");

        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }
        if constraints.facing == FacingMode::Environment {
            tracing::debug!(device = path, "facing mode is not selectable on V4L2; using device as-is");
        }

        let mut fmt = device
            .format()
            .map_err(|e| CameraError::FormatNegotiationFailed(format!("failed to get format: {e}")))?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = constraints.ideal_width;
        fmt.height = constraints.ideal_height;

        let negotiated = device
            .set_format(&fmt)
            .map_err(|e| CameraError::FormatNegotiationFailed(format!("failed to set format: {e}")))?;

        let pixel_format = PixelFormat::from_fourcc(&negotiated.fourcc.repr).ok_or_else(|| {
            CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {:?} (need YUYV, GREY, or Y16)",
                negotiated.fourcc
            ))
        })?;

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?negotiated.fourcc,
            "negotiated format"
        );

        // Buffers are mapped and queued once; every capture reuses them.
        let stream = MmapStream::with_buffers(&device, BufType::VideoCapture, CAPTURE_BUFFERS)
            .map_err(|e| CameraError::CaptureFailed(format!("failed to create mmap stream: {e}")))?;

        Ok(V4lStream {
            stream,
            _device: device,
            device_path: path.to_string(),
            width: negotiated.width,
            height: negotiated.height,
            pixel_format,
        })
    }
}

impl CameraSource for V4lCamera {
    fn acquire(&self, constraints: &CaptureConstraints) -> Result<Box<dyn VideoStream>, CameraError> {
        Ok(Box::new(self.open(constraints)?))
    }

    fn release(&self, stream: Box<dyn VideoStream>) {
        drop(stream);
        tracing::debug!(device = %self.device_path, "camera device closed");
    }
}

fn open_error(path: &str, err: io::Error) -> CameraError {
    if err.kind() == io::ErrorKind::PermissionDenied {
        CameraError::PermissionDenied(path.to_string())
    } else if err.raw_os_error() == Some(EBUSY) {
        CameraError::DeviceBusy
    } else {
        CameraError::DeviceNotFound(format!("{path}: {err}"))
    }
}

/// An open device with a negotiated format and a running mmap stream.
/// Dropping it stops streaming, unmaps the buffers and closes the device.
pub struct V4lStream {
    // Declared first so the buffers are unmapped before the device closes.
    stream: MmapStream<'static>,
    _device: Device,
    device_path: String,
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
}

impl VideoStream for V4lStream {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn capture(&mut self) -> Result<Frame, CameraError> {
        let (buf, meta) = self
            .stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;

        let data = frame::to_grayscale(self.pixel_format, buf, self.width, self.height)
            .map_err(|e| CameraError::CaptureFailed(format!("{}: {e}", self.device_path)))?;

        if frame::is_dark_frame(&data, frame::DARK_FRAME_RATIO) {
            tracing::debug!(sequence = meta.sequence, "dark frame");
        }

        Ok(Frame {
            data,
            width: self.width,
            height: self.height,
            timestamp: Instant::now(),
            sequence: meta.sequence,
        })
    }
}
