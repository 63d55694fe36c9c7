//! Raw capture buffer to grayscale conversion.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("invalid {format:?} buffer length: expected {expected}, got {actual}")]
    InvalidLength {
        format: PixelFormat,
        expected: usize,
        actual: usize,
    },
}

/// Negotiated pixel format of the capture stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed, two bytes per pixel; the Y channel is kept.
    Yuyv,
    /// 8-bit grayscale.
    Grey,
    /// 16-bit little-endian grayscale, downscaled to 8 bits.
    Y16,
}

impl PixelFormat {
    pub fn from_fourcc(code: &[u8; 4]) -> Option<Self> {
        match code {
            b"YUYV" => Some(PixelFormat::Yuyv),
            b"GREY" => Some(PixelFormat::Grey),
            b"Y16 " | b"Y16\0" => Some(PixelFormat::Y16),
            _ => None,
        }
    }

    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Grey => 1,
            PixelFormat::Yuyv | PixelFormat::Y16 => 2,
        }
    }
}

/// Convert a raw buffer of `width` x `height` pixels to 8-bit grayscale.
pub fn to_grayscale(
    format: PixelFormat,
    buf: &[u8],
    width: u32,
    height: u32,
) -> Result<Vec<u8>, FrameError> {
    let pixels = width as usize * height as usize;
    let expected = pixels * format.bytes_per_pixel();
    if buf.len() < expected {
        return Err(FrameError::InvalidLength {
            format,
            expected,
            actual: buf.len(),
        });
    }

    let gray = match format {
        PixelFormat::Grey => buf[..pixels].to_vec(),
        // [Y0, U, Y1, V]: luma sits on even bytes.
        PixelFormat::Yuyv => buf[..expected].iter().step_by(2).copied().collect(),
        // Little-endian: the high byte carries the top 8 bits.
        PixelFormat::Y16 => buf[..expected].chunks_exact(2).map(|px| px[1]).collect(),
    };
    Ok(gray)
}

/// Share of pixels that must fall below [`DARK_PIXEL`] for a frame to count as dark.
pub const DARK_FRAME_RATIO: f32 = 0.95;
const DARK_PIXEL: u8 = 32;

/// True when more than `ratio` of the pixels sit in the darkest eighth of the range.
pub fn is_dark_frame(gray: &[u8], ratio: f32) -> bool {
    if gray.is_empty() {
        return true;
    }
    let dark = gray.iter().filter(|&&p| p < DARK_PIXEL).count();
    dark as f32 / gray.len() as f32 > ratio
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_to_grayscale() {
        // 2x1 image: [Y0=100, U=128, Y1=200, V=128]
        let gray = to_grayscale(PixelFormat::Yuyv, &[100, 128, 200, 128], 2, 1).unwrap();
        assert_eq!(gray, vec![100, 200]);
    }

    #[test]
    fn test_yuyv_to_grayscale_4x2() {
        let yuyv: Vec<u8> = (0..16).collect();
        let gray = to_grayscale(PixelFormat::Yuyv, &yuyv, 4, 2).unwrap();
        assert_eq!(gray, vec![0, 2, 4, 6, 8, 10, 12, 14]);
    }

    #[test]
    fn test_y16_keeps_high_byte() {
        let gray = to_grayscale(PixelFormat::Y16, &[0xff, 0x12, 0x00, 0xab], 2, 1).unwrap();
        assert_eq!(gray, vec![0x12, 0xab]);
    }

    #[test]
    fn test_grey_ignores_trailing_bytes() {
        let gray = to_grayscale(PixelFormat::Grey, &[1, 2, 3, 4, 5], 2, 2).unwrap();
        assert_eq!(gray, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_short_buffer_rejected() {
        let err = to_grayscale(PixelFormat::Yuyv, &[100, 128], 2, 1).unwrap_err();
        assert_eq!(
            err,
            FrameError::InvalidLength {
                format: PixelFormat::Yuyv,
                expected: 4,
                actual: 2
            }
        );
    }

    #[test]
    fn test_fourcc_mapping() {
        assert_eq!(PixelFormat::from_fourcc(b"YUYV"), Some(PixelFormat::Yuyv));
        assert_eq!(PixelFormat::from_fourcc(b"GREY"), Some(PixelFormat::Grey));
        assert_eq!(PixelFormat::from_fourcc(b"Y16 "), Some(PixelFormat::Y16));
        assert_eq!(PixelFormat::from_fourcc(b"MJPG"), None);
    }

    #[test]
    fn test_dark_frame_detection() {
        assert!(is_dark_frame(&[0; 100], DARK_FRAME_RATIO));
        assert!(is_dark_frame(&[], DARK_FRAME_RATIO));

        let mut mostly_dark = vec![10u8; 96];
        mostly_dark.extend([200; 4]);
        assert!(is_dark_frame(&mostly_dark, DARK_FRAME_RATIO));

        let lit: Vec<u8> = (0..=255).collect();
        assert!(!is_dark_frame(&lit, DARK_FRAME_RATIO));
    }
}
