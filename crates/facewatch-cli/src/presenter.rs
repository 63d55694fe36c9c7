//! Terminal presenter: messages go to a line-oriented writer, boxes are drawn
//! onto an RGB canvas that can be saved as a snapshot after each iteration.

use facewatch_core::{BoundingBox, BoxColor, Frame, Presenter, RecognitionOutcome};
use image::{DynamicImage, GrayImage, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

const BOX_THICKNESS: i32 = 2;

struct StatusLine {
    text: String,
    expires_at: Option<Instant>,
}

impl StatusLine {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

pub struct TerminalPresenter {
    out: Mutex<Box<dyn Write + Send>>,
    canvas: Mutex<Option<RgbImage>>,
    snapshot: Option<PathBuf>,
    last_recognition: Mutex<Option<String>>,
    status: Mutex<Option<StatusLine>>,
}

impl TerminalPresenter {
    pub fn stdout(snapshot: Option<PathBuf>) -> Self {
        Self::with_writer(Box::new(io::stdout()), snapshot)
    }

    pub fn with_writer(out: Box<dyn Write + Send>, snapshot: Option<PathBuf>) -> Self {
        Self {
            out: Mutex::new(out),
            canvas: Mutex::new(None),
            snapshot,
            last_recognition: Mutex::new(None),
            status: Mutex::new(None),
        }
    }

    /// Current status text, or `None` once cleared or auto-hidden.
    pub fn status(&self) -> Option<String> {
        let mut status = lock(&self.status);
        if status.as_ref().is_some_and(|s| s.is_expired(Instant::now())) {
            *status = None;
        }
        status.as_ref().map(|s| s.text.clone())
    }

    /// Last recognition message still on screen.
    pub fn recognition(&self) -> Option<String> {
        lock(&self.last_recognition).clone()
    }

    /// Copy of the canvas as of the last drawn frame.
    pub fn canvas(&self) -> Option<RgbImage> {
        lock(&self.canvas).clone()
    }

    fn print(&self, line: &str) {
        let mut out = lock(&self.out);
        if let Err(e) = writeln!(out, "{line}").and_then(|_| out.flush()) {
            tracing::warn!(error = %e, "failed to write to terminal");
        }
    }
}

impl Presenter for TerminalPresenter {
    fn draw_frame(&self, frame: &Frame) {
        let gray = GrayImage::from_raw(frame.width, frame.height, frame.data.clone());
        if gray.is_none() {
            tracing::warn!(
                width = frame.width,
                height = frame.height,
                len = frame.data.len(),
                "frame buffer does not match its dimensions"
            );
        }
        *lock(&self.canvas) = gray.map(|g| DynamicImage::ImageLuma8(g).to_rgb8());
    }

    fn draw_box(&self, bbox: &BoundingBox, label: &str, color: BoxColor) {
        let mut canvas = lock(&self.canvas);
        let Some(canvas) = canvas.as_mut() else {
            return;
        };
        let color = Rgb(color.rgb());
        let width = bbox.width.round().max(1.0) as i32;
        let height = bbox.height.round().max(1.0) as i32;
        for inset in 0..BOX_THICKNESS {
            let (w, h) = (width - 2 * inset, height - 2 * inset);
            if w <= 0 || h <= 0 {
                break;
            }
            let rect = Rect::at(bbox.x.round() as i32 + inset, bbox.y.round() as i32 + inset)
                .of_size(w as u32, h as u32);
            draw_hollow_rect_mut(canvas, rect, color);
        }
        tracing::trace!(label, x = bbox.x, y = bbox.y, "box drawn");
    }

    fn clear_surface(&self) {
        *lock(&self.canvas) = None;
    }

    fn show_recognition(&self, message: &str, outcome: RecognitionOutcome) {
        {
            let mut last = lock(&self.last_recognition);
            if last.as_deref() == Some(message) {
                return;
            }
            *last = Some(message.to_string());
        }
        let marker = match outcome {
            RecognitionOutcome::Recognized => "+",
            RecognitionOutcome::NotRecognized => "!",
            RecognitionOutcome::Neutral => "*",
        };
        self.print(&format!("[{marker}] {message}"));
    }

    fn clear_recognition(&self) {
        lock(&self.last_recognition).take();
    }

    fn show_status(&self, message: &str, auto_hide: Option<Duration>) {
        let now = Instant::now();
        *lock(&self.status) = Some(StatusLine {
            text: message.to_string(),
            expires_at: auto_hide.filter(|d| !d.is_zero()).map(|d| now + d),
        });
        self.print(message);
    }

    fn clear_status(&self) {
        lock(&self.status).take();
    }

    fn render_samples(&self, labels: &[String]) {
        if labels.is_empty() {
            self.print("No registered users.");
        } else {
            self.print(&format!("Registered users: {}", labels.join(", ")));
        }
    }

    fn finish_frame(&self) {
        let Some(path) = &self.snapshot else {
            return;
        };
        let canvas = lock(&self.canvas);
        if let Some(canvas) = canvas.as_ref() {
            if let Err(e) = canvas.save(path) {
                tracing::warn!(path = %path.display(), error = %e, "failed to save snapshot");
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn lines(&self) -> Vec<String> {
            String::from_utf8(self.0.lock().unwrap().clone())
                .unwrap()
                .lines()
                .map(str::to_string)
                .collect()
        }
    }

    fn presenter() -> (TerminalPresenter, SharedBuf) {
        let buf = SharedBuf::default();
        (TerminalPresenter::with_writer(Box::new(buf.clone()), None), buf)
    }

    fn bbox(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox { x, y, width: w, height: h, confidence: 0.9 }
    }

    #[test]
    fn test_identical_recognition_printed_once() {
        let (p, buf) = presenter();
        p.show_recognition("No registered users to compare against", RecognitionOutcome::Neutral);
        p.show_recognition("No registered users to compare against", RecognitionOutcome::Neutral);
        assert_eq!(buf.lines(), vec!["[*] No registered users to compare against"]);

        p.clear_recognition();
        assert_eq!(p.recognition(), None);
        p.show_recognition("No registered users to compare against", RecognitionOutcome::Neutral);
        assert_eq!(buf.lines().len(), 2);
    }

    #[test]
    fn test_status_auto_hide() {
        let (p, _buf) = presenter();
        p.show_status("Processing image...", None);
        assert_eq!(p.status().as_deref(), Some("Processing image..."));

        p.show_status("done", Some(Duration::from_millis(1)));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(p.status(), None);

        p.show_status("persistent", Some(Duration::ZERO));
        assert_eq!(p.status().as_deref(), Some("persistent"));
        p.clear_status();
        assert_eq!(p.status(), None);
    }

    #[test]
    fn test_box_drawn_in_color() {
        let (p, _buf) = presenter();
        p.draw_frame(&Frame::new(vec![0; 20 * 20], 20, 20));
        p.draw_box(&bbox(2.0, 3.0, 10.0, 8.0), "Alice", BoxColor::Matched);

        let canvas = p.canvas().unwrap();
        assert_eq!(canvas.get_pixel(2, 3), &Rgb(BoxColor::Matched.rgb()));
        assert_eq!(canvas.get_pixel(3, 4), &Rgb(BoxColor::Matched.rgb()));
        assert_eq!(canvas.get_pixel(6, 7), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_new_frame_drops_boxes() {
        let (p, _buf) = presenter();
        p.draw_frame(&Frame::new(vec![0; 16], 4, 4));
        p.draw_box(&bbox(0.0, 0.0, 4.0, 4.0), "x", BoxColor::Unknown);
        p.draw_frame(&Frame::new(vec![0; 16], 4, 4));
        assert_eq!(p.canvas().unwrap().get_pixel(0, 0), &Rgb([0, 0, 0]));

        p.clear_surface();
        assert!(p.canvas().is_none());
        // Boxes without a surface are ignored.
        p.draw_box(&bbox(0.0, 0.0, 4.0, 4.0), "x", BoxColor::Unknown);
    }

    #[test]
    fn test_render_samples() {
        let (p, buf) = presenter();
        p.render_samples(&[]);
        p.render_samples(&["Alice".to_string(), "Bob".to_string()]);
        assert_eq!(buf.lines(), vec!["No registered users.", "Registered users: Alice, Bob"]);
    }
}
