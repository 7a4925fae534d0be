//! Live preview surfaces and the FPS overlay drawn on preview copies.

use tracing::info;

use crate::traits::{FourCC, Frame};

/// Left/top margin of the overlay bar, in pixels.
const MARGIN: u32 = 10;
/// Overlay bar thickness, in pixels.
const BAR_HEIGHT: u32 = 4;
/// Bar pixels per frame-per-second.
const PIXELS_PER_FPS: f64 = 4.0;

/// Somewhere to show frames while recording or previewing.
pub trait PreviewSurface {
    /// Show a frame. The frame is already a copy and may carry an overlay.
    fn show(&mut self, frame: &Frame, fps: f64);

    /// Tear the surface down. Idempotent.
    fn close(&mut self);
}

/// Headless preview: logs the frame rate periodically.
#[derive(Debug)]
pub struct LogPreview {
    every: u64,
    shown: u64,
    open: bool,
}

impl LogPreview {
    /// Log one line every `every` frames.
    #[must_use]
    pub fn new(every: u64) -> Self {
        Self {
            every: every.max(1),
            shown: 0,
            open: true,
        }
    }

    /// Frames shown so far.
    #[must_use]
    pub const fn shown(&self) -> u64 {
        self.shown
    }
}

impl PreviewSurface for LogPreview {
    fn show(&mut self, frame: &Frame, fps: f64) {
        if !self.open {
            return;
        }
        self.shown += 1;
        if self.shown % self.every == 0 {
            info!(
                frames = self.shown,
                resolution = %frame.resolution(),
                fps = format_args!("{fps:.1}"),
                "preview"
            );
        }
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            info!(frames = self.shown, "preview closed");
        }
    }
}

/// Draw a white bar whose length tracks `fps` in the top-left corner.
///
/// Only ever call this on a copy: the recorded frame must stay untouched.
/// Compressed frames are left as they are.
pub fn draw_fps_overlay(frame: &mut Frame, fps: f64) {
    let Some(bytes_per_pixel) = frame.fourcc.bytes_per_pixel() else {
        return;
    };
    if frame.width <= MARGIN || frame.height <= MARGIN + BAR_HEIGHT {
        return;
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let wanted = (fps.max(0.0) * PIXELS_PER_FPS).round() as u32;
    // keep the bar on even pixel boundaries so YUYV pairs stay whole
    let length = wanted.min(frame.width - MARGIN) & !1;

    let row_bytes = (frame.width * bytes_per_pixel) as usize;
    let start = (MARGIN * bytes_per_pixel) as usize;
    let end = ((MARGIN + length) * bytes_per_pixel) as usize;
    let fourcc = frame.fourcc;

    for y in MARGIN..MARGIN + BAR_HEIGHT {
        let row = y as usize * row_bytes;
        let Some(span) = frame.data.get_mut(row + start..row + end) else {
            return;
        };
        match fourcc {
            FourCC::YUYV => {
                for pair in span.chunks_exact_mut(4) {
                    pair.copy_from_slice(&[235, 128, 235, 128]);
                }
            }
            _ => span.fill(255),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlay_draws_on_raw_frames() {
        let mut frame = Frame::new(vec![0; 64 * 32], 64, 32, FourCC::GREY);
        draw_fps_overlay(&mut frame, 5.0);

        assert_eq!(frame.pixel_at(MARGIN, MARGIN), Some((255, 255, 255)));
        assert_eq!(frame.pixel_at(MARGIN + 19, MARGIN), Some((255, 255, 255)));
        assert_eq!(frame.pixel_at(MARGIN + 20, MARGIN), Some((0, 0, 0)));
        assert_eq!(frame.pixel_at(0, 0), Some((0, 0, 0)));
    }

    #[test]
    fn test_overlay_is_clamped_to_frame() {
        let mut frame = Frame::new(vec![0; 16 * 16 * 2], 16, 16, FourCC::YUYV);
        draw_fps_overlay(&mut frame, 1000.0);
        assert_eq!(frame.data.len(), 16 * 16 * 2);
    }

    #[test]
    fn test_overlay_skips_compressed_and_tiny_frames() {
        let mut mjpg = Frame::new(vec![0xFF, 0xD8, 0, 0], 64, 64, FourCC::MJPG);
        draw_fps_overlay(&mut mjpg, 30.0);
        assert_eq!(mjpg.data, vec![0xFF, 0xD8, 0, 0]);

        let mut tiny = Frame::new(vec![0; 4], 2, 2, FourCC::GREY);
        draw_fps_overlay(&mut tiny, 30.0);
        assert_eq!(tiny.data, vec![0; 4]);
    }

    #[test]
    fn test_log_preview_close_is_idempotent() {
        let mut preview = LogPreview::new(2);
        let frame = Frame::new(vec![1; 4], 2, 2, FourCC::GREY);
        preview.show(&frame, 30.0);
        preview.close();
        preview.close();
        preview.show(&frame, 30.0);
        assert_eq!(preview.shown(), 1);
    }
}
