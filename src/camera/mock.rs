use super::{encode_jpeg, CameraHealth, CameraSource};
use crate::error::CaptureError;
use crate::frame::FrameCapture;
use image::{Rgb, RgbImage};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::trace;

const SOURCE_NAME: &str = "mock-camera";
const MIN_FRAME_SPACING: Duration = Duration::from_millis(50);

/// Synthetic camera producing a scrolling gradient
pub struct MockCamera {
    width: u32,
    height: u32,
    counter: AtomicU64,
    last_frame_at: Mutex<Option<Instant>>,
}

impl MockCamera {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            counter: AtomicU64::new(0),
            last_frame_at: Mutex::new(None),
        }
    }

    /// Frames handed out so far
    pub fn frame_count(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }

    fn pace(&self) {
        let mut last = self.last_frame_at.lock();
        if let Some(previous) = *last {
            if previous.elapsed() < MIN_FRAME_SPACING {
                std::thread::sleep(MIN_FRAME_SPACING);
            }
        }
        *last = Some(Instant::now());
    }

    fn render(&self, shift: u64) -> RgbImage {
        let width = self.width;
        let height = self.height;
        let span = width.saturating_sub(1).max(1);
        let shift = (shift % width as u64) as u32;

        RgbImage::from_fn(width, height, |x, y| {
            let column = (x + width - shift) % width;
            let level = (column * 255 / span) as u8;
            let vertical = (y * 255 / height.saturating_sub(1).max(1)) as u8;
            Rgb([level, 255 - vertical, level])
        })
    }
}

impl CameraSource for MockCamera {
    fn capture_frame(&self, prompt_version: u64) -> Result<FrameCapture, CaptureError> {
        self.pace();
        let frame_number = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let jpeg = encode_jpeg(&self.render(frame_number), 80)?;

        trace!(
            "Generated mock frame {} ({}x{}, {} bytes)",
            frame_number,
            self.width,
            self.height,
            jpeg.len()
        );

        Ok(FrameCapture::new(SOURCE_NAME, jpeg, prompt_version))
    }

    fn health(&self) -> CameraHealth {
        CameraHealth {
            ok: true,
            detail: "Mock camera active".to_string(),
        }
    }

    fn source_name(&self) -> String {
        SOURCE_NAME.to_string()
    }
}
