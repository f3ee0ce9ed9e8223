//! Frame sources feeding the live view and the inference engine.

#[cfg(all(feature = "camera", target_os = "linux"))]
mod device;
mod mock;

#[cfg(all(feature = "camera", target_os = "linux"))]
pub use device::GstCamera;
pub use mock::MockCamera;

use crate::config::CameraConfig;
use crate::error::CaptureError;
use crate::frame::FrameCapture;
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Result of probing a camera
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CameraHealth {
    pub ok: bool,
    pub detail: String,
}

/// Anything that can hand out JPEG frames on demand.
///
/// Captures may block; async callers go through `spawn_blocking`.
pub trait CameraSource: Send + Sync {
    /// Grab the most recent frame, tagged with the prompt version in force
    fn capture_frame(&self, prompt_version: u64) -> Result<FrameCapture, CaptureError>;

    fn health(&self) -> CameraHealth;

    fn source_name(&self) -> String;
}

/// Capture on the blocking pool
pub async fn capture_async(
    camera: Arc<dyn CameraSource>,
    prompt_version: u64,
) -> Result<FrameCapture, CaptureError> {
    tokio::task::spawn_blocking(move || camera.capture_frame(prompt_version))
        .await
        .map_err(|e| CaptureError::Read {
            device: "capture task".to_string(),
            details: e.to_string(),
        })?
}

/// JPEG-encode an RGB image
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, CaptureError> {
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality)
        .encode_image(image)
        .map_err(|e| CaptureError::Encode {
            details: e.to_string(),
        })?;
    Ok(buffer)
}

/// Pick the configured camera, falling back to the synthetic one
pub fn select_camera(config: &CameraConfig) -> Arc<dyn CameraSource> {
    if config.mock {
        info!("Using mock camera ({}x{})", config.resolution.0, config.resolution.1);
        return Arc::new(MockCamera::new(config.resolution.0, config.resolution.1));
    }

    #[cfg(all(feature = "camera", target_os = "linux"))]
    {
        info!("Using V4L2 camera /dev/video{}", config.index);
        Arc::new(GstCamera::new(config.clone()))
    }

    #[cfg(not(all(feature = "camera", target_os = "linux")))]
    {
        warn!("Device camera support not compiled in; falling back to mock camera");
        Arc::new(MockCamera::new(config.resolution.0, config.resolution.1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_jpeg_produces_jpeg_markers() {
        let image = RgbImage::from_pixel(8, 8, image::Rgb([10, 20, 30]));
        let jpeg = encode_jpeg(&image, 80).unwrap();

        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(&jpeg[jpeg.len() - 2..], &[0xFF, 0xD9]);
    }

    #[test]
    fn test_select_mock_camera() {
        let config = CameraConfig {
            mock: true,
            index: 0,
            resolution: (64, 48),
            fps: 10,
        };

        let camera = select_camera(&config);
        assert_eq!(camera.source_name(), "mock-camera");
        assert!(camera.health().ok);
    }

    #[tokio::test]
    async fn test_capture_async_uses_blocking_pool() {
        let camera: Arc<dyn CameraSource> = Arc::new(MockCamera::new(32, 24));
        let frame = capture_async(camera, 3).await.unwrap();

        assert_eq!(frame.prompt_version, 3);
        assert!(!frame.is_empty());
    }
}
