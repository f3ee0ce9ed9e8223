use super::{CameraHealth, CameraSource};
use crate::config::CameraConfig;
use crate::error::CaptureError;
use crate::frame::FrameCapture;
use gstreamer::prelude::*;
use gstreamer::Pipeline;
use gstreamer_app::AppSink;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

const SAMPLE_TIMEOUT_MS: u64 = 2000;

struct ActivePipeline {
    pipeline: Pipeline,
    sink: AppSink,
}

impl Drop for ActivePipeline {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gstreamer::State::Null);
    }
}

/// V4L2 MJPEG camera read through a GStreamer appsink.
///
/// The pipeline is built on first use and torn down after a failed read so
/// the next capture re-opens the device.
pub struct GstCamera {
    config: CameraConfig,
    active: Mutex<Option<ActivePipeline>>,
}

impl GstCamera {
    pub fn new(config: CameraConfig) -> Self {
        Self {
            config,
            active: Mutex::new(None),
        }
    }

    fn device(&self) -> String {
        format!("/dev/video{}", self.config.index)
    }

    fn pipeline_description(&self) -> String {
        let (width, height) = self.config.resolution;
        format!(
            "v4l2src device={} io-mode=mmap do-timestamp=true ! \
             image/jpeg,width={},height={},framerate={}/1 ! \
             appsink name=sink sync=false max-buffers=1 drop=true enable-last-sample=false",
            self.device(),
            width,
            height,
            self.config.fps
        )
    }

    fn open(&self) -> Result<ActivePipeline, CaptureError> {
        let device = self.device();
        let open_error = |details: String| CaptureError::DeviceOpen {
            device: device.clone(),
            details,
        };

        gstreamer::init().map_err(|e| open_error(format!("Failed to initialize GStreamer: {}", e)))?;

        let description = self.pipeline_description();
        info!("Creating GStreamer pipeline: {}", description);

        let pipeline = gstreamer::parse::launch(&description)
            .map_err(|e| open_error(format!("Failed to create pipeline: {}", e)))?
            .downcast::<Pipeline>()
            .map_err(|_| open_error("Failed to downcast to Pipeline".to_string()))?;

        let sink = pipeline
            .by_name("sink")
            .ok_or_else(|| open_error("Pipeline has no appsink".to_string()))?
            .downcast::<AppSink>()
            .map_err(|_| open_error("Failed to downcast to AppSink".to_string()))?;

        pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(|e| open_error(format!("Failed to start pipeline: {}", e)))?;

        Ok(ActivePipeline { pipeline, sink })
    }

    fn pull(&self, active: &ActivePipeline) -> Result<Vec<u8>, CaptureError> {
        let read_error = |details: &str| CaptureError::Read {
            device: self.device(),
            details: details.to_string(),
        };

        let sample = active
            .sink
            .try_pull_sample(gstreamer::ClockTime::from_mseconds(SAMPLE_TIMEOUT_MS))
            .ok_or_else(|| read_error("No sample before timeout"))?;
        let buffer = sample
            .buffer()
            .ok_or_else(|| read_error("No buffer in sample"))?;
        let map = buffer
            .map_readable()
            .map_err(|_| read_error("Failed to map buffer"))?;

        Ok(map.as_slice().to_vec())
    }
}

impl CameraSource for GstCamera {
    fn capture_frame(&self, prompt_version: u64) -> Result<FrameCapture, CaptureError> {
        let mut active = self.active.lock();
        let pipeline = match active.take() {
            Some(pipeline) => pipeline,
            None => self.open()?,
        };

        match self.pull(&pipeline) {
            Ok(jpeg) => {
                *active = Some(pipeline);
                debug!("Captured {} byte frame from {}", jpeg.len(), self.device());
                Ok(FrameCapture::new(self.device(), jpeg, prompt_version))
            }
            Err(e) => {
                warn!("Camera read failed, pipeline will be rebuilt: {}", e);
                Err(e)
            }
        }
    }

    fn health(&self) -> CameraHealth {
        let mut active = self.active.lock();
        if active.is_none() {
            match self.open() {
                Ok(pipeline) => *active = Some(pipeline),
                Err(e) => {
                    return CameraHealth {
                        ok: false,
                        detail: e.to_string(),
                    }
                }
            }
        }
        CameraHealth {
            ok: true,
            detail: format!("Streaming from {}", self.device()),
        }
    }

    fn source_name(&self) -> String {
        self.device()
    }
}
