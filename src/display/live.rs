use super::stats::LiveViewStats;
use crate::camera::{capture_async, CameraSource};
use crate::engine::{AlertLevel, AlertState};
use crate::error::{MonitorError, Result};
use crate::overlay::{OverlayRenderer, OverlayState};
use crate::scheduler::{AnalysisScheduler, TickDecision};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const SLOW_LOOP: Duration = Duration::from_millis(250);
const LOOP_PAUSE: Duration = Duration::from_millis(10);
const ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// One rendered live-view frame
#[derive(Debug, Clone)]
pub struct LiveFrame {
    pub frame_id: String,
    pub jpeg: Arc<Vec<u8>>,
    /// A background run was in flight when the frame was rendered
    pub analyzing: bool,
}

/// State shown to viewers: `analyzing` while a run is in flight, else the stored alert level
pub fn display_state(alert: &AlertState, busy: bool) -> AlertLevel {
    if busy {
        AlertLevel::Analyzing
    } else {
        alert.state
    }
}

/// Capture → overlay → publish loop that also drives background analysis.
///
/// The loop never waits on an inference run; it only asks the scheduler
/// whether one may start.
pub struct LiveView {
    camera: Arc<dyn CameraSource>,
    scheduler: Arc<AnalysisScheduler>,
    renderer: Arc<OverlayRenderer>,
    sender: watch::Sender<Option<LiveFrame>>,
    stats: Mutex<LiveViewStats>,
    started_at: Instant,
}

impl LiveView {
    pub fn new(
        camera: Arc<dyn CameraSource>,
        scheduler: Arc<AnalysisScheduler>,
        renderer: OverlayRenderer,
    ) -> Self {
        let (sender, _) = watch::channel(None);
        Self {
            camera,
            scheduler,
            renderer: Arc::new(renderer),
            sender,
            stats: Mutex::new(LiveViewStats::default()),
            started_at: Instant::now(),
        }
    }

    /// Receiver of the most recent rendered frame
    pub fn subscribe(&self) -> watch::Receiver<Option<LiveFrame>> {
        self.sender.subscribe()
    }

    pub fn scheduler(&self) -> Arc<AnalysisScheduler> {
        Arc::clone(&self.scheduler)
    }

    pub fn latest(&self) -> Option<LiveFrame> {
        self.sender.borrow().clone()
    }

    pub fn stats(&self) -> LiveViewStats {
        self.stats.lock().clone()
    }

    fn overlay_state(&self) -> OverlayState {
        let auto_analyze = self.scheduler.settings().auto_analyze;
        match self.scheduler.engine().latest().result {
            Some(result) => OverlayState {
                confidence: result.confidence,
                risk: result.risk,
                explanation: result.explanation,
                auto_analyze,
            },
            None => OverlayState {
                auto_analyze,
                ..OverlayState::default()
            },
        }
    }

    /// One iteration: capture, render, publish, then offer the frame to the scheduler
    pub async fn step(&self) -> Result<TickDecision> {
        let loop_start = Instant::now();

        let prompt = self.scheduler.engine().prompt_store().load().await?;
        let frame = capture_async(Arc::clone(&self.camera), prompt.version).await?;
        let captured = loop_start.elapsed();

        let renderer = Arc::clone(&self.renderer);
        let state = self.overlay_state();
        let image = Arc::clone(&frame.image);
        let seconds = self.started_at.elapsed().as_secs_f64();
        let jpeg = tokio::task::spawn_blocking(move || renderer.render(image, &state, seconds))
            .await
            .map_err(|e| MonitorError::component("live_view", format!("Render task failed: {}", e)))??;
        let rendered = loop_start.elapsed();

        self.sender.send_replace(Some(LiveFrame {
            frame_id: frame.id.clone(),
            jpeg,
            analyzing: self.scheduler.is_busy(),
        }));

        let decision = self.scheduler.tick(Some(frame));
        match decision {
            TickDecision::Started => {
                info!("Triggered background analysis");
                self.stats.lock().record_run_started();
            }
            TickDecision::Busy => debug!("Skipping auto-analysis: already analyzing"),
            TickDecision::TooSoon => debug!("Skipping auto-analysis: too soon"),
            TickDecision::Disabled => {}
        }

        let total = loop_start.elapsed();
        let mut stats = self.stats.lock();
        stats.record_frame_render(total);
        if total > SLOW_LOOP {
            stats.record_slow_loop();
            warn!(
                "Slow frame loop: total={:.3}s capture={:.3}s render={:.3}s logic={:.3}s",
                total.as_secs_f64(),
                captured.as_secs_f64(),
                (rendered - captured).as_secs_f64(),
                (total - rendered).as_secs_f64()
            );
        }

        Ok(decision)
    }

    /// Loop until cancelled; errors are logged and retried after a short pause
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!("Live view started");

        while !cancel.is_cancelled() {
            let pause = match self.step().await {
                Ok(_) => LOOP_PAUSE,
                Err(e) => {
                    error!("Live view loop error: {}", e);
                    self.stats.lock().record_render_error();
                    ERROR_BACKOFF
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        info!("Live view stopped");
    }
}
