//! Background analysis loop driven by the live view.
//!
//! At most one inference run is in flight at a time. A run in flight causes
//! further display ticks to be skipped rather than queued; manual runs wait
//! for it and then take their turn.

use crate::engine::{InferenceEngine, RunOutcome};
use crate::error::{MonitorError, Result};
use crate::events::{EventBus, MonitorEvent};
use crate::frame::FrameCapture;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Operator-adjustable knobs of the background loop
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisSettings {
    pub auto_analyze: bool,
    pub interval: Duration,
    pub scoring_model: String,
}

/// What a single tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickDecision {
    Started,
    Busy,
    TooSoon,
    Disabled,
}

/// Clears the busy flag and stamps the finish time however the run ends
struct RunGuard {
    busy: Arc<AtomicBool>,
    last_run_at: Arc<Mutex<Option<Instant>>>,
    idle: Arc<Notify>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        *self.last_run_at.lock() = Some(Instant::now());
        self.busy.store(false, Ordering::Release);
        self.idle.notify_waiters();
    }
}

pub struct AnalysisScheduler {
    engine: Arc<InferenceEngine>,
    event_bus: EventBus,
    settings: RwLock<AnalysisSettings>,
    busy: Arc<AtomicBool>,
    last_run_at: Arc<Mutex<Option<Instant>>>,
    idle: Arc<Notify>,
    in_flight: Mutex<Option<JoinHandle<()>>>,
}

impl AnalysisScheduler {
    pub fn new(engine: Arc<InferenceEngine>, event_bus: EventBus, settings: AnalysisSettings) -> Self {
        Self {
            engine,
            event_bus,
            settings: RwLock::new(settings),
            busy: Arc::new(AtomicBool::new(false)),
            last_run_at: Arc::new(Mutex::new(None)),
            idle: Arc::new(Notify::new()),
            in_flight: Mutex::new(None),
        }
    }

    pub fn engine(&self) -> Arc<InferenceEngine> {
        Arc::clone(&self.engine)
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn settings(&self) -> AnalysisSettings {
        self.settings.read().clone()
    }

    /// Replace the settings wholesale; an in-flight run is left alone
    pub fn update_settings(&self, settings: AnalysisSettings) -> Result<AnalysisSettings> {
        if settings.scoring_model.trim().is_empty() {
            return Err(MonitorError::validation("Scoring model must not be empty"));
        }

        *self.settings.write() = settings.clone();
        info!(
            "Analysis settings: auto={} interval={:.1}s model={}",
            settings.auto_analyze,
            settings.interval.as_secs_f64(),
            settings.scoring_model
        );
        self.event_bus.publish(MonitorEvent::SettingsChanged {
            auto_analyze: settings.auto_analyze,
            interval_seconds: settings.interval.as_secs_f64(),
            scoring_model: settings.scoring_model.clone(),
        });

        Ok(settings)
    }

    /// Flip auto-analysis and return the new value
    pub fn toggle_auto(&self) -> bool {
        let settings = {
            let mut settings = self.settings.write();
            settings.auto_analyze = !settings.auto_analyze;
            settings.clone()
        };
        info!("Auto-analysis {}", if settings.auto_analyze { "enabled" } else { "disabled" });
        self.event_bus.publish(MonitorEvent::SettingsChanged {
            auto_analyze: settings.auto_analyze,
            interval_seconds: settings.interval.as_secs_f64(),
            scoring_model: settings.scoring_model,
        });
        settings.auto_analyze
    }

    /// Decide whether to start a background run for this display tick
    pub fn tick(&self, frame: Option<FrameCapture>) -> TickDecision {
        let settings = self.settings();
        if !settings.auto_analyze {
            return TickDecision::Disabled;
        }

        if self.is_busy() {
            return TickDecision::Busy;
        }

        if let Some(last) = *self.last_run_at.lock() {
            if last.elapsed() <= settings.interval {
                return TickDecision::TooSoon;
            }
        }

        let Some(guard) = self.try_claim() else {
            return TickDecision::Busy;
        };
        let engine = Arc::clone(&self.engine);
        let event_bus = self.event_bus.clone();

        debug!("Starting background run with {}", settings.scoring_model);
        let handle = tokio::spawn(async move {
            let _guard = guard;
            let outcome = engine.run(&settings.scoring_model, frame).await;
            publish_outcome(&event_bus, &outcome);
        });
        *self.in_flight.lock() = Some(handle);

        TickDecision::Started
    }

    /// Run once now and wait for the verdict.
    ///
    /// Waits for any run already in flight, then holds the busy flag itself,
    /// so verdicts are published in the order runs started and the interval
    /// restarts from this run.
    pub async fn analyze_now(&self, frame: Option<FrameCapture>) -> Result<RunOutcome> {
        let _guard = self.claim().await;
        let model = self.settings.read().scoring_model.clone();
        debug!("Starting manual run with {}", model);
        let outcome = self.engine.run(&model, frame).await;
        publish_outcome(&self.event_bus, &outcome);
        outcome
    }

    fn try_claim(&self) -> Option<RunGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        Some(RunGuard {
            busy: Arc::clone(&self.busy),
            last_run_at: Arc::clone(&self.last_run_at),
            idle: Arc::clone(&self.idle),
        })
    }

    async fn claim(&self) -> RunGuard {
        loop {
            // Registered before the attempt so a release in between is not missed
            let released = self.idle.notified();
            if let Some(guard) = self.try_claim() {
                return guard;
            }
            debug!("Run in flight, manual run waiting");
            released.await;
        }
    }

    /// Wait for the in-flight background run, if any
    pub async fn wait_idle(&self) {
        let handle = self.in_flight.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Background run task panicked: {}", e);
            }
        }
    }
}

fn publish_outcome(event_bus: &EventBus, outcome: &Result<RunOutcome>) {
    match outcome {
        Ok(outcome) => {
            event_bus.publish(MonitorEvent::RunCompleted {
                frame_id: outcome.frame.id.clone(),
                risk: outcome.result.risk,
                latency_ms: outcome.result.latency_ms,
            });
        }
        Err(e) => {
            event_bus.publish(MonitorEvent::RunFailed {
                error: e.to_string(),
            });
        }
    }
}
