use super::{ComponentState, MonitorOrchestrator, ShutdownReason};
use crate::error::{MonitorError, Result};
use crate::events::{EventBus, EventFilter, EventReceiver, MonitorEvent};
use crate::http::{MonitorServer, ServerState};
use crate::readiness;
use crate::scheduler::AnalysisScheduler;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const CONTROL_EVENTS: [&str; 4] = [
    "analyze_requested",
    "auto_analysis_toggle_requested",
    "acknowledge_requested",
    "shutdown_requested",
];

impl MonitorOrchestrator {
    /// Register components, materialize the prompt and probe the hardware
    pub async fn initialize(&mut self) -> Result<()> {
        info!("Initializing monitor components");

        for component in [
            "camera",
            "inference",
            "analysis",
            "control",
            "live_view",
            "http_server",
            "recorder",
        ] {
            self.set_component_state(component, ComponentState::Stopped);
        }
        if self.keyboard_enabled {
            self.set_component_state("keyboard", ComponentState::Stopped);
        }

        let engine = self.scheduler.engine();
        let prompt = engine.prompt_store().load().await?;
        info!(
            "Risk prompt v{} loaded from {}",
            prompt.version,
            engine.prompt_store().path().display()
        );

        let report = readiness::run_all(engine.camera(), engine.client()).await;
        for health in report {
            if health.ok {
                continue;
            }
            match health.component.as_str() {
                "camera" => {
                    self.set_component_state("camera", ComponentState::Failed);
                    return Err(MonitorError::component("camera", health.message));
                }
                // The model server may come up later; runs fail until it does
                _ => {
                    self.set_component_state("inference", ComponentState::Failed);
                    warn!("Starting without a ready model server: {}", health.message);
                }
            }
        }

        info!("All components initialized");
        Ok(())
    }

    /// Start the background tasks
    pub async fn start(&mut self) -> Result<()> {
        info!("Starting cribwatch");

        self.set_component_state("camera", ComponentState::Running);
        if self.component_state("inference") != Some(ComponentState::Failed) {
            self.set_component_state("inference", ComponentState::Running);
        }
        self.set_component_state("recorder", ComponentState::Running);
        self.set_component_state("analysis", ComponentState::Running);

        // Control events
        self.set_component_state("control", ComponentState::Starting);
        let receiver = EventReceiver::new(
            &self.event_bus,
            EventFilter::EventTypes(CONTROL_EVENTS.to_vec()),
            "control",
        );
        let control = tokio::spawn(control_loop(
            receiver,
            Arc::clone(&self.scheduler),
            self.event_bus.clone(),
            Arc::clone(&self.shutdown_sender),
            self.cancellation_token.child_token(),
        ));
        self.tasks.insert("control", control);
        self.set_component_state("control", ComponentState::Running);

        // Live view
        self.set_component_state("live_view", ComponentState::Starting);
        let live_view = Arc::clone(&self.live_view);
        let live_task = tokio::spawn(live_view.run(self.cancellation_token.child_token()));
        self.tasks.insert("live_view", live_task);
        self.set_component_state("live_view", ComponentState::Running);

        // HTTP surface
        self.set_component_state("http_server", ComponentState::Starting);
        let server = MonitorServer::new(
            self.config.server.clone(),
            ServerState::new(
                Arc::clone(&self.scheduler),
                Arc::clone(&self.live_view),
                Arc::clone(&self.qa),
                self.event_bus.clone(),
                self.config.camera.fps,
            ),
        );
        let server_token = self.cancellation_token.child_token();
        let states = Arc::clone(&self.component_states);
        let shutdown_sender = Arc::clone(&self.shutdown_sender);
        let http_task = tokio::spawn(async move {
            if let Err(e) = server.run(server_token).await {
                error!("HTTP server error: {}", e);
                states
                    .lock()
                    .insert("http_server".to_string(), ComponentState::Failed);
                if let Some(sender) = shutdown_sender.lock().take() {
                    let _ = sender.send(ShutdownReason::Error(e.to_string()));
                }
            }
        });
        self.tasks.insert("http_server", http_task);
        self.set_component_state("http_server", ComponentState::Running);

        // Keyboard controls
        if self.keyboard_enabled {
            if let Some(keyboard) = &self.keyboard_handler {
                self.set_component_state("keyboard", ComponentState::Starting);
                match keyboard.start().await {
                    Ok(()) => self.set_component_state("keyboard", ComponentState::Running),
                    Err(e) => {
                        error!("Failed to start keyboard input handler: {}", e);
                        self.set_component_state("keyboard", ComponentState::Failed);
                    }
                }
            }
        }

        info!("cribwatch started");
        Ok(())
    }
}

/// Turns operator requests from the event bus into scheduler and engine calls
async fn control_loop(
    mut receiver: EventReceiver,
    scheduler: Arc<AnalysisScheduler>,
    event_bus: EventBus,
    shutdown_sender: Arc<Mutex<Option<oneshot::Sender<ShutdownReason>>>>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = receiver.recv() => event,
        };

        let event = match event {
            Ok(event) => event,
            Err(e) => {
                debug!("Control loop stopping: {}", e);
                break;
            }
        };

        match event {
            MonitorEvent::AnalyzeRequested { source } => {
                info!("Manual analysis requested via {}", source);
                let scheduler = Arc::clone(&scheduler);
                tokio::spawn(async move {
                    if let Err(e) = scheduler.analyze_now(None).await {
                        debug!("Manual analysis failed: {}", e);
                    }
                });
            }
            MonitorEvent::AutoAnalysisToggleRequested => {
                let enabled = scheduler.toggle_auto();
                info!("Auto-analysis {}", if enabled { "enabled" } else { "disabled" });
            }
            MonitorEvent::AcknowledgeRequested => {
                let alert = scheduler.engine().acknowledge();
                if let Some(timestamp) = alert.acknowledged_at {
                    event_bus.publish(MonitorEvent::AlertAcknowledged { timestamp });
                }
            }
            MonitorEvent::ShutdownRequested { reason } => {
                if let Some(sender) = shutdown_sender.lock().take() {
                    let _ = sender.send(ShutdownReason::UserRequest(reason));
                }
                break;
            }
            other => debug!("Control loop ignoring {}", other.description()),
        }
    }

    debug!("Control loop exited");
}
