use crate::error::EventBusError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Events exchanged between the monitor's components
#[derive(Debug, Clone, Serialize)]
pub enum MonitorEvent {
    /// An inference run finished and its observation was published
    RunCompleted {
        frame_id: String,
        risk: bool,
        latency_ms: u64,
    },
    /// An inference run failed; the previous observation stands
    RunFailed { error: String },
    /// The risk prompt was replaced
    PromptUpdated { version: u64 },
    /// An operator acknowledged the current risk alert
    AlertAcknowledged { timestamp: DateTime<Utc> },
    /// Auto-analysis settings changed
    SettingsChanged {
        auto_analyze: bool,
        interval_seconds: f64,
        scoring_model: String,
    },
    /// Someone asked for an immediate run
    AnalyzeRequested { source: String },
    /// Someone asked to flip auto-analysis
    AutoAnalysisToggleRequested,
    /// Someone asked to acknowledge the current alert
    AcknowledgeRequested,
    /// A system error occurred in a component
    SystemError { component: String, error: String },
    /// System shutdown requested
    ShutdownRequested { reason: String },
}

impl MonitorEvent {
    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            MonitorEvent::RunCompleted {
                frame_id,
                risk,
                latency_ms,
            } => format!(
                "Run on frame {} completed in {}ms ({})",
                frame_id,
                latency_ms,
                if *risk { "risk" } else { "safe" }
            ),
            MonitorEvent::RunFailed { error } => format!("Run failed: {}", error),
            MonitorEvent::PromptUpdated { version } => format!("Prompt updated to v{}", version),
            MonitorEvent::AlertAcknowledged { .. } => "Alert acknowledged".to_string(),
            MonitorEvent::SettingsChanged {
                auto_analyze,
                interval_seconds,
                scoring_model,
            } => format!(
                "Settings updated: auto={} interval={}s model={}",
                auto_analyze, interval_seconds, scoring_model
            ),
            MonitorEvent::AnalyzeRequested { source } => {
                format!("Analysis requested by {}", source)
            }
            MonitorEvent::AutoAnalysisToggleRequested => {
                "Auto-analysis toggle requested".to_string()
            }
            MonitorEvent::AcknowledgeRequested => "Acknowledge requested".to_string(),
            MonitorEvent::SystemError { component, error } => {
                format!("Error in {}: {}", component, error)
            }
            MonitorEvent::ShutdownRequested { reason } => {
                format!("Shutdown requested: {}", reason)
            }
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            MonitorEvent::RunCompleted { .. } => "run_completed",
            MonitorEvent::RunFailed { .. } => "run_failed",
            MonitorEvent::PromptUpdated { .. } => "prompt_updated",
            MonitorEvent::AlertAcknowledged { .. } => "alert_acknowledged",
            MonitorEvent::SettingsChanged { .. } => "settings_changed",
            MonitorEvent::AnalyzeRequested { .. } => "analyze_requested",
            MonitorEvent::AutoAnalysisToggleRequested => "auto_analysis_toggle_requested",
            MonitorEvent::AcknowledgeRequested => "acknowledge_requested",
            MonitorEvent::SystemError { .. } => "system_error",
            MonitorEvent::ShutdownRequested { .. } => "shutdown_requested",
        }
    }
}

/// Async event bus for component coordination using broadcast channels
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<MonitorEvent>,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to events and get a receiver
    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.sender.subscribe()
    }

    /// Publish an event; returns how many subscribers saw it
    pub fn publish(&self, event: MonitorEvent) -> usize {
        match &event {
            MonitorEvent::RunFailed { error } => warn!("Inference run failed: {}", error),
            MonitorEvent::SystemError { component, error } => {
                warn!("System error in {}: {}", component, error)
            }
            MonitorEvent::ShutdownRequested { reason } => info!("Shutdown requested: {}", reason),
            _ => debug!("Event: {}", event.description()),
        }

        // No receivers is not an error: nobody is listening yet
        self.sender.send(event).unwrap_or(0)
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Event filter for selective event handling
#[derive(Debug, Clone)]
pub enum EventFilter {
    /// Accept all events
    All,
    /// Accept only specific event types
    EventTypes(Vec<&'static str>),
}

impl EventFilter {
    /// Check if an event passes this filter
    pub fn matches(&self, event: &MonitorEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::EventTypes(types) => types.contains(&event.event_type()),
        }
    }
}

/// Event receiver with filtering
pub struct EventReceiver {
    receiver: broadcast::Receiver<MonitorEvent>,
    filter: EventFilter,
    name: String,
}

impl EventReceiver {
    pub fn new(bus: &EventBus, filter: EventFilter, name: &str) -> Self {
        Self {
            receiver: bus.subscribe(),
            filter,
            name: name.to_string(),
        }
    }

    /// Receive the next event that passes the filter; lagging is logged and skipped
    pub async fn recv(&mut self) -> Result<MonitorEvent, EventBusError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        debug!(
                            "Receiver '{}' received event: {}",
                            self.name,
                            event.description()
                        );
                        return Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed for receiver '{}'", self.name);
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }
}
