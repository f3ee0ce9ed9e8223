use super::types::{ComponentState, ShutdownReason};
use crate::camera::{select_camera, CameraSource};
use crate::config::MonitorConfig;
use crate::display::LiveView;
use crate::engine::InferenceEngine;
use crate::error::Result;
use crate::events::EventBus;
use crate::inference::{OllamaClient, VisionClient};
use crate::keyboard_input::KeyboardInputHandler;
use crate::overlay::OverlayRenderer;
use crate::prompts::PromptStore;
use crate::qa::QaTester;
use crate::recorder::InteractionRecorder;
use crate::scheduler::{AnalysisScheduler, AnalysisSettings};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Owns every long-lived component and drives start, run and shutdown
pub struct MonitorOrchestrator {
    pub(super) config: MonitorConfig,
    pub(super) event_bus: EventBus,

    // Components
    pub(super) scheduler: Arc<AnalysisScheduler>,
    pub(super) live_view: Arc<LiveView>,
    pub(super) qa: Arc<QaTester>,
    pub(super) keyboard_handler: Option<KeyboardInputHandler>,
    pub(super) keyboard_enabled: bool,
    pub(super) recorder_task: Option<JoinHandle<()>>,
    pub(super) tasks: HashMap<&'static str, JoinHandle<()>>,

    // Lifecycle management
    pub(super) component_states: Arc<Mutex<HashMap<String, ComponentState>>>,
    pub(super) shutdown_sender: Arc<Mutex<Option<oneshot::Sender<ShutdownReason>>>>,
    pub(super) shutdown_receiver: Option<oneshot::Receiver<ShutdownReason>>,
    pub(super) cancellation_token: CancellationToken,
}

impl MonitorOrchestrator {
    /// Build the configured camera and Ollama client, then wire everything up
    pub async fn new(config: MonitorConfig) -> Result<Self> {
        let camera = select_camera(&config.camera);
        let client: Arc<dyn VisionClient> = Arc::new(OllamaClient::from_config(&config.inference));
        Self::with_components(config, camera, client).await
    }

    /// Wire the application around the given camera and vision client
    pub async fn with_components(
        config: MonitorConfig,
        camera: Arc<dyn CameraSource>,
        client: Arc<dyn VisionClient>,
    ) -> Result<Self> {
        let event_bus = EventBus::new(config.system.event_bus_capacity);
        let (recorder, recorder_task) = InteractionRecorder::spawn(
            config.log_directory(),
            config.logging.recorder_capacity,
        );

        let prompt_store = Arc::new(PromptStore::new(&config.prompt.path));
        let engine = Arc::new(InferenceEngine::new(
            Arc::clone(&camera),
            prompt_store,
            Arc::clone(&client),
            recorder,
        ));

        let scheduler = Arc::new(AnalysisScheduler::new(
            engine,
            event_bus.clone(),
            AnalysisSettings {
                auto_analyze: config.analysis.auto_analyze,
                interval: config.analysis_interval(),
                scoring_model: config.inference.scoring_model.clone(),
            },
        ));

        let renderer = OverlayRenderer::new(
            config.analysis.risk_threshold,
            &config.analysis.font_path,
        );
        let live_view = Arc::new(LiveView::new(camera, Arc::clone(&scheduler), renderer));

        let qa = Arc::new(QaTester::new(
            client,
            Duration::from_millis(config.qa.min_interval_ms),
        ));

        let keyboard_handler = Some(KeyboardInputHandler::new(event_bus.clone()));
        let (shutdown_sender, shutdown_receiver) = oneshot::channel();

        info!(
            "Monitor wired: scoring model {}, prompt at {}",
            config.inference.scoring_model, config.prompt.path
        );

        Ok(Self {
            config,
            event_bus,
            scheduler,
            live_view,
            qa,
            keyboard_handler,
            keyboard_enabled: false,
            recorder_task: Some(recorder_task),
            tasks: HashMap::new(),
            component_states: Arc::new(Mutex::new(HashMap::new())),
            shutdown_sender: Arc::new(Mutex::new(Some(shutdown_sender))),
            shutdown_receiver: Some(shutdown_receiver),
            cancellation_token: CancellationToken::new(),
        })
    }

    /// Enable or disable the keyboard input handler
    pub fn set_keyboard_enabled(&mut self, enabled: bool) {
        self.keyboard_enabled = enabled;
    }

    pub fn event_bus(&self) -> EventBus {
        self.event_bus.clone()
    }

    pub fn scheduler(&self) -> Arc<AnalysisScheduler> {
        Arc::clone(&self.scheduler)
    }

    pub fn live_view(&self) -> Arc<LiveView> {
        Arc::clone(&self.live_view)
    }
}
