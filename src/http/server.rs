use crate::{
    config::ServerConfig,
    display::LiveView,
    error::{MonitorError, Result},
    events::EventBus,
    qa::QaTester,
    scheduler::AnalysisScheduler,
};
use axum::{
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use super::handlers::{
    acknowledge_handler, analyze_handler, get_prompt_handler, health_handler, index_handler,
    mjpeg_stream_handler, prompt_history_handler, qa_handler, settings_handler, status_handler,
    update_prompt_handler,
};

/// Shared state for the Axum server
#[derive(Clone)]
pub struct ServerState {
    pub(crate) scheduler: Arc<AnalysisScheduler>,
    pub(crate) live_view: Arc<LiveView>,
    pub(crate) qa: Arc<QaTester>,
    pub(crate) event_bus: EventBus,
    pub(crate) frame_interval: Duration,
}

impl ServerState {
    pub fn new(
        scheduler: Arc<AnalysisScheduler>,
        live_view: Arc<LiveView>,
        qa: Arc<QaTester>,
        event_bus: EventBus,
        target_fps: u32,
    ) -> Self {
        Self {
            scheduler,
            live_view,
            qa,
            event_bus,
            frame_interval: Duration::from_micros(1_000_000u64 / target_fps.max(1) as u64),
        }
    }
}

/// Routes of the operator surface
pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/stream.mjpg", get(mjpeg_stream_handler))
        .route("/health", get(health_handler))
        .route("/api/status", get(status_handler))
        .route("/api/analyze", post(analyze_handler))
        .route("/api/prompt", get(get_prompt_handler).put(update_prompt_handler))
        .route("/api/prompt/history", get(prompt_history_handler))
        .route("/api/acknowledge", post(acknowledge_handler))
        .route("/api/settings", put(settings_handler))
        .route("/api/qa", post(qa_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// HTTP server for the live view, controls and JSON API
pub struct MonitorServer {
    pub(crate) config: ServerConfig,
    state: ServerState,
}

impl MonitorServer {
    pub fn new(config: ServerConfig, state: ServerState) -> Self {
        Self { config, state }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.config.ip, self.config.port)
    }

    /// Bind and serve until `cancel` fires
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let addr = self.address();
        info!("Starting HTTP server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
            MonitorError::component("http_server", format!("Failed to bind {}: {}", addr, e))
        })?;

        info!("Live view available at http://{}/", addr);

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await
            .map_err(|e| MonitorError::component("http_server", format!("Server error: {}", e)))?;

        info!("HTTP server stopped");
        Ok(())
    }
}
