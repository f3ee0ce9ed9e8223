use super::{ComponentState, MonitorOrchestrator};
use crate::error::Result;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{error, info, warn};

const TASK_STOP_TIMEOUT: Duration = Duration::from_secs(5);
const KEYBOARD_STOP_TIMEOUT: Duration = Duration::from_secs(2);
const RECORDER_DRAIN: Duration = Duration::from_millis(500);

impl MonitorOrchestrator {
    /// Stop components in reverse start order; returns the exit code
    pub async fn shutdown(&mut self) -> Result<i32> {
        info!("Beginning graceful shutdown");
        self.cancellation_token.cancel();

        let mut clean = true;

        if self.keyboard_enabled {
            if let Some(keyboard) = &self.keyboard_handler {
                let stopped = self
                    .stop_with("keyboard", KEYBOARD_STOP_TIMEOUT, async {
                        keyboard.stop().await.is_ok()
                    })
                    .await;
                clean &= stopped;
            }
        }

        for component in ["http_server", "live_view", "control"] {
            let handle = self.tasks.remove(component);
            clean &= self.stop_task(component, handle).await;
        }

        // A background run may be waiting on the model server
        let scheduler = self.scheduler();
        let analysis_limit =
            Duration::from_secs(self.config.inference.timeout_seconds) + TASK_STOP_TIMEOUT;
        clean &= self
            .stop_with("analysis", analysis_limit, async {
                scheduler.wait_idle().await;
                true
            })
            .await;

        if let Some(mut task) = self.recorder_task.take() {
            self.set_component_state("recorder", ComponentState::Stopping);
            if timeout(RECORDER_DRAIN, &mut task).await.is_err() {
                task.abort();
            }
            self.set_component_state("recorder", ComponentState::Stopped);
        }

        self.set_component_state("camera", ComponentState::Stopped);
        self.set_component_state("inference", ComponentState::Stopped);

        let exit_code = if clean { 0 } else { 1 };
        info!("Graceful shutdown completed with exit code {}", exit_code);
        Ok(exit_code)
    }

    async fn stop_task(&self, component: &str, handle: Option<JoinHandle<()>>) -> bool {
        let Some(mut handle) = handle else {
            self.set_component_state(component, ComponentState::Stopped);
            return true;
        };

        let stopped = self
            .stop_with(component, TASK_STOP_TIMEOUT, async {
                match (&mut handle).await {
                    Ok(()) => true,
                    Err(e) => {
                        error!("{} task panicked: {}", component, e);
                        false
                    }
                }
            })
            .await;

        if !handle.is_finished() {
            handle.abort();
        }
        stopped
    }

    /// Drive `stop` under `limit`, tracking the component's state
    async fn stop_with<F>(&self, component: &str, limit: Duration, stop: F) -> bool
    where
        F: Future<Output = bool>,
    {
        info!("Stopping {}", component);
        if self.component_state(component) == Some(ComponentState::Failed) {
            warn!("{} had already failed", component);
        }
        self.set_component_state(component, ComponentState::Stopping);

        match timeout(limit, stop).await {
            Ok(true) => {
                self.set_component_state(component, ComponentState::Stopped);
                info!("{} stopped", component);
                true
            }
            Ok(false) => {
                self.set_component_state(component, ComponentState::Failed);
                error!("Error stopping {}", component);
                false
            }
            Err(_) => {
                self.set_component_state(component, ComponentState::Failed);
                error!("Timed out stopping {} after {:?}", component, limit);
                false
            }
        }
    }
}
