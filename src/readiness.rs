//! Startup and on-demand health probes for the camera and the model server.

use crate::camera::CameraSource;
use crate::inference::VisionClient;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const INFERENCE_CHECK_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentHealth {
    pub component: String,
    pub ok: bool,
    pub message: String,
}

impl ComponentHealth {
    fn new(component: &str, ok: bool, message: impl Into<String>) -> Self {
        Self {
            component: component.to_string(),
            ok,
            message: message.into(),
        }
    }
}

impl fmt::Display for ComponentHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} - {}",
            self.component,
            if self.ok { "OK" } else { "FAULT" },
            self.message
        )
    }
}

/// Probe the camera on the blocking pool
pub async fn check_camera(camera: Arc<dyn CameraSource>) -> ComponentHealth {
    match tokio::task::spawn_blocking(move || camera.health()).await {
        Ok(health) => {
            let message = if health.detail.is_empty() {
                if health.ok { "OK" } else { "Unavailable" }.to_string()
            } else {
                health.detail
            };
            ComponentHealth::new("camera", health.ok, message)
        }
        Err(e) => ComponentHealth::new("camera", false, e.to_string()),
    }
}

/// Confirm the model server is reachable and has the configured model
pub async fn check_inference(client: Arc<dyn VisionClient>) -> ComponentHealth {
    check_inference_within(client, INFERENCE_CHECK_TIMEOUT).await
}

async fn check_inference_within(client: Arc<dyn VisionClient>, limit: Duration) -> ComponentHealth {
    match tokio::time::timeout(limit, client.ensure_model()).await {
        Ok(Ok(())) => ComponentHealth::new("ollama", true, "OK"),
        Ok(Err(e)) => ComponentHealth::new("ollama", false, e.to_string()),
        Err(_) => ComponentHealth::new(
            "ollama",
            false,
            format!("No answer within {}s", limit.as_secs()),
        ),
    }
}

/// Run both probes and log the outcome
pub async fn run_all(
    camera: Arc<dyn CameraSource>,
    client: Arc<dyn VisionClient>,
) -> Vec<ComponentHealth> {
    let (camera, inference) = tokio::join!(check_camera(camera), check_inference(client));
    let report = vec![camera, inference];

    for health in &report {
        if health.ok {
            info!("Readiness {}", health);
        } else {
            warn!("Readiness {}", health);
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tests::{DummyCamera, ScriptedClient};
    use crate::error::ServiceError;
    use crate::inference::VisionResponse;
    use async_trait::async_trait;

    struct StalledClient;

    #[async_trait]
    impl VisionClient for StalledClient {
        async fn generate(
            &self,
            _system_prompt: &str,
            _user_prompt: &str,
            _image: Option<&[u8]>,
            _model: Option<&str>,
        ) -> Result<VisionResponse, ServiceError> {
            std::future::pending().await
        }

        async fn ensure_model(&self) -> Result<(), ServiceError> {
            std::future::pending().await
        }

        fn default_model(&self) -> &str {
            "stalled"
        }
    }

    struct MissingModelClient;

    #[async_trait]
    impl VisionClient for MissingModelClient {
        async fn generate(
            &self,
            _system_prompt: &str,
            _user_prompt: &str,
            _image: Option<&[u8]>,
            _model: Option<&str>,
        ) -> Result<VisionResponse, ServiceError> {
            Err(ServiceError::ModelMissing {
                model: "llava:13b".to_string(),
            })
        }

        async fn ensure_model(&self) -> Result<(), ServiceError> {
            Err(ServiceError::ModelMissing {
                model: "llava:13b".to_string(),
            })
        }

        fn default_model(&self) -> &str {
            "llava:13b"
        }
    }

    #[tokio::test]
    async fn test_camera_health_is_mapped() {
        let healthy = check_camera(Arc::new(DummyCamera::new())).await;
        assert!(healthy.ok);
        assert_eq!(healthy.component, "camera");

        let broken = check_camera(Arc::new(DummyCamera::failing())).await;
        assert!(!broken.ok);
        assert!(broken.to_string().starts_with("camera: FAULT"));
    }

    #[tokio::test]
    async fn test_inference_check_reports_missing_model() {
        let health = check_inference(Arc::new(MissingModelClient)).await;
        assert!(!health.ok);
        assert!(health.message.contains("ollama pull llava:13b"));

        let ok = check_inference(Arc::new(ScriptedClient::answering("x"))).await;
        assert!(ok.ok);
        assert_eq!(ok.message, "OK");
    }

    #[tokio::test]
    async fn test_inference_check_times_out() {
        let health = check_inference_within(Arc::new(StalledClient), Duration::from_millis(20)).await;
        assert!(!health.ok);
        assert!(health.message.starts_with("No answer within"));
    }

    #[tokio::test]
    async fn test_run_all_reports_both_components() {
        let report = run_all(
            Arc::new(DummyCamera::new()),
            Arc::new(ScriptedClient::answering("x")),
        )
        .await;
        let names: Vec<_> = report.iter().map(|h| h.component.as_str()).collect();
        assert_eq!(names, vec!["camera", "ollama"]);
    }
}
