//! One inference cycle: prompt → frame → model → verdict → published observation.

use crate::camera::{capture_async, CameraSource};
use crate::classifier::classify;
use crate::error::Result;
use crate::frame::{FrameCapture, FrameStatus};
use crate::inference::VisionClient;
use crate::prompts::PromptStore;
use crate::recorder::{InteractionRecorder, Record};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

const SYSTEM_PROMPT: &str = "You are a risk assessment engine. \
Analyze the image against the Risk Criteria. \
Answer ONLY 'YES' if the image matches the risk criteria, or 'NO' if it does not. \
Then provide a brief explanation.";

const STAGE: &str = "1-Stage Vision";

pub fn user_prompt(criteria: &str) -> String {
    format!(
        "Risk Criteria: {}\n\nDoes this image match the risk criteria? Start with YES or NO.",
        criteria
    )
}

/// Alert level shown to operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Monitoring,
    /// Display-only; set while a background run is in flight, never stored
    Analyzing,
    Risk,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertState {
    pub state: AlertLevel,
    pub active_frame_id: Option<String>,
    pub message: String,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub timestamp: DateTime<Utc>,
}

impl AlertState {
    fn initial() -> Self {
        Self {
            state: AlertLevel::Monitoring,
            active_frame_id: None,
            message: "Monitoring".to_string(),
            acknowledged_at: None,
            timestamp: Utc::now(),
        }
    }

    fn from_verdict(risk: bool, frame: &FrameCapture) -> Self {
        Self {
            state: if risk {
                AlertLevel::Risk
            } else {
                AlertLevel::Monitoring
            },
            active_frame_id: Some(frame.id.clone()),
            message: if risk { "Risk detected" } else { "Safe" }.to_string(),
            acknowledged_at: None,
            timestamp: frame.timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InferenceResult {
    pub frame_id: String,
    pub model: String,
    pub latency_ms: u64,
    pub risk: bool,
    pub confidence: f32,
    pub explanation: String,
}

/// Latest frame, result and alert, always replaced together
#[derive(Debug, Clone)]
pub struct Observation {
    pub frame: Option<Arc<FrameCapture>>,
    pub result: Option<InferenceResult>,
    pub alert: AlertState,
}

/// Everything a completed run produced
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub frame: Arc<FrameCapture>,
    pub result: InferenceResult,
    pub alert: AlertState,
}

pub struct InferenceEngine {
    camera: Arc<dyn CameraSource>,
    prompt_store: Arc<PromptStore>,
    client: Arc<dyn VisionClient>,
    recorder: InteractionRecorder,
    observation: RwLock<Observation>,
}

impl InferenceEngine {
    pub fn new(
        camera: Arc<dyn CameraSource>,
        prompt_store: Arc<PromptStore>,
        client: Arc<dyn VisionClient>,
        recorder: InteractionRecorder,
    ) -> Self {
        Self {
            camera,
            prompt_store,
            client,
            recorder,
            observation: RwLock::new(Observation {
                frame: None,
                result: None,
                alert: AlertState::initial(),
            }),
        }
    }

    pub fn camera(&self) -> Arc<dyn CameraSource> {
        Arc::clone(&self.camera)
    }

    pub fn client(&self) -> Arc<dyn VisionClient> {
        Arc::clone(&self.client)
    }

    pub fn prompt_store(&self) -> Arc<PromptStore> {
        Arc::clone(&self.prompt_store)
    }

    /// Run one cycle, capturing a frame unless one is supplied.
    ///
    /// On error nothing is published and the previous observation stands.
    /// Failures come back as:
    /// - `MonitorError::Capture` when no frame could be taken
    /// - `MonitorError::Service` when the model call fails
    /// - `MonitorError::Io`, `Json` or `Validation` when the prompt can't be read
    ///
    /// `MonitorError::is_upstream` is true for the first two only.
    pub async fn run(&self, scoring_model: &str, frame: Option<FrameCapture>) -> Result<RunOutcome> {
        let start = Instant::now();

        let prompt = self.prompt_store.load().await?;
        let frame = match frame {
            Some(frame) => frame,
            None => capture_async(Arc::clone(&self.camera), prompt.version).await?,
        };
        debug!(
            "Running inference on frame {} against prompt v{}",
            frame.id, prompt.version
        );

        self.recorder.record(Record::SessionStart);

        let user_prompt = user_prompt(&prompt.text);
        let response = self
            .client
            .generate(
                SYSTEM_PROMPT,
                &user_prompt,
                Some(frame.image.as_slice()),
                Some(scoring_model),
            )
            .await?;

        self.recorder.record(Record::Interaction {
            stage: STAGE.to_string(),
            model: scoring_model.to_string(),
            system_prompt: SYSTEM_PROMPT.to_string(),
            user_prompt,
            output: response.text.clone(),
        });
        self.recorder.record(Record::Snapshot {
            image: Arc::clone(&frame.image),
        });

        let risk = classify(&response.text);
        let frame = Arc::new(frame.with_status(FrameStatus::Analyzed));

        let result = InferenceResult {
            frame_id: frame.id.clone(),
            model: scoring_model.to_string(),
            latency_ms: start.elapsed().as_millis() as u64,
            risk,
            confidence: if risk { 1.0 } else { 0.0 },
            explanation: response.text,
        };
        let alert = AlertState::from_verdict(risk, &frame);

        info!(
            "frame={} risk={} conf={:.2} latency={}ms",
            result.frame_id, result.risk, result.confidence, result.latency_ms
        );

        *self.observation.write() = Observation {
            frame: Some(Arc::clone(&frame)),
            result: Some(result.clone()),
            alert: alert.clone(),
        };

        Ok(RunOutcome {
            frame,
            result,
            alert,
        })
    }

    /// Mark an active risk alert as seen; the next run recomputes state anyway
    pub fn acknowledge(&self) -> AlertState {
        let mut observation = self.observation.write();
        if observation.alert.state == AlertLevel::Risk {
            observation.alert.acknowledged_at = Some(Utc::now());
            observation.alert.message = "Risk acknowledged".to_string();
            info!(
                "Risk alert acknowledged for frame {}",
                observation.alert.active_frame_id.as_deref().unwrap_or("-")
            );
        }
        observation.alert.clone()
    }

    pub fn latest(&self) -> Observation {
        self.observation.read().clone()
    }

    pub fn alert(&self) -> AlertState {
        self.observation.read().alert.clone()
    }

    pub fn last_frame(&self) -> Option<Arc<FrameCapture>> {
        self.observation.read().frame.clone()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::camera::CameraHealth;
    use crate::error::{CaptureError, MonitorError, ServiceError};
    use crate::inference::VisionResponse;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    pub(crate) struct DummyCamera {
        captures: AtomicUsize,
        fail: bool,
    }

    impl DummyCamera {
        pub(crate) fn new() -> Self {
            Self {
                captures: AtomicUsize::new(0),
                fail: false,
            }
        }

        pub(crate) fn failing() -> Self {
            Self {
                captures: AtomicUsize::new(0),
                fail: true,
            }
        }
    }

    impl CameraSource for DummyCamera {
        fn capture_frame(&self, prompt_version: u64) -> std::result::Result<FrameCapture, CaptureError> {
            if self.fail {
                return Err(CaptureError::Read {
                    device: "dummy".to_string(),
                    details: "unplugged".to_string(),
                });
            }
            self.captures.fetch_add(1, Ordering::SeqCst);
            Ok(FrameCapture::new("dummy", vec![0xFF, 0xD8, 0xFF, 0xD9], prompt_version))
        }

        fn health(&self) -> CameraHealth {
            CameraHealth {
                ok: !self.fail,
                detail: "dummy".to_string(),
            }
        }

        fn source_name(&self) -> String {
            "dummy".to_string()
        }
    }

    /// Replies with a fixed answer, or fails when the answer is `None`
    pub(crate) struct ScriptedClient {
        pub(crate) answer: Mutex<Option<String>>,
        pub(crate) calls: AtomicUsize,
        pub(crate) last_user_prompt: Mutex<Option<String>>,
        pub(crate) last_model: Mutex<Option<String>>,
    }

    impl ScriptedClient {
        pub(crate) fn answering(text: &str) -> Self {
            Self {
                answer: Mutex::new(Some(text.to_string())),
                calls: AtomicUsize::new(0),
                last_user_prompt: Mutex::new(None),
                last_model: Mutex::new(None),
            }
        }

        pub(crate) fn failing() -> Self {
            Self {
                answer: Mutex::new(None),
                calls: AtomicUsize::new(0),
                last_user_prompt: Mutex::new(None),
                last_model: Mutex::new(None),
            }
        }

        pub(crate) fn set_answer(&self, text: Option<&str>) {
            *self.answer.lock() = text.map(str::to_string);
        }
    }

    #[async_trait]
    impl VisionClient for ScriptedClient {
        async fn generate(
            &self,
            _system_prompt: &str,
            user_prompt: &str,
            _image: Option<&[u8]>,
            model: Option<&str>,
        ) -> std::result::Result<VisionResponse, ServiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_user_prompt.lock() = Some(user_prompt.to_string());
            *self.last_model.lock() = model.map(str::to_string);

            let answer = self.answer.lock().clone();
            match answer {
                Some(text) => Ok(VisionResponse {
                    text,
                    model: model.unwrap_or("dummy").to_string(),
                    latency_ms: 100,
                    confidence: 0.5,
                    risk: false,
                }),
                None => Err(ServiceError::Status {
                    url: "http://dummy/api/chat".to_string(),
                    status: 503,
                }),
            }
        }

        async fn ensure_model(&self) -> std::result::Result<(), ServiceError> {
            Ok(())
        }

        fn default_model(&self) -> &str {
            "dummy"
        }
    }

    pub(crate) fn engine_with(
        dir: &TempDir,
        camera: Arc<dyn CameraSource>,
        client: Arc<dyn VisionClient>,
    ) -> InferenceEngine {
        let store = Arc::new(PromptStore::new(dir.path().join("risk_prompt.json")));
        InferenceEngine::new(camera, store, client, InteractionRecorder::disabled())
    }

    #[tokio::test]
    async fn test_engine_transitions_to_risk_state() {
        let dir = TempDir::new().unwrap();
        let engine = engine_with(
            &dir,
            Arc::new(DummyCamera::new()),
            Arc::new(ScriptedClient::answering("YES, the baby is out of frame.")),
        );

        let outcome = engine.run("minicpm-v:8b", None).await.unwrap();

        assert!(outcome.result.risk);
        assert_eq!(outcome.result.confidence, 1.0);
        assert_eq!(outcome.result.model, "minicpm-v:8b");
        assert_eq!(outcome.result.explanation, "YES, the baby is out of frame.");
        assert_eq!(outcome.alert.state, AlertLevel::Risk);
        assert_eq!(outcome.alert.message, "Risk detected");
        assert_eq!(outcome.alert.active_frame_id.as_deref(), Some(outcome.frame.id.as_str()));
        assert_eq!(outcome.alert.timestamp, outcome.frame.timestamp);
        assert_eq!(outcome.frame.status, FrameStatus::Analyzed);
        assert_eq!(engine.alert().state, AlertLevel::Risk);
    }

    #[tokio::test]
    async fn test_engine_reports_monitoring_on_no() {
        let dir = TempDir::new().unwrap();
        let engine = engine_with(
            &dir,
            Arc::new(DummyCamera::new()),
            Arc::new(ScriptedClient::answering("NO. The baby is asleep.")),
        );

        let outcome = engine.run("minicpm-v:8b", None).await.unwrap();

        assert!(!outcome.result.risk);
        assert_eq!(outcome.result.confidence, 0.0);
        assert_eq!(outcome.alert.state, AlertLevel::Monitoring);
        assert_eq!(outcome.alert.message, "Safe");
    }

    #[tokio::test]
    async fn test_prompt_text_and_version_flow_into_run() {
        let dir = TempDir::new().unwrap();
        let client = Arc::new(ScriptedClient::answering("no"));
        let engine = engine_with(&dir, Arc::new(DummyCamera::new()), client.clone());
        engine
            .prompt_store()
            .update("Baby standing in the crib", None)
            .await
            .unwrap();

        let outcome = engine.run("llava:7b", None).await.unwrap();

        assert_eq!(outcome.frame.prompt_version, 2);
        let prompt = client.last_user_prompt.lock().clone().unwrap();
        assert!(prompt.starts_with("Risk Criteria: Baby standing in the crib\n\n"));
        assert!(prompt.ends_with("Start with YES or NO."));
        assert_eq!(client.last_model.lock().as_deref(), Some("llava:7b"));
    }

    #[tokio::test]
    async fn test_supplied_frame_skips_capture() {
        let dir = TempDir::new().unwrap();
        let camera = Arc::new(DummyCamera::new());
        let engine = engine_with(
            &dir,
            camera.clone(),
            Arc::new(ScriptedClient::answering("no")),
        );
        let frame = FrameCapture::new("live-view", vec![1, 2, 3], 1);
        let frame_id = frame.id.clone();

        let outcome = engine.run("m", Some(frame)).await.unwrap();

        assert_eq!(outcome.result.frame_id, frame_id);
        assert_eq!(camera.captures.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_run_keeps_previous_alert() {
        let dir = TempDir::new().unwrap();
        let client = Arc::new(ScriptedClient::answering("YES"));
        let engine = engine_with(&dir, Arc::new(DummyCamera::new()), client.clone());

        let first = engine.run("m", None).await.unwrap();
        client.set_answer(None);

        let err = engine.run("m", None).await.unwrap_err();
        assert!(matches!(err, MonitorError::Service(_)));
        assert!(err.is_upstream());

        let latest = engine.latest();
        assert_eq!(latest.alert, first.alert);
        assert_eq!(latest.result.as_ref(), Some(&first.result));
        assert_eq!(latest.frame.unwrap().id, first.frame.id);
    }

    #[tokio::test]
    async fn test_capture_failure_is_a_run_failure() {
        let dir = TempDir::new().unwrap();
        let client = Arc::new(ScriptedClient::answering("YES"));
        let engine = engine_with(&dir, Arc::new(DummyCamera::failing()), client.clone());

        let err = engine.run("m", None).await.unwrap_err();

        assert!(matches!(err, MonitorError::Capture(_)));
        assert!(err.is_upstream());
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
        assert_eq!(engine.alert().state, AlertLevel::Monitoring);
        assert!(engine.latest().result.is_none());
    }

    #[tokio::test]
    async fn test_unreadable_prompt_is_not_upstream() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("risk_prompt.json"), b"{ not json").unwrap();
        let client = Arc::new(ScriptedClient::answering("YES"));
        let engine = engine_with(&dir, Arc::new(DummyCamera::new()), client.clone());

        let err = engine.run("m", None).await.unwrap_err();

        assert!(matches!(err, MonitorError::Json(_)));
        assert!(!err.is_upstream());
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_acknowledge_is_a_one_cycle_hint() {
        let dir = TempDir::new().unwrap();
        let client = Arc::new(ScriptedClient::answering("YES"));
        let engine = engine_with(&dir, Arc::new(DummyCamera::new()), client.clone());

        // Nothing to acknowledge while monitoring
        let idle = engine.acknowledge();
        assert!(idle.acknowledged_at.is_none());

        engine.run("m", None).await.unwrap();
        let acked = engine.acknowledge();
        assert_eq!(acked.state, AlertLevel::Risk);
        assert!(acked.acknowledged_at.is_some());
        assert_eq!(acked.message, "Risk acknowledged");

        client.set_answer(Some("NO"));
        engine.run("m", None).await.unwrap();
        let alert = engine.alert();
        assert_eq!(alert.state, AlertLevel::Monitoring);
        assert!(alert.acknowledged_at.is_none());

        client.set_answer(Some("YES"));
        engine.run("m", None).await.unwrap();
        assert!(engine.alert().acknowledged_at.is_none());
    }

    #[tokio::test]
    async fn test_run_writes_transcript_and_snapshot() {
        let dir = TempDir::new().unwrap();
        let (recorder, task) = InteractionRecorder::spawn(dir.path().join("temp"), 16);
        let engine = InferenceEngine::new(
            Arc::new(DummyCamera::new()),
            Arc::new(PromptStore::new(dir.path().join("risk_prompt.json"))),
            Arc::new(ScriptedClient::answering("NO, all clear")),
            recorder.clone(),
        );

        engine.run("m", None).await.unwrap();
        drop(engine);
        let transcript = recorder.transcript_path();
        let snapshot = recorder.snapshot_path();
        drop(recorder);
        task.await.unwrap();

        let text = std::fs::read_to_string(transcript).unwrap();
        assert!(text.contains("SESSION START"));
        assert!(text.contains("[1-Stage Vision]"));
        assert!(text.contains("Output: NO, all clear"));
        assert_eq!(std::fs::read(snapshot).unwrap(), vec![0xFF, 0xD8, 0xFF, 0xD9]);
    }
}
