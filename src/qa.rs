use crate::error::{MonitorError, Result};
use crate::frame::FrameCapture;
use crate::inference::VisionClient;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

const QA_SYSTEM_PROMPT: &str = "You are validating a camera feed for baby safety.";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QaResult {
    pub question: String,
    pub answer: String,
    pub latency_ms: u64,
    pub model: String,
}

impl fmt::Display for QaResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Q: {}\nA: {}\nModel: {} | Latency: {} ms",
            self.question, self.answer, self.model, self.latency_ms
        )
    }
}

/// Free-form questions about the current frame, rate limited
pub struct QaTester {
    client: Arc<dyn VisionClient>,
    min_interval: Duration,
    last_request_at: Mutex<Option<Instant>>,
}

impl QaTester {
    pub fn new(client: Arc<dyn VisionClient>, min_interval: Duration) -> Self {
        Self {
            client,
            min_interval,
            last_request_at: Mutex::new(None),
        }
    }

    /// Ask the default model about `frame`; only successful answers start the cool-down
    pub async fn ask(&self, question: &str, frame: Option<&FrameCapture>) -> Result<QaResult> {
        let question = question.trim();
        if question.is_empty() {
            return Err(MonitorError::validation("Question cannot be empty"));
        }

        // Reserve the slot before calling out; a failed call hands it back
        let previous = {
            let mut last_request_at = self.last_request_at.lock();
            if let Some(last) = *last_request_at {
                if last.elapsed() < self.min_interval {
                    return Err(MonitorError::throttled("QA tester"));
                }
            }
            last_request_at.replace(Instant::now())
        };

        debug!("QA question: {}", question);
        let response = match self
            .client
            .generate(
                QA_SYSTEM_PROMPT,
                question,
                frame.map(|f| f.image.as_slice()),
                None,
            )
            .await
        {
            Ok(response) => response,
            Err(e) => {
                *self.last_request_at.lock() = previous;
                return Err(e.into());
            }
        };
        *self.last_request_at.lock() = Some(Instant::now());

        Ok(QaResult {
            question: question.to_string(),
            answer: response.text,
            latency_ms: response.latency_ms,
            model: response.model,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tests::ScriptedClient;
    use crate::error::ServiceError;
    use crate::inference::VisionResponse;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    /// Answers only once the test releases it
    struct SlowClient {
        release: Notify,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl VisionClient for SlowClient {
        async fn generate(
            &self,
            _system_prompt: &str,
            _user_prompt: &str,
            _image: Option<&[u8]>,
            _model: Option<&str>,
        ) -> std::result::Result<VisionResponse, ServiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.release.notified().await;
            Ok(VisionResponse {
                text: "Still asleep".to_string(),
                model: "slow".to_string(),
                latency_ms: 5,
                confidence: 0.5,
                risk: false,
            })
        }

        async fn ensure_model(&self) -> std::result::Result<(), ServiceError> {
            Ok(())
        }

        fn default_model(&self) -> &str {
            "slow"
        }
    }

    #[tokio::test]
    async fn test_question_in_flight_throttles_concurrent_one() {
        let client = Arc::new(SlowClient {
            release: Notify::new(),
            calls: AtomicUsize::new(0),
        });
        let qa = Arc::new(QaTester::new(client.clone(), Duration::from_secs(60)));

        let first = {
            let qa = Arc::clone(&qa);
            tokio::spawn(async move { qa.ask("Is the baby asleep?", None).await })
        };
        for _ in 0..200 {
            if client.calls.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let err = qa.ask("And now?", None).await.unwrap_err();
        assert!(matches!(err, MonitorError::Throttled { .. }));

        client.release.notify_one();
        let result = first.await.unwrap().unwrap();
        assert_eq!(result.answer, "Still asleep");
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_question_is_rejected() {
        let client = Arc::new(ScriptedClient::answering("fine"));
        let qa = QaTester::new(client.clone(), Duration::from_secs(1));

        let err = qa.ask("   ", None).await.unwrap_err();
        assert!(matches!(err, MonitorError::Validation { .. }));
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rapid_second_question_is_throttled() {
        let client = Arc::new(ScriptedClient::answering("The baby is asleep"));
        let qa = QaTester::new(client.clone(), Duration::from_secs(60));
        let frame = FrameCapture::new("test", vec![1, 2, 3], 1);

        let result = qa.ask("  What is happening? ", Some(&frame)).await.unwrap();
        assert_eq!(result.question, "What is happening?");
        assert_eq!(result.answer, "The baby is asleep");
        assert_eq!(result.to_string().lines().next(), Some("Q: What is happening?"));

        let err = qa.ask("And now?", Some(&frame)).await.unwrap_err();
        assert!(matches!(err, MonitorError::Throttled { .. }));
        assert!(err.to_string().contains("throttled"));
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_question_does_not_start_cooldown() {
        let client = Arc::new(ScriptedClient::failing());
        let qa = QaTester::new(client.clone(), Duration::from_secs(60));

        let err = qa.ask("Anyone there?", None).await.unwrap_err();
        assert!(err.is_upstream());

        client.set_answer(Some("Nobody"));
        let result = qa.ask("Anyone there?", None).await.unwrap();
        assert_eq!(result.answer, "Nobody");
        assert_eq!(client.last_model.lock().as_deref(), None);
    }
}
