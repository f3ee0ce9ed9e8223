use super::{VisionClient, VisionResponse};
use crate::classifier::ConfidenceHeuristic;
use crate::config::InferenceConfig;
use crate::error::ServiceError;
use async_trait::async_trait;
use base64::{prelude::BASE64_STANDARD, Engine};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// Thin wrapper around the Ollama chat and tags endpoints
#[derive(Clone)]
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    model: Option<String>,
    #[serde(default)]
    message: Option<ChatMessage>,
    total_duration: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: Option<String>,
}

impl OllamaClient {
    pub fn new<S: Into<String>>(base_url: &str, model: S, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.into(),
            timeout,
        }
    }

    pub fn from_config(config: &InferenceConfig) -> Self {
        Self::new(
            &config.base_url,
            config.model.clone(),
            Duration::from_secs(config.timeout_seconds),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn map_transport_error(&self, url: &str, e: reqwest::Error) -> ServiceError {
        if e.is_timeout() {
            ServiceError::Timeout {
                seconds: self.timeout.as_secs(),
            }
        } else {
            ServiceError::Connection {
                url: url.to_string(),
                details: e.to_string(),
            }
        }
    }
}

/// Chat request body; the image rides on the user message
pub(crate) fn chat_payload(
    model: &str,
    system_prompt: &str,
    user_prompt: &str,
    image_b64: Option<String>,
) -> Value {
    let mut user = json!({ "role": "user", "content": user_prompt });
    if let Some(image) = image_b64 {
        user["images"] = json!([image]);
    }

    json!({
        "model": model,
        "messages": [
            { "role": "system", "content": system_prompt },
            user,
        ],
        "stream": false,
    })
}

/// Reported `total_duration` (ns) in ms, or the measured time when absent or zero
pub(crate) fn latency_from(total_duration_ns: Option<u64>, elapsed: Duration) -> u64 {
    let elapsed_ms = elapsed.as_millis() as u64;
    match total_duration_ns.map(|ns| ns / 1_000_000) {
        Some(ms) if ms > 0 => ms,
        _ => elapsed_ms,
    }
}

#[async_trait]
impl VisionClient for OllamaClient {
    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        image: Option<&[u8]>,
        model: Option<&str>,
    ) -> Result<VisionResponse, ServiceError> {
        let model = model.unwrap_or(&self.model).to_string();

        let image_b64 = match image {
            Some(bytes) if !bytes.is_empty() => {
                let bytes = bytes.to_vec();
                let encoded = tokio::task::spawn_blocking(move || BASE64_STANDARD.encode(bytes))
                    .await
                    .map_err(|e| ServiceError::Malformed {
                        url: self.base_url.clone(),
                        details: format!("Image encoding task failed: {}", e),
                    })?;
                Some(encoded)
            }
            _ => None,
        };

        let url = format!("{}/api/chat", self.base_url);
        let payload = chat_payload(&model, system_prompt, user_prompt, image_b64);

        let start = Instant::now();
        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| self.map_transport_error(&url, e))?;

        let status = response.status();
        if !status.is_success() {
            error!("Ollama HTTP error: {} returned {}", url, status);
            return Err(ServiceError::Status {
                url,
                status: status.as_u16(),
            });
        }

        let body: ChatResponse = response.json().await.map_err(|e| ServiceError::Malformed {
            url: url.clone(),
            details: e.to_string(),
        })?;

        let text = body.message.map(|m| m.content).unwrap_or_default();
        let latency_ms = latency_from(body.total_duration, start.elapsed());
        let assessment = ConfidenceHeuristic::assess(&text);

        debug!(
            "Ollama response: model={} risk={} conf={:.2} latency={}ms",
            model, assessment.risk, assessment.confidence, latency_ms
        );

        Ok(VisionResponse {
            text,
            model: body.model.unwrap_or(model),
            latency_ms,
            confidence: assessment.confidence,
            risk: assessment.risk,
        })
    }

    async fn ensure_model(&self) -> Result<(), ServiceError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.map_transport_error(&url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ServiceError::Status {
                url,
                status: status.as_u16(),
            });
        }

        let tags: TagsResponse = response.json().await.map_err(|e| ServiceError::Malformed {
            url: url.clone(),
            details: e.to_string(),
        })?;

        if tags
            .models
            .iter()
            .any(|entry| entry.name.as_deref() == Some(self.model.as_str()))
        {
            Ok(())
        } else {
            Err(ServiceError::ModelMissing {
                model: self.model.clone(),
            })
        }
    }

    fn default_model(&self) -> &str {
        &self.model
    }
}
