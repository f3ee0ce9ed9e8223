//! Remote vision-language model access.

mod ollama;

pub use ollama::OllamaClient;

use crate::error::ServiceError;
use async_trait::async_trait;
use serde::Serialize;

/// Answer returned by a vision model
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VisionResponse {
    pub text: String,
    pub model: String,
    pub latency_ms: u64,
    /// Confidence from the keyword heuristic, not the strict verdict
    pub confidence: f32,
    pub risk: bool,
}

/// "Send an image and two prompts, get text back"
#[async_trait]
pub trait VisionClient: Send + Sync {
    /// Run one chat completion; `model` overrides the client default
    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        image: Option<&[u8]>,
        model: Option<&str>,
    ) -> Result<VisionResponse, ServiceError>;

    /// Fail fast when the configured model is not installed
    async fn ensure_model(&self) -> Result<(), ServiceError>;

    /// Model used when no override is passed
    fn default_model(&self) -> &str;
}
