use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Lifecycle marker carried by a captured frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameStatus {
    Pending,
    Analyzed,
}

/// A single camera capture, JPEG encoded
#[derive(Debug, Clone, Serialize)]
pub struct FrameCapture {
    /// Unique frame identifier
    pub id: String,
    /// When the frame was captured
    pub timestamp: DateTime<Utc>,
    /// Device path or synthetic source name
    pub source: String,
    /// JPEG bytes (shared ownership, never copied per consumer)
    #[serde(skip)]
    pub image: Arc<Vec<u8>>,
    /// Prompt version the frame was captured against
    pub prompt_version: u64,
    pub status: FrameStatus,
}

impl FrameCapture {
    /// Create a pending frame with a fresh identifier
    pub fn new<S: Into<String>>(source: S, image: Vec<u8>, prompt_version: u64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            source: source.into(),
            image: Arc::new(image),
            prompt_version,
            status: FrameStatus::Pending,
        }
    }

    /// Size of the encoded image
    pub fn len(&self) -> usize {
        self.image.len()
    }

    pub fn is_empty(&self) -> bool {
        self.image.is_empty()
    }

    /// Copy of this frame with a new status; the image buffer is shared
    pub fn with_status(&self, status: FrameStatus) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }
}
