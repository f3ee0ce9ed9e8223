use thiserror::Error;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Inference service error: {0}")]
    Service(#[from] ServiceError),

    #[error("Camera error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Event bus error: {0}")]
    EventBus(#[from] EventBusError),

    #[error("{what} throttled; try again in a moment")]
    Throttled { what: String },

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

/// Failures of the remote vision model collaborator
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Failed to reach {url}: {details}")]
    Connection { url: String, details: String },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("Malformed response from {url}: {details}")]
    Malformed { url: String, details: String },

    #[error("Model {model} not found. Run `ollama pull {model}` before launching.")]
    ModelMissing { model: String },

    #[error("Request timed out after {seconds}s")]
    Timeout { seconds: u64 },
}

/// Camera acquisition failures
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Unable to open camera device {device}: {details}")]
    DeviceOpen { device: String, details: String },

    #[error("Failed to read from camera {device}: {details}")]
    Read { device: String, details: String },

    #[error("Failed to encode frame to JPEG: {details}")]
    Encode { details: String },

    #[error("Failed to decode JPEG frame: {details}")]
    Decode { details: String },
}

#[derive(Error, Debug)]
pub enum EventBusError {
    #[error("Event channel closed")]
    ChannelClosed,
}

impl MonitorError {
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn throttled<S: Into<String>>(what: S) -> Self {
        Self::Throttled { what: what.into() }
    }

    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn component(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Whether the failure came from a run collaborator (camera or model) rather than the caller
    pub fn is_upstream(&self) -> bool {
        matches!(self, Self::Service(_) | Self::Capture(_))
    }
}

pub type Result<T> = std::result::Result<T, MonitorError>;
