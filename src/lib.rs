pub mod app;
pub mod camera;
pub mod classifier;
pub mod config;
pub mod display;
pub mod engine;
pub mod error;
pub mod events;
pub mod frame;
pub mod http;
pub mod inference;
pub mod keyboard_input;
pub mod overlay;
pub mod prompts;
pub mod qa;
pub mod readiness;
pub mod recorder;
pub mod scheduler;

pub use app::{ComponentState, MonitorOrchestrator, ShutdownReason};
pub use camera::{CameraHealth, CameraSource, MockCamera};
pub use classifier::{classify, ConfidenceHeuristic};
pub use config::MonitorConfig;
pub use engine::{AlertLevel, AlertState, InferenceEngine, RunOutcome};
pub use error::{CaptureError, MonitorError, Result, ServiceError};
pub use events::{EventBus, EventFilter, EventReceiver, MonitorEvent};
pub use frame::FrameCapture;
pub use inference::{OllamaClient, VisionClient, VisionResponse};
pub use prompts::{PromptStore, RiskPrompt};
pub use qa::{QaResult, QaTester};
pub use scheduler::{AnalysisScheduler, AnalysisSettings, TickDecision};
