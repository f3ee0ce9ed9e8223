use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct MonitorConfig {
    pub camera: CameraConfig,
    pub inference: InferenceConfig,
    pub analysis: AnalysisConfig,
    pub prompt: PromptConfig,
    pub qa: QaConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub system: SystemConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CameraConfig {
    /// Use the synthetic camera instead of a device
    #[serde(default = "default_camera_mock")]
    pub mock: bool,

    /// Camera device index (e.g., 0 for /dev/video0)
    #[serde(default = "default_camera_index")]
    pub index: u32,

    /// Camera resolution (width, height)
    #[serde(default = "default_camera_resolution")]
    pub resolution: (u32, u32),

    /// Frames per second requested from the device
    #[serde(default = "default_camera_fps")]
    pub fps: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct InferenceConfig {
    /// Base URL of the Ollama server
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model checked by the readiness probe and used for QA
    #[serde(default = "default_model")]
    pub model: String,

    /// Model used for periodic risk scoring
    #[serde(default = "default_scoring_model")]
    pub scoring_model: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct AnalysisConfig {
    /// Start with background analysis enabled
    #[serde(default)]
    pub auto_analyze: bool,

    /// Minimum seconds between background runs
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: f64,

    /// Confidence above which the live view flashes red
    #[serde(default = "default_risk_threshold")]
    pub risk_threshold: f32,

    /// TrueType font for overlay text
    #[serde(default = "default_font_path")]
    pub font_path: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct PromptConfig {
    /// Location of the persisted risk prompt
    #[serde(default = "default_prompt_path")]
    pub path: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct QaConfig {
    /// Minimum spacing between QA questions in milliseconds
    #[serde(default = "default_qa_min_interval_ms")]
    pub min_interval_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ServerConfig {
    /// IP address to bind to
    #[serde(default = "default_server_ip")]
    pub ip: String,

    /// Port to listen on
    #[serde(default = "default_server_port")]
    pub port: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Directory for app.log, the interaction transcript and frame snapshots
    #[serde(default = "default_log_directory")]
    pub directory: String,

    /// Pending diagnostic records before new ones are dropped
    #[serde(default = "default_recorder_capacity")]
    pub recorder_capacity: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SystemConfig {
    /// Event bus capacity
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,
}

impl MonitorConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("cribwatch.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("camera.mock", default_camera_mock())?
            .set_default("camera.index", default_camera_index())?
            .set_default(
                "camera.resolution",
                vec![default_camera_resolution().0, default_camera_resolution().1],
            )?
            .set_default("camera.fps", default_camera_fps())?
            .set_default("inference.base_url", default_base_url())?
            .set_default("inference.model", default_model())?
            .set_default("inference.scoring_model", default_scoring_model())?
            .set_default("inference.timeout_seconds", default_timeout_seconds())?
            .set_default("analysis.auto_analyze", false)?
            .set_default("analysis.interval_seconds", default_interval_seconds())?
            .set_default(
                "analysis.risk_threshold",
                default_risk_threshold() as f64,
            )?
            .set_default("analysis.font_path", default_font_path())?
            .set_default("prompt.path", default_prompt_path())?
            .set_default("qa.min_interval_ms", default_qa_min_interval_ms())?
            .set_default("server.ip", default_server_ip())?
            .set_default("server.port", default_server_port())?
            .set_default("logging.directory", default_log_directory())?
            .set_default(
                "logging.recorder_capacity",
                default_recorder_capacity() as i64,
            )?
            .set_default(
                "system.event_bus_capacity",
                default_event_bus_capacity() as i64,
            )?
            .add_source(File::with_name(&path_str).required(false))
            // CRIBWATCH_SERVER__PORT=9000 style overrides
            .add_source(
                Environment::with_prefix("CRIBWATCH")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let mut config: MonitorConfig = settings.try_deserialize()?;
        config.apply_legacy_env();

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Honour the environment switches older deployments rely on
    fn apply_legacy_env(&mut self) {
        if let Ok(value) = std::env::var("USE_MOCK_CAMERA") {
            self.camera.mock = matches!(value.to_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Ok(host) = std::env::var("SERVER_NAME") {
            self.server.ip = host;
        }
        if let Ok(port) = std::env::var("SERVER_PORT") {
            match port.parse() {
                Ok(port) => self.server.port = port,
                Err(_) => warn!("Ignoring invalid SERVER_PORT '{}'", port),
            }
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.camera.resolution.0 == 0 || self.camera.resolution.1 == 0 {
            return Err(ConfigError::Message(
                "Camera resolution must be greater than 0".to_string(),
            ));
        }

        if self.camera.fps == 0 {
            return Err(ConfigError::Message(
                "Camera fps must be greater than 0".to_string(),
            ));
        }

        if self.inference.base_url.trim().is_empty() {
            return Err(ConfigError::Message(
                "Inference base_url must not be empty".to_string(),
            ));
        }

        if self.inference.scoring_model.trim().is_empty() || self.inference.model.trim().is_empty()
        {
            return Err(ConfigError::Message(
                "Inference model names must not be empty".to_string(),
            ));
        }

        if self.inference.timeout_seconds == 0 {
            return Err(ConfigError::Message(
                "Inference timeout_seconds must be greater than 0".to_string(),
            ));
        }

        if !self.analysis.interval_seconds.is_finite() || self.analysis.interval_seconds <= 0.0 {
            return Err(ConfigError::Message(
                "Analysis interval_seconds must be a positive number".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.analysis.risk_threshold) {
            return Err(ConfigError::Message(
                "Analysis risk_threshold must be within [0, 1]".to_string(),
            ));
        }

        if self.prompt.path.trim().is_empty() {
            return Err(ConfigError::Message(
                "Prompt path must not be empty".to_string(),
            ));
        }

        if self.logging.recorder_capacity == 0 {
            return Err(ConfigError::Message(
                "Recorder capacity must be greater than 0".to_string(),
            ));
        }

        if self.system.event_bus_capacity == 0 {
            return Err(ConfigError::Message(
                "Event bus capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn analysis_interval(&self) -> Duration {
        Duration::from_secs_f64(self.analysis.interval_seconds)
    }

    pub fn log_directory(&self) -> PathBuf {
        PathBuf::from(&self.logging.directory)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig {
                mock: default_camera_mock(),
                index: default_camera_index(),
                resolution: default_camera_resolution(),
                fps: default_camera_fps(),
            },
            inference: InferenceConfig {
                base_url: default_base_url(),
                model: default_model(),
                scoring_model: default_scoring_model(),
                timeout_seconds: default_timeout_seconds(),
            },
            analysis: AnalysisConfig {
                auto_analyze: false,
                interval_seconds: default_interval_seconds(),
                risk_threshold: default_risk_threshold(),
                font_path: default_font_path(),
            },
            prompt: PromptConfig {
                path: default_prompt_path(),
            },
            qa: QaConfig {
                min_interval_ms: default_qa_min_interval_ms(),
            },
            server: ServerConfig {
                ip: default_server_ip(),
                port: default_server_port(),
            },
            logging: LoggingConfig {
                directory: default_log_directory(),
                recorder_capacity: default_recorder_capacity(),
            },
            system: SystemConfig {
                event_bus_capacity: default_event_bus_capacity(),
            },
        }
    }
}

// Default value functions
fn default_camera_mock() -> bool {
    false
}
fn default_camera_index() -> u32 {
    0
}
fn default_camera_resolution() -> (u32, u32) {
    (640, 480)
}
fn default_camera_fps() -> u32 {
    10
}

fn default_base_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_model() -> String {
    "llava:13b-v1.6-vicuna-q4_0".to_string()
}
fn default_scoring_model() -> String {
    "minicpm-v:8b".to_string()
}
fn default_timeout_seconds() -> u64 {
    30
}

fn default_interval_seconds() -> f64 {
    5.0
}
fn default_risk_threshold() -> f32 {
    0.5
}
fn default_font_path() -> String {
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf".to_string()
}

fn default_prompt_path() -> String {
    "data/risk_prompt.json".to_string()
}

fn default_qa_min_interval_ms() -> u64 {
    1000
}

fn default_server_ip() -> String {
    "0.0.0.0".to_string()
}
fn default_server_port() -> u16 {
    7860
}

fn default_log_directory() -> String {
    "temp".to_string()
}
fn default_recorder_capacity() -> usize {
    64
}

fn default_event_bus_capacity() -> usize {
    100
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = MonitorConfig::default();

        assert!(config.validate().is_ok());
        assert_eq!(config.prompt.path, "data/risk_prompt.json");
        assert_eq!(config.analysis_interval(), Duration::from_secs(5));
        assert_eq!(config.server.port, 7860);
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[analysis]\ninterval_seconds = 12.5\n\n[inference]\nscoring_model = \"llava:7b\""
        )
        .unwrap();

        let config = MonitorConfig::load_from_file(file.path()).unwrap();

        assert_eq!(config.analysis.interval_seconds, 12.5);
        assert_eq!(config.inference.scoring_model, "llava:7b");
        // Untouched sections keep their defaults
        assert_eq!(config.inference.base_url, default_base_url());
        assert_eq!(config.camera.resolution, (640, 480));
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = MonitorConfig::load_from_file(dir.path().join("absent.toml")).unwrap();

        assert_eq!(config.prompt, MonitorConfig::default().prompt);
        assert_eq!(config.qa.min_interval_ms, 1000);
    }

    #[test]
    fn test_config_validation() {
        let mut config = MonitorConfig::default();
        config.analysis.interval_seconds = 0.0;
        assert!(config.validate().is_err());

        config.analysis.interval_seconds = 5.0;
        config.analysis.risk_threshold = 1.5;
        assert!(config.validate().is_err());

        config.analysis.risk_threshold = 0.5;
        config.camera.resolution = (0, 480);
        assert!(config.validate().is_err());

        config.camera.resolution = (640, 480);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_config_serializes_to_toml() {
        let rendered = toml::to_string_pretty(&MonitorConfig::default()).unwrap();
        assert!(rendered.contains("[analysis]"));
        assert!(rendered.contains("scoring_model"));
    }
}
