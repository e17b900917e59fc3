//! Configuration for the Emotion Sensor Agent.

use crate::core::aggregator::{DEFAULT_CAPACITY, DEFAULT_RECENT_LEN};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Main configuration for the sensor agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// How often the sampling loop invokes detection
    #[serde(with = "duration_ms")]
    pub sampling_period: Duration,

    /// Minimum interval between observations forwarded to consumers
    #[serde(with = "duration_ms")]
    pub throttle_interval: Duration,

    /// Number of labels kept in the rolling history
    pub history_capacity: usize,

    /// Number of labels in a snapshot's `recent` slice
    pub recent_len: usize,

    /// Which detection topology to use and how to reach it
    pub detection: DetectionConfig,

    /// Local camera settings (local-inference mode only)
    pub camera: CameraConfig,

    /// Whether text analyses are also ingested into the rolling history
    pub feed_text_into_timeline: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sampling_period: Duration::from_millis(100),
            throttle_interval: Duration::from_millis(500),
            history_capacity: DEFAULT_CAPACITY,
            recent_len: DEFAULT_RECENT_LEN,
            detection: DetectionConfig::default(),
            camera: CameraConfig::default(),
            feed_text_into_timeline: false,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .map_err(|e| ConfigError::Io(e.to_string()))?;
            let config: Config =
                serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.validate()?;
        let config_path = Self::config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io(e.to_string()))?;
        }

        let content =
            serde_json::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;

        std::fs::write(&config_path, content).map_err(|e| ConfigError::Io(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("emotion-sensor-agent")
            .join("config.json")
    }

    /// Reject values the sampling loop and aggregator cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sampling_period.is_zero() {
            return Err(ConfigError::Invalid(
                "sampling_period must be greater than zero".to_string(),
            ));
        }
        if self.history_capacity == 0 {
            return Err(ConfigError::Invalid(
                "history_capacity must be at least 1".to_string(),
            ));
        }
        if self.recent_len == 0 {
            return Err(ConfigError::Invalid("recent_len must be at least 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.detection.min_confidence) {
            return Err(ConfigError::Invalid(format!(
                "min_confidence must be within [0, 1], got {}",
                self.detection.min_confidence
            )));
        }
        if self.camera.fps == 0 || self.camera.width == 0 || self.camera.height == 0 {
            return Err(ConfigError::Invalid(
                "camera resolution and fps must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Detection topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMode {
    /// Run the expression model in-process against a local camera
    #[default]
    Local,
    /// Poll a remote detection service that owns the camera
    Remote,
}

impl FromStr for DetectionMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(DetectionMode::Local),
            "remote" => Ok(DetectionMode::Remote),
            other => Err(ConfigError::Invalid(format!(
                "unknown detection mode '{other}' (expected local or remote)"
            ))),
        }
    }
}

/// Detection capability settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub mode: DetectionMode,
    /// Faces detected below this confidence are ignored
    pub min_confidence: f64,
    /// Side length of the square the model runs inference at
    pub input_size: u32,
    /// Base URL of the remote detection service
    pub remote_url: String,
    /// Per-request timeout for the remote service
    #[serde(with = "duration_ms")]
    pub request_timeout: Duration,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            mode: DetectionMode::Local,
            min_confidence: 0.5,
            input_size: 224,
            remote_url: "http://127.0.0.1:8000".to_string(),
            request_timeout: Duration::from_secs(2),
        }
    }
}

/// Local camera settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub device_index: u32,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            width: 640,
            height: 480,
            fps: 30,
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Serialize error: {0}")]
    Serialize(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Serde support for Duration as whole milliseconds.
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
