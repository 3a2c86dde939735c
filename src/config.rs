//! Configuration for the motion alarm.

use crate::capture::CaptureConfig;
use crate::core::controller::ControllerConfig;
use crate::core::detector::{ConfigurationError, DetectorConfig};
use crate::notify::NotifierConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Main configuration for the alarm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Delay between start and the beginning of calibration
    #[serde(with = "duration_ms")]
    pub arm_delay: Duration,

    /// How long the detector learns the scene before alarms are live
    #[serde(with = "duration_ms")]
    pub calibration_duration: Duration,

    /// Change detector tuning
    pub detector: DetectorConfig,

    /// Which captured frames get processed
    pub capture: CaptureConfig,

    /// Whether alarms ring the bell
    pub sound_enabled: bool,

    /// How long an alarm stays on display before another one can ring
    #[serde(with = "duration_ms")]
    pub alarm_hold: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            arm_delay: Duration::from_secs(10),
            calibration_duration: Duration::from_secs(10),
            detector: DetectorConfig::default(),
            capture: CaptureConfig::default(),
            sound_enabled: true,
            alarm_hold: Duration::from_secs(2),
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`, falling back to defaults if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("motion-alarm")
            .join("config.json")
    }

    /// Reject values the detector or capture gate cannot work with.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.detector.validate()?;
        self.capture.validate()
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            arm_delay: self.arm_delay,
            calibration_duration: self.calibration_duration,
            detector: self.detector,
        }
    }

    pub fn notifier_config(&self) -> NotifierConfig {
        NotifierConfig {
            sound_enabled: self.sound_enabled,
            alarm_hold: self.alarm_hold,
            show_observations: false,
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(serde_json::Error),

    #[error("Serialize error: {0}")]
    Serialize(serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] ConfigurationError),
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.arm_delay, Duration::from_secs(10));
        assert_eq!(config.calibration_duration, Duration::from_secs(10));
        assert_eq!(config.detector.averaging_window, 25);
        assert_eq!(config.detector.threshold_factor, 8.0);
        assert_eq!(config.capture.subsample, 1);
        assert!(config.sound_enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = Config::default();
        config.arm_delay = Duration::from_millis(1500);
        config.detector.threshold_factor = 1.3;
        config.capture.max_process_fps = None;
        config.save_to(&path).unwrap();

        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "arm_delay": 0, "sound_enabled": false }"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.arm_delay, Duration::ZERO);
        assert!(!config.sound_enabled);
        assert_eq!(config.calibration_duration, Duration::from_secs(10));
    }

    #[test]
    fn test_invalid_values_rejected_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{ "detector": { "averaging_window": 0, "threshold_factor": 2.0 } }"#,
        )
        .unwrap();

        assert!(matches!(
            Config::load_from(&path),
            Err(ConfigError::Invalid(ConfigurationError::NonPositiveWindow))
        ));
    }

    #[test]
    fn test_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "not json").unwrap();

        assert!(matches!(Config::load_from(&path), Err(ConfigError::Parse(_))));
    }
}
