//! YAML configuration loading and validation.
//!
//! The document has a `camera` section and a `recording` section. Required
//! keys are checked in a fixed order before deserializing, so a missing key
//! is always reported by its full dotted path.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use serde_yaml::Value;
use thiserror::Error;

use crate::traits::Resolution;

/// Required keys, in the order they are checked.
const REQUIRED_KEYS: [&str; 12] = [
    "camera",
    "camera.resolution",
    "camera.resolution.width",
    "camera.resolution.height",
    "camera.framerate",
    "camera.pixel_depth",
    "camera.exposure_time",
    "camera.gain",
    "camera.auto_gain",
    "recording",
    "recording.output_directory",
    "recording.file_format",
];

/// Errors from loading a configuration document.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The file could not be read.
    #[error("failed to read config {path}: {source}")]
    Io {
        /// Path that was read.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The document is not valid YAML or has the wrong value types.
    #[error("invalid config document: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A required key is absent.
    #[error("missing required config key: {0}")]
    MissingKey(&'static str),

    /// A value is present but out of range.
    #[error("invalid config value for {key}: {reason}")]
    Invalid {
        /// Dotted key path.
        key: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

/// Camera parameters. Loaded once and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CameraConfig {
    /// Capture resolution.
    pub resolution: Resolution,
    /// Target frames per second.
    pub framerate: f64,
    /// Sensor bit depth.
    pub pixel_depth: u32,
    /// Manual exposure time in microseconds.
    #[serde(rename = "exposure_time")]
    pub exposure_time_us: f64,
    /// Manual gain.
    pub gain: f64,
    /// Probe for a working auto-exposure mode instead of manual settings.
    pub auto_gain: bool,
    /// Device index on the generic capture path.
    #[serde(default)]
    pub device_id: u32,
}

impl CameraConfig {
    /// Check the invariants serde cannot express.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.resolution.width == 0 {
            return Err(SettingsError::Invalid {
                key: "camera.resolution.width",
                reason: "must be greater than zero".to_owned(),
            });
        }
        if self.resolution.height == 0 {
            return Err(SettingsError::Invalid {
                key: "camera.resolution.height",
                reason: "must be greater than zero".to_owned(),
            });
        }
        if !(self.framerate.is_finite() && self.framerate > 0.0) {
            return Err(SettingsError::Invalid {
                key: "camera.framerate",
                reason: format!("must be a positive number, got {}", self.framerate),
            });
        }
        if self.pixel_depth == 0 {
            return Err(SettingsError::Invalid {
                key: "camera.pixel_depth",
                reason: "must be greater than zero".to_owned(),
            });
        }
        if self.exposure_time_us < 0.0 {
            return Err(SettingsError::Invalid {
                key: "camera.exposure_time",
                reason: format!("must not be negative, got {}", self.exposure_time_us),
            });
        }
        Ok(())
    }

    /// Manual exposure converted to milliseconds for the generic path.
    #[must_use]
    pub fn exposure_ms(&self) -> f64 {
        self.exposure_time_us / 1000.0
    }

    /// Time between frames at the configured framerate.
    #[must_use]
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.framerate)
    }
}

/// Recording output parameters.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RecordingConfig {
    /// Directory that receives one video and one timestamp document per session.
    pub output_directory: PathBuf,
    /// Container extension for the video file, e.g. `avi`.
    pub file_format: String,
}

/// The whole configuration document.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Settings {
    /// Camera section.
    pub camera: CameraConfig,
    /// Recording section.
    pub recording: RecordingConfig,
}

impl Settings {
    /// Parse and validate a YAML document.
    pub fn from_yaml(text: &str) -> Result<Self, SettingsError> {
        let document: Value = serde_yaml::from_str(text)?;
        if let Some(missing) = first_missing_key(&document) {
            return Err(SettingsError::MissingKey(missing));
        }

        let settings: Self = serde_yaml::from_value(document)?;
        settings.camera.validate()?;
        if settings.recording.file_format.trim().is_empty() {
            return Err(SettingsError::Invalid {
                key: "recording.file_format",
                reason: "must not be empty".to_owned(),
            });
        }
        Ok(settings)
    }
}

/// Load and validate the configuration at `path`.
pub fn load_settings(path: &Path) -> Result<Settings, SettingsError> {
    let text = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let settings = Settings::from_yaml(&text)?;
    tracing::debug!(path = %path.display(), "loaded config");
    Ok(settings)
}

fn first_missing_key(document: &Value) -> Option<&'static str> {
    REQUIRED_KEYS
        .into_iter()
        .find(|key| lookup(document, key).is_none())
}

fn lookup<'a>(document: &'a Value, dotted: &str) -> Option<&'a Value> {
    dotted
        .split('.')
        .try_fold(document, |node, segment| node.as_mapping()?.get(segment))
}

/// Timing constants for device interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Delay after the initial property writes, for hardware loops to settle.
    pub warmup: Duration,
    /// Delay between applying a probe candidate and reading a frame.
    pub probe_settle: Duration,
    /// Delay between frame-source retry attempts.
    pub retry_delay: Duration,
    /// Upper bound for a single frame read.
    pub read_timeout: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            warmup: Duration::from_secs(1),
            probe_settle: Duration::from_millis(500),
            retry_delay: Duration::from_millis(100),
            read_timeout: Duration::from_secs(2),
        }
    }
}

impl Timing {
    /// No delays at all, for driving fake devices.
    #[must_use]
    pub const fn immediate() -> Self {
        Self {
            warmup: Duration::ZERO,
            probe_settle: Duration::ZERO,
            retry_delay: Duration::ZERO,
            read_timeout: Duration::ZERO,
        }
    }
}
