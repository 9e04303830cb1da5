//! Configuration for the Area control plane
//!
//! Loads configuration from a TOML file, by default at
//! `~/.config/area/pilot.toml`. Every section has defaults, so a file only
//! needs to name the values it overrides.

use anyhow::{Context, Result};
use area_pilot_proto::InputMode;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::compositor::SnapshotFormat;
use crate::mode::KillSwitch;

/// Environment variable naming an explicit config file
pub const CONFIG_ENV: &str = "AREA_PILOT_CONFIG";

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub control: ControlConfig,
    pub channels: ChannelConfig,
    pub logging: LoggingConfig,
}

/// Invalid configuration value
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("invalid config value `{key}`: {reason}")]
pub struct ConfigError {
    pub key: &'static str,
    pub reason: String,
}

impl ConfigError {
    fn new(key: &'static str, reason: impl Into<String>) -> Self {
        Self {
            key,
            reason: reason.into(),
        }
    }
}

/// Where a loaded configuration came from
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigSource {
    File(PathBuf),
    /// No file at this path, defaults in use
    Defaults(PathBuf),
}

impl ConfigSource {
    /// Report the outcome once logging is up
    pub fn log(&self, config: &Config) {
        match self {
            ConfigSource::File(path) => info!("Configuration loaded from {:?}", path),
            ConfigSource::Defaults(path) => info!("Config file not found at {:?}, using defaults", path),
        }
        debug!("Config: {:?}", config);
    }
}

impl Config {
    /// Load configuration, or use defaults if no file exists
    ///
    /// Resolution order: `path`, then `$AREA_PILOT_CONFIG`, then
    /// `<config_dir>/area/pilot.toml`. Nothing is logged here since the
    /// level comes from the result.
    pub fn load(path: Option<&Path>) -> Result<(Self, ConfigSource)> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => match std::env::var_os(CONFIG_ENV) {
                Some(p) => PathBuf::from(p),
                None => Self::config_path()?,
            },
        };

        if !config_path.exists() {
            return Ok((Self::default(), ConfigSource::Defaults(config_path)));
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file {:?}", config_path))?;
        let config = Self::from_toml(&content)
            .with_context(|| format!("Failed to load config file {:?}", config_path))?;

        Ok((config, ConfigSource::File(config_path)))
    }

    /// Parse and validate a TOML document
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Get the path to the default config file
    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("area");

        Ok(config_dir.join("pilot.toml"))
    }

    /// Check value ranges and parse the string-typed settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        let capture = &self.capture;
        if !(capture.fps.is_finite() && capture.fps > 0.0) {
            return Err(ConfigError::new("capture.fps", "must be positive"));
        }
        if !(1..=100).contains(&capture.quality) {
            return Err(ConfigError::new("capture.quality", "must be within 1..=100"));
        }
        if !(capture.scale > 0.0 && capture.scale <= 1.0) {
            return Err(ConfigError::new("capture.scale", "must be within (0, 1]"));
        }
        if capture.max_dimension == 0 {
            return Err(ConfigError::new("capture.max_dimension", "must be non-zero"));
        }
        capture
            .format
            .parse::<SnapshotFormat>()
            .map_err(|e| ConfigError::new("capture.format", e.to_string()))?;

        self.control
            .mode
            .parse::<InputMode>()
            .map_err(|e| ConfigError::new("control.mode", e.to_string()))?;
        self.control
            .kill_switch
            .parse::<KillSwitch>()
            .map_err(|e| ConfigError::new("control.kill_switch", e.to_string()))?;

        let channels = &self.channels;
        if channels.frame_queue_depth == 0 {
            return Err(ConfigError::new("channels.frame_queue_depth", "must be non-zero"));
        }
        if channels.event_queue_depth == 0 {
            return Err(ConfigError::new("channels.event_queue_depth", "must be non-zero"));
        }
        if channels.request_queue_depth == 0 {
            return Err(ConfigError::new("channels.request_queue_depth", "must be non-zero"));
        }
        Ok(())
    }
}

/// Frame capture and snapshot configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Publish cycles per second
    pub fps: f64,
    /// Snapshot encoding: "jpeg", "png" or "raw"
    pub format: String,
    /// JPEG quality (1-100)
    pub quality: u8,
    /// Downscale factor applied to every snapshot (0, 1]
    pub scale: f64,
    /// Larger snapshot side is capped to this many pixels
    pub max_dimension: u32,
    /// Rate-limit each window to one snapshot per publish period
    pub delta_only: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            fps: 3.0,
            format: "jpeg".to_string(),
            quality: 70,
            scale: 1.0,
            max_dimension: 1920,
            delta_only: true,
        }
    }
}

impl CaptureConfig {
    /// Period of the publish cycle
    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps.max(0.1))
    }

    /// Parsed snapshot format, falling back to JPEG
    pub fn snapshot_format(&self) -> SnapshotFormat {
        self.format.parse().unwrap_or(SnapshotFormat::Jpeg)
    }
}

/// Input authority configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Mode at startup
    pub mode: String,
    /// Key combination forcing observer mode, e.g. "ctrl+Pause"
    pub kill_switch: String,
    /// How long a human input blocks the agent in collaborative mode
    pub human_priority_ms: u64,
    /// Revert autonomous mode to observer after this long (0 = never)
    pub autonomous_timeout_secs: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            mode: "observer".to_string(),
            kill_switch: "ctrl+Pause".to_string(),
            human_priority_ms: 500,
            autonomous_timeout_secs: 0,
        }
    }
}

impl ControlConfig {
    pub fn default_mode(&self) -> InputMode {
        self.mode.parse().unwrap_or(InputMode::Observer)
    }

    pub fn human_priority(&self) -> Duration {
        Duration::from_millis(self.human_priority_ms)
    }

    pub fn autonomous_timeout(&self) -> Option<Duration> {
        (self.autonomous_timeout_secs > 0).then(|| Duration::from_secs(self.autonomous_timeout_secs))
    }
}

/// Socket endpoints and queue depths
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub frame_socket: PathBuf,
    pub event_socket: PathBuf,
    pub control_socket: PathBuf,
    /// Frames queued per channel before new frames are dropped
    pub frame_queue_depth: usize,
    /// Events queued per channel before new events are dropped
    pub event_queue_depth: usize,
    /// Control requests waiting for the session
    pub request_queue_depth: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            frame_socket: area_pilot_proto::socket_path("frames"),
            event_socket: area_pilot_proto::socket_path("events"),
            control_socket: area_pilot_proto::socket_path("control"),
            frame_queue_depth: 5,
            event_queue_depth: 100,
            request_queue_depth: 16,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset
    pub level: String,
    /// Seconds between throughput reports
    pub stats_interval_secs: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            stats_interval_secs: 30,
        }
    }
}

impl LoggingConfig {
    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs.max(1))
    }
}
