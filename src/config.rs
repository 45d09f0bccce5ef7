//! Configuration System using Figment
//!
//! Configuration is loaded from:
//! 1. a TOML file (`config/default.toml` unless another path is given)
//! 2. Environment variables prefixed with `BLINK_DAQ_`, nested keys split on `__`
//!
//! Every field has a default, so a missing file still yields a usable service.
//!
//! # Example
//! ```no_run
//! use blink_daq::config::Settings;
//!
//! let settings = Settings::load()?;
//! println!("Buffer holds at most {} samples", settings.buffer.max_samples);
//! # Ok::<(), blink_daq::error::DaqError>(())
//! ```

use crate::error::{AppResult, DaqError};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file path.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Sample retention
    #[serde(default)]
    pub buffer: BufferConfig,
    /// Periodic spectral estimation
    #[serde(default)]
    pub estimator: EstimatorConfig,
    /// Live fan-out
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    /// Append-only sample log
    #[serde(default)]
    pub storage: StorageConfig,
    /// HTTP/WebSocket listener
    #[serde(default)]
    pub server: ServerConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

/// Bounds applied to the rolling sample buffer on every insert.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BufferConfig {
    /// Hard cap on retained samples
    #[serde(default = "default_max_samples")]
    pub max_samples: usize,
    /// Maximum age of a retained sample relative to the newest one, in seconds
    #[serde(default = "default_window_seconds")]
    pub window_seconds: f64,
}

/// Spectral estimator tuning.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct EstimatorConfig {
    /// Span of history fed to the transform, in seconds
    #[serde(default = "default_analysis_window_seconds")]
    pub analysis_window_seconds: f64,
    /// Snapshots shorter than this are skipped
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
    /// Tick period in milliseconds
    #[serde(default = "default_tick_period_ms")]
    pub tick_period_ms: u64,
}

/// Per-subscriber queue sizing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BroadcastConfig {
    /// Capacity of each subscriber queue (per event kind)
    #[serde(default = "default_queue_capacity")]
    pub subscriber_queue_capacity: usize,
}

/// Durable sample log configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    /// CSV file that every accepted sample is appended to
    #[serde(default = "default_log_path")]
    pub log_path: PathBuf,
    /// fsync after each record instead of relying on the OS page cache
    #[serde(default)]
    pub sync_each_record: bool,
}

/// Transport listener configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Bind address
    #[serde(default = "default_host")]
    pub host: String,
    /// Bind port
    #[serde(default = "default_port")]
    pub port: u16,
}

// Default value functions
fn default_name() -> String {
    "blink-daq".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_max_samples() -> usize {
    2000
}

fn default_window_seconds() -> f64 {
    11.0
}

fn default_analysis_window_seconds() -> f64 {
    10.0
}

fn default_min_samples() -> usize {
    10
}

fn default_tick_period_ms() -> u64 {
    1000
}

fn default_queue_capacity() -> usize {
    256
}

fn default_log_path() -> PathBuf {
    PathBuf::from("data_log.csv")
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_samples: default_max_samples(),
            window_seconds: default_window_seconds(),
        }
    }
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            analysis_window_seconds: default_analysis_window_seconds(),
            min_samples: default_min_samples(),
            tick_period_ms: default_tick_period_ms(),
        }
    }
}

impl EstimatorConfig {
    /// Tick period as a `Duration`
    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_period_ms)
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            subscriber_queue_capacity: default_queue_capacity(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            log_path: default_log_path(),
            sync_each_record: false,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    /// Parsed socket address for the listener.
    pub fn socket_addr(&self) -> AppResult<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| DaqError::Configuration(format!("invalid listen address: {e}")))
    }
}

impl Settings {
    /// Load configuration from `config/default.toml` and environment variables
    ///
    /// Environment variables override the file with prefix `BLINK_DAQ_`.
    /// Example: `BLINK_DAQ_ESTIMATOR__TICK_PERIOD_MS=500`
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let settings: Settings = Self::figment(path.as_ref()).extract()?;
        settings.validate()?;
        Ok(settings)
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("BLINK_DAQ_").split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.to_lowercase().as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            )));
        }

        if self.buffer.max_samples == 0 {
            return Err(DaqError::Configuration(
                "buffer.max_samples must be at least 1".into(),
            ));
        }

        if !(self.buffer.window_seconds.is_finite() && self.buffer.window_seconds > 0.0) {
            return Err(DaqError::Configuration(format!(
                "buffer.window_seconds must be positive, got {}",
                self.buffer.window_seconds
            )));
        }

        let analysis = self.estimator.analysis_window_seconds;
        if !(analysis.is_finite() && analysis > 0.0) {
            return Err(DaqError::Configuration(format!(
                "estimator.analysis_window_seconds must be positive, got {analysis}"
            )));
        }

        // Retention must cover the analysed span or the estimator sees a truncated window.
        if analysis > self.buffer.window_seconds {
            return Err(DaqError::Configuration(format!(
                "estimator.analysis_window_seconds ({analysis}) exceeds buffer.window_seconds ({})",
                self.buffer.window_seconds
            )));
        }

        if self.estimator.min_samples < 2 {
            return Err(DaqError::Configuration(
                "estimator.min_samples must be at least 2".into(),
            ));
        }

        if self.estimator.tick_period_ms == 0 {
            return Err(DaqError::Configuration(
                "estimator.tick_period_ms must be non-zero".into(),
            ));
        }

        if self.broadcast.subscriber_queue_capacity == 0 {
            return Err(DaqError::Configuration(
                "broadcast.subscriber_queue_capacity must be non-zero".into(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_documented_constants() {
        let settings = Settings::default();
        assert_eq!(settings.buffer.max_samples, 2000);
        assert_eq!(settings.buffer.window_seconds, 11.0);
        assert_eq!(settings.estimator.analysis_window_seconds, 10.0);
        assert_eq!(settings.estimator.min_samples, 10);
        assert_eq!(settings.estimator.tick_period(), Duration::from_secs(1));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load_from(dir.path().join("absent.toml")).unwrap();
        assert_eq!(settings.server.port, 5000);
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blink.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
            [buffer]
            max_samples = 500

            [estimator]
            tick_period_ms = 250

            [storage]
            log_path = "/tmp/blink.csv"
            "#
        )
        .unwrap();

        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.buffer.max_samples, 500);
        assert_eq!(settings.buffer.window_seconds, 11.0);
        assert_eq!(settings.estimator.tick_period_ms, 250);
        assert_eq!(settings.storage.log_path, PathBuf::from("/tmp/blink.csv"));
    }

    #[test]
    fn test_invalid_log_level() {
        let mut settings = Settings::default();
        settings.application.log_level = "loud".into();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn analysis_window_must_fit_in_buffer_window() {
        let mut settings = Settings::default();
        settings.estimator.analysis_window_seconds = 12.0;
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("exceeds"));
    }

    #[test]
    fn zero_capacity_rejected() {
        let mut settings = Settings::default();
        settings.broadcast.subscriber_queue_capacity = 0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.buffer.max_samples = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn socket_addr_parses() {
        let server = ServerConfig {
            host: "127.0.0.1".into(),
            port: 8080,
        };
        assert_eq!(server.socket_addr().unwrap().port(), 8080);
    }
}
