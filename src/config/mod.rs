//! # Configuration Management Module
//!
//! TOML configuration for meshtrack, loaded once at startup.
//!
//! ## Configuration Structure
//!
//! - [`TrackerConfig`] - session assembler settings
//! - [`MeshtasticConfig`] - serial console settings
//! - [`NodeTableConfig`] - polling of an exported radio-library node table
//! - [`StorageConfig`] - track/route directories and the optional GPX mirror
//! - [`SimulationConfig`] - synthetic track generation
//! - [`HttpConfig`] - HTTP API bind address
//! - [`LoggingConfig`] - log level and file
//!
//! ## Usage
//!
//! ```rust,no_run
//! use meshtrack::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     println!("Serial Port: {}", config.meshtastic.port);
//!     Config::create_default("config.toml").await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration File Format
//!
//! ```toml
//! [tracker]
//! accumulator_timeout_secs = 0   # 0 keeps partial records forever
//!
//! [meshtastic]
//! port = "/dev/ttyUSB0"
//! baud_rate = 115200
//!
//! [node_table]
//! enabled = false
//! path = "./data/nodes.json"
//! poll_interval_secs = 10
//!
//! [storage]
//! data_dir = "./data"
//!
//! [http]
//! enabled = true
//! bind = "0.0.0.0:8000"
//!
//! [logging]
//! level = "info"
//! file = "meshtrack.log"
//! ```
//!
//! Every section may be omitted; missing values fall back to the defaults
//! shown by `meshtrack init`. CLI arguments override file values.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::fs;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub meshtastic: MeshtasticConfig,
    #[serde(default)]
    pub node_table: NodeTableConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Discard a partially assembled record when no field arrived for this many
    /// seconds. 0 or absent keeps partial records until they complete.
    #[serde(default)]
    pub accumulator_timeout_secs: Option<u64>,
    /// Capacity of the live event feed (slow subscribers lag past this).
    #[serde(default = "default_feed_capacity")]
    pub feed_capacity: usize,
}

fn default_feed_capacity() -> usize {
    256
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            accumulator_timeout_secs: None,
            feed_capacity: default_feed_capacity(),
        }
    }
}

impl TrackerConfig {
    pub fn accumulator_timeout(&self) -> Option<Duration> {
        self.accumulator_timeout_secs
            .filter(|s| *s > 0)
            .map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshtasticConfig {
    /// Serial device. Empty means "do not connect at startup".
    #[serde(default)]
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Read timeout; an expired read is an idle tick, not an error.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Echo every console line at debug level.
    #[serde(default = "default_true")]
    pub echo_lines: bool,
}

fn default_baud_rate() -> u32 {
    115200
}

fn default_read_timeout_ms() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

impl Default for MeshtasticConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: default_baud_rate(),
            read_timeout_ms: default_read_timeout_ms(),
            echo_lines: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeTableConfig {
    pub enabled: bool,
    /// JSON export of the radio library's node table.
    pub path: String,
    pub poll_interval_secs: u64,
}

impl Default for NodeTableConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: "./data/nodes.json".to_string(),
            poll_interval_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: String,
    /// Track directory, relative to `data_dir`.
    #[serde(default = "default_tracks_dir")]
    pub tracks_dir: String,
    /// Route directory, relative to `data_dir`.
    #[serde(default = "default_routes_dir")]
    pub routes_dir: String,
    /// Mirror every track as GPX into this directory when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpx_dir: Option<String>,
}

fn default_tracks_dir() -> String {
    "tracks".to_string()
}

fn default_routes_dir() -> String {
    "routes".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
            tracks_dir: default_tracks_dir(),
            routes_dir: default_routes_dir(),
            gpx_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Start point for nodes without a recorded track.
    pub start_lat: f64,
    pub start_lng: f64,
    /// Maximum per-axis offset between consecutive synthetic points (degrees).
    pub step_degrees: f64,
    /// Points added when the request does not say.
    pub default_count: usize,
    /// Upper bound on points added per request.
    pub max_count: usize,
    /// Prefix of derived track keys.
    pub derived_prefix: String,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            start_lat: 51.5,
            start_lng: -0.1,
            step_degrees: 0.0003,
            default_count: 5,
            max_count: 1000,
            derived_prefix: "Emu_".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub enabled: bool,
    pub bind: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "0.0.0.0:8000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: Some("meshtrack.log".to_string()),
        }
    }
}

impl LoggingConfig {
    /// Parse `level`, falling back to `Info` for unknown names.
    pub fn level_filter(&self) -> log::LevelFilter {
        self.level.parse().unwrap_or(log::LevelFilter::Info)
    }
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.meshtastic.baud_rate, 115200);
        assert_eq!(config.node_table.poll_interval_secs, 10);
        assert_eq!(config.storage.tracks_dir, "tracks");
        assert_eq!(config.simulation.default_count, 5);
        assert_eq!(config.tracker.accumulator_timeout(), None);
    }

    #[test]
    fn partial_sections_fill_in_defaults() {
        let config: Config = toml::from_str(
            r#"
            [meshtastic]
            port = "/dev/ttyACM0"

            [storage]
            data_dir = "/var/lib/meshtrack"
            gpx_dir = "/var/lib/meshtrack/gpx"

            [tracker]
            accumulator_timeout_secs = 45
            "#,
        )
        .unwrap();
        assert_eq!(config.meshtastic.port, "/dev/ttyACM0");
        assert_eq!(config.meshtastic.read_timeout_ms, 1000);
        assert_eq!(config.storage.routes_dir, "routes");
        assert_eq!(config.storage.gpx_dir.as_deref(), Some("/var/lib/meshtrack/gpx"));
        assert_eq!(
            config.tracker.accumulator_timeout(),
            Some(Duration::from_secs(45))
        );
    }

    #[test]
    fn storage_section_without_data_dir_keeps_other_settings() {
        let config: Config = toml::from_str(
            r#"
            [meshtastic]
            port = "/dev/ttyACM0"

            [storage]
            gpx_dir = "/tmp/gpx"
            "#,
        )
        .unwrap();
        assert_eq!(config.meshtastic.port, "/dev/ttyACM0");
        assert_eq!(config.storage.data_dir, "./data");
        assert_eq!(config.storage.tracks_dir, "tracks");
        assert_eq!(config.storage.gpx_dir.as_deref(), Some("/tmp/gpx"));
    }

    #[test]
    fn zero_timeout_disables_expiry() {
        let cfg = TrackerConfig {
            accumulator_timeout_secs: Some(0),
            feed_capacity: 16,
        };
        assert_eq!(cfg.accumulator_timeout(), None);
    }

    #[test]
    fn default_config_round_trips_through_toml() {
        let text = toml::to_string_pretty(&Config::default()).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.http.bind, "0.0.0.0:8000");
        assert_eq!(parsed.logging.level_filter(), log::LevelFilter::Info);
    }
}
