//! ---
//! dbd_section: "01-core-functionality"
//! dbd_subsection: "module"
//! dbd_type: "source"
//! dbd_scope: "code"
//! dbd_description: "Daemon configuration loading and validation."
//! dbd_version: "v0.0.0-prealpha"
//! dbd_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};
use tracing::{debug, warn};

use crate::logging::LogFormat;

fn default_mode() -> Mode {
    Mode::Backup
}

fn default_primary_host() -> String {
    "localhost".to_owned()
}

fn default_primary_port() -> u16 {
    6819
}

fn default_heartbeat_timeout() -> Duration {
    Duration::from_millis(10_000)
}

fn default_connect_timeout() -> Duration {
    Duration::from_millis(5_000)
}

fn default_throttle() -> Duration {
    Duration::from_secs(1)
}

fn default_startup_grace() -> Duration {
    Duration::from_secs(5)
}

fn default_control_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 6819))
}

fn default_rollup_interval() -> Duration {
    Duration::from_secs(3600)
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9819))
}

/// Primary configuration object for the R-DBD daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbdConfig {
    #[serde(default = "default_mode")]
    pub mode: Mode,
    #[serde(default)]
    pub backup: BackupConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub rollup: RollupConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Metadata describing where a [`DbdConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedDbdConfig {
    pub config: DbdConfig,
    pub source: PathBuf,
}

impl DbdConfig {
    pub const ENV_CONFIG_PATH: &'static str = "R_DBD_CONFIG";

    /// Load configuration from disk, respecting the `R_DBD_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedDbdConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedDbdConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            let path = candidate.as_ref();
            if path.exists() {
                let config = Self::from_path(path)?;
                return Ok(LoadedDbdConfig {
                    config,
                    source: path.to_path_buf(),
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<DbdConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.backup.validate(self.mode)?;
        if self.rollup.interval.is_zero() {
            return Err(anyhow!("rollup interval_secs must be greater than zero"));
        }
        Ok(())
    }
}

impl Default for DbdConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            backup: BackupConfig::default(),
            control: ControlConfig::default(),
            rollup: RollupConfig::default(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl std::str::FromStr for DbdConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: DbdConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Which side of the active/standby pair this daemon starts as.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Primary,
    #[default]
    Backup,
}

impl Mode {
    pub fn is_backup(&self) -> bool {
        matches!(self, Mode::Backup)
    }
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "primary" => Ok(Mode::Primary),
            "backup" => Ok(Mode::Backup),
            other => Err(format!("unknown mode: {}", other)),
        }
    }
}

/// Settings for the standby monitor that watches the primary.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Host name or address of the primary's control endpoint.
    #[serde(default = "default_primary_host")]
    pub primary_host: String,
    /// Port of the primary's control endpoint. Zero is accepted here and
    /// reported when the monitor tries to connect.
    #[serde(default = "default_primary_port")]
    pub primary_port: u16,
    /// Budget for a single heartbeat window.
    #[serde(rename = "heartbeat_timeout_ms", default = "default_heartbeat_timeout")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub heartbeat_timeout: Duration,
    /// Upper bound for establishing the monitoring connection.
    #[serde(rename = "connect_timeout_ms", default = "default_connect_timeout")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub connect_timeout: Duration,
    /// Pause between monitor iterations.
    #[serde(rename = "throttle_secs", default = "default_throttle")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub throttle: Duration,
    /// Delay before the first heartbeat so the primary can finish starting.
    #[serde(rename = "startup_grace_secs", default = "default_startup_grace")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub startup_grace: Duration,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            primary_host: default_primary_host(),
            primary_port: default_primary_port(),
            heartbeat_timeout: default_heartbeat_timeout(),
            connect_timeout: default_connect_timeout(),
            throttle: default_throttle(),
            startup_grace: default_startup_grace(),
        }
    }
}

impl BackupConfig {
    pub fn validate(&self, mode: Mode) -> Result<()> {
        if self.heartbeat_timeout.is_zero() {
            return Err(anyhow!("backup heartbeat_timeout_ms must be greater than zero"));
        }
        if self.connect_timeout.is_zero() {
            return Err(anyhow!("backup connect_timeout_ms must be greater than zero"));
        }
        if self.throttle.is_zero() {
            return Err(anyhow!("backup throttle_secs must be greater than zero"));
        }
        if mode.is_backup() {
            if self.primary_host.trim().is_empty() {
                return Err(anyhow!("backup mode requires a non-empty primary_host"));
            }
            if self.primary_port == 0 {
                warn!(
                    primary_host = %self.primary_host,
                    "primary_port is 0; the standby monitor will treat the primary as unreachable"
                );
            }
        }
        Ok(())
    }
}

/// Endpoint this daemon serves heartbeats on while it holds the active role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    #[serde(default = "default_control_listen")]
    pub listen: SocketAddr,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            listen: default_control_listen(),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollupConfig {
    #[serde(rename = "interval_secs", default = "default_rollup_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub interval: Duration,
}

impl Default for RollupConfig {
    fn default() -> Self {
        Self {
            interval: default_rollup_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            listen: default_metrics_listen(),
        }
    }
}
