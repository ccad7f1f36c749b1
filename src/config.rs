use crate::controller::{AckCorrelation, BitrateSettings, DEFAULT_BITRATE, DEFAULT_FD_BITRATE, DEFAULT_RX_QUEUE_CAPACITY, DEFAULT_XL_BITRATE};
use crate::error::{Error, Result};
use crate::transport::RegistryUri;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 9;
pub const DEFAULT_CONNECT_BACKOFF_MS: u64 = 100;
pub const DEFAULT_NETWORK: &str = "VIRTUAL";
pub const DEFAULT_BEACON_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_SYNC_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_MASTER_START_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_STARTUP_GRACE_MS: u64 = 200;
pub const DEFAULT_STARTUP_TIMEOUT_MS: u64 = 5000;

pub const REGISTRY_EXECUTABLE: &str = "sil-kit-registry";
pub const SYSTEM_CONTROLLER_EXECUTABLE: &str = "sil-kit-system-controller";
pub const MONITOR_EXECUTABLE: &str = "sil-kit-monitor";

/// Verbosity passed to auxiliary tools and used by participant log helpers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    #[default]
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Critical,
    Off,
}

impl LogLevel {
    pub const ALL: [LogLevel; 7] = [
        LogLevel::Trace,
        LogLevel::Debug,
        LogLevel::Info,
        LogLevel::Warn,
        LogLevel::Error,
        LogLevel::Critical,
        LogLevel::Off,
    ];

    pub fn as_arg(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Critical => "critical",
            LogLevel::Off => "off",
        }
    }

    /// `None` for [`LogLevel::Off`]. Critical maps onto `ERROR`.
    pub fn to_tracing(self) -> Option<tracing::Level> {
        match self {
            LogLevel::Trace => Some(tracing::Level::TRACE),
            LogLevel::Debug => Some(tracing::Level::DEBUG),
            LogLevel::Info => Some(tracing::Level::INFO),
            LogLevel::Warn => Some(tracing::Level::WARN),
            LogLevel::Error | LogLevel::Critical => Some(tracing::Level::ERROR),
            LogLevel::Off => None,
        }
    }
}

impl core::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_arg())
    }
}

impl FromStr for LogLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        LogLevel::ALL
            .into_iter()
            .find(|level| level.as_arg().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::Config(format!("unknown log level '{s}'")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticipantConfig {
    pub connect_attempts: u32,
    pub connect_backoff_ms: u64,
}

impl ParticipantConfig {
    pub fn connect_backoff(&self) -> Duration {
        Duration::from_millis(self.connect_backoff_ms)
    }
}

impl Default for ParticipantConfig {
    fn default() -> Self {
        Self {
            connect_attempts: DEFAULT_CONNECT_ATTEMPTS,
            connect_backoff_ms: DEFAULT_CONNECT_BACKOFF_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub network: String,
    pub rx_queue_capacity: usize,
    pub bitrate: u32,
    pub bitrate_fd: u32,
    pub bitrate_xl: u32,
    pub ack_correlation: AckCorrelation,
}

impl ControllerConfig {
    pub fn bitrate_settings(&self) -> BitrateSettings {
        BitrateSettings {
            nominal: self.bitrate,
            fd: self.bitrate_fd,
            xl: self.bitrate_xl,
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            network: DEFAULT_NETWORK.to_string(),
            rx_queue_capacity: DEFAULT_RX_QUEUE_CAPACITY,
            bitrate: DEFAULT_BITRATE,
            bitrate_fd: DEFAULT_FD_BITRATE,
            bitrate_xl: DEFAULT_XL_BITRATE,
            ack_correlation: AckCorrelation::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriberConfig {
    pub rx_queue_capacity: usize,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            rx_queue_capacity: DEFAULT_RX_QUEUE_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeSyncConfig {
    pub beacon_interval_ms: u64,
    pub sync_timeout_ms: u64,
    pub master_start_timeout_ms: u64,
}

impl TimeSyncConfig {
    pub fn beacon_interval(&self) -> Duration {
        Duration::from_millis(self.beacon_interval_ms)
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_timeout_ms)
    }

    pub fn master_start_timeout(&self) -> Duration {
        Duration::from_millis(self.master_start_timeout_ms)
    }
}

impl Default for TimeSyncConfig {
    fn default() -> Self {
        Self {
            beacon_interval_ms: DEFAULT_BEACON_INTERVAL_MS,
            sync_timeout_ms: DEFAULT_SYNC_TIMEOUT_MS,
            master_start_timeout_ms: DEFAULT_MASTER_START_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FederationConfig {
    /// When false only the time master is started; the registry is assumed to be running.
    pub launch_processes: bool,
    pub registry_executable: PathBuf,
    pub system_controller_executable: PathBuf,
    pub monitor_executable: PathBuf,
    pub launch_monitor: bool,
    pub log_dir: PathBuf,
    pub log_level: LogLevel,
    pub startup_grace_ms: u64,
    pub startup_timeout_ms: u64,
    pub wait_for_registry: bool,
}

impl FederationConfig {
    pub fn startup_grace(&self) -> Duration {
        Duration::from_millis(self.startup_grace_ms)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            launch_processes: true,
            registry_executable: PathBuf::from(REGISTRY_EXECUTABLE),
            system_controller_executable: PathBuf::from(SYSTEM_CONTROLLER_EXECUTABLE),
            monitor_executable: PathBuf::from(MONITOR_EXECUTABLE),
            launch_monitor: false,
            log_dir: PathBuf::from("."),
            log_level: LogLevel::Trace,
            startup_grace_ms: DEFAULT_STARTUP_GRACE_MS,
            startup_timeout_ms: DEFAULT_STARTUP_TIMEOUT_MS,
            wait_for_registry: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimbusConfig {
    pub registry_uri: RegistryUri,
    pub participant: ParticipantConfig,
    pub controller: ControllerConfig,
    pub subscriber: SubscriberConfig,
    pub time_sync: TimeSyncConfig,
    pub federation: FederationConfig,
}

impl SimbusConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: SimbusConfig = serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.registry_uri = self.registry_uri.with_port(port);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.participant.connect_attempts == 0 {
            return Err(Error::Config("participant.connect_attempts must be at least 1".into()));
        }
        if self.controller.network.is_empty() {
            return Err(Error::Config("controller.network must not be empty".into()));
        }
        if self.controller.rx_queue_capacity == 0 || self.subscriber.rx_queue_capacity == 0 {
            return Err(Error::Config("receive queue capacity must be at least 1".into()));
        }
        if self.time_sync.beacon_interval_ms == 0 {
            return Err(Error::Config("time_sync.beacon_interval_ms must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_constants() {
        let config = SimbusConfig::default();
        assert_eq!(config.registry_uri.to_string(), "silkit://localhost:8500");
        assert_eq!(config.controller.network, "VIRTUAL");
        assert_eq!(config.controller.rx_queue_capacity, 2000);
        assert_eq!(config.time_sync.sync_timeout(), Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_log_level_parse() {
        assert_eq!("WARN".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!(LogLevel::Critical.to_tracing(), Some(tracing::Level::ERROR));
        assert!("loud".parse::<LogLevel>().is_err());
    }
}
