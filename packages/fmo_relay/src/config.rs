use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::replay::ReplaySettings;
use crate::transport::mqtt::MqttSettings;

// =============================================================================
// Unified config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
// Three equivalent ways to configure:
//
//   config.toml:     [echo]
//                    timeout = 3.5
//
//   env var:         FMO_ECHO__TIMEOUT=3.5   (double underscore = nesting)
//
//   (single underscore stays within field names: FMO_ECHO__CALLSIGN_PREFIX)

/// Default location of the config file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to render configuration: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub mqtt: MqttFileConfig,
    #[serde(default)]
    pub topics: TopicsFileConfig,
    #[serde(default)]
    pub echo: EchoFileConfig,
    #[serde(default)]
    pub logging: LoggingFileConfig,
    #[serde(default)]
    pub daemon: DaemonFileConfig,
}

/// Broker connection (lives under `[mqtt]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MqttFileConfig {
    #[serde(default = "default_broker")]
    pub broker: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,
    /// Keepalive interval in seconds.
    #[serde(default = "default_keepalive")]
    pub keepalive: u64,
}

impl Default for MqttFileConfig {
    fn default() -> Self {
        Self {
            broker: default_broker(),
            port: default_port(),
            username: String::new(),
            password: String::new(),
            client_id_prefix: default_client_id_prefix(),
            keepalive: default_keepalive(),
        }
    }
}

/// Topics (lives under `[topics]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TopicsFileConfig {
    #[serde(default = "default_topic")]
    pub subscribe: String,
    #[serde(default = "default_topic")]
    pub publish: String,
}

impl Default for TopicsFileConfig {
    fn default() -> Self {
        Self {
            subscribe: default_topic(),
            publish: default_topic(),
        }
    }
}

/// Repeater behaviour (lives under `[echo]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EchoFileConfig {
    /// Quiet period in seconds before buffered packets are replayed.
    #[serde(default = "default_timeout")]
    pub timeout: f64,
    /// UID stamped on replayed packets; inbound packets with this UID are ignored.
    #[serde(default = "default_uid")]
    pub uid: u16,
    #[serde(default = "default_callsign_prefix")]
    pub callsign_prefix: String,
}

impl Default for EchoFileConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            uid: default_uid(),
            callsign_prefix: default_callsign_prefix(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    #[default]
    Never,
    Hourly,
    Daily,
}

/// Log sinks (lives under `[logging]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoggingFileConfig {
    /// DEBUG, INFO, WARNING, ERROR or CRITICAL (case-insensitive).
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_true")]
    pub console: bool,
    /// Log file path; empty disables file logging.
    #[serde(default = "default_log_file")]
    pub file: String,
    #[serde(default)]
    pub rotation: LogRotation,
    /// Rotated files to keep.
    #[serde(default = "default_backup_count")]
    pub backup_count: usize,
}

impl Default for LoggingFileConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            console: true,
            file: default_log_file(),
            rotation: LogRotation::default(),
            backup_count: default_backup_count(),
        }
    }
}

/// Background mode (lives under `[daemon]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DaemonFileConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_pid_file")]
    pub pid_file: PathBuf,
}

impl Default for DaemonFileConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            pid_file: default_pid_file(),
        }
    }
}

fn default_broker() -> String {
    "localhost".to_string()
}
fn default_port() -> u16 {
    1883
}
fn default_client_id_prefix() -> String {
    "fmo_relay".to_string()
}
fn default_keepalive() -> u64 {
    60
}
fn default_topic() -> String {
    "FMO/RAW".to_string()
}
fn default_timeout() -> f64 {
    5.0
}
fn default_uid() -> u16 {
    65535
}
fn default_callsign_prefix() -> String {
    "RE>".to_string()
}
fn default_log_level() -> String {
    "INFO".to_string()
}
fn default_true() -> bool {
    true
}
fn default_log_file() -> String {
    "logs/fmo_relay.log".to_string()
}
fn default_backup_count() -> usize {
    5
}
fn default_pid_file() -> PathBuf {
    PathBuf::from("/var/run/fmo_relay.pid")
}

/// Build a figment that layers: defaults → config file → FMO_* env vars.
///
/// A missing config file contributes nothing.
///
/// Env vars use double-underscore for nesting into sections:
///   `FMO_MQTT__BROKER=broker.local`  →  `mqtt.broker = "broker.local"`
///   `FMO_ECHO__UID=4242`             →  `echo.uid = 4242`
pub fn load_config(config_path: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(config_path))
        .merge(Env::prefixed("FMO_").split("__"))
}

impl FileConfig {
    /// Load and validate.
    pub fn load(config_path: &Path) -> Result<Self, ConfigError> {
        let config: FileConfig = load_config(config_path).extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mqtt.broker.trim().is_empty() {
            return Err(ConfigError::Invalid("mqtt.broker must not be empty".into()));
        }
        if self.mqtt.port == 0 {
            return Err(ConfigError::Invalid(
                "mqtt.port must be between 1 and 65535".into(),
            ));
        }
        if self.topics.subscribe.is_empty() {
            return Err(ConfigError::Invalid(
                "topics.subscribe must not be empty".into(),
            ));
        }
        if self.topics.publish.is_empty() {
            return Err(ConfigError::Invalid("topics.publish must not be empty".into()));
        }
        if self.echo.timeout <= 0.0 || Duration::try_from_secs_f64(self.echo.timeout).is_err() {
            return Err(ConfigError::Invalid(format!(
                "echo.timeout must be a positive number of seconds, got {}",
                self.echo.timeout
            )));
        }
        if LogLevel::parse(&self.logging.level).is_none() {
            return Err(ConfigError::Invalid(format!(
                "logging.level must be one of DEBUG, INFO, WARNING, ERROR, CRITICAL, got {:?}",
                self.logging.level
            )));
        }
        Ok(())
    }

    /// The effective log level. Falls back to INFO for unvalidated configs.
    pub fn log_level(&self) -> LogLevel {
        LogLevel::parse(&self.logging.level).unwrap_or(LogLevel::Info)
    }

    /// Render as TOML, suitable as a starting config file.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Write the default configuration to `path`.
pub fn save_default_config(path: &Path) -> Result<(), ConfigError> {
    let rendered = FileConfig::default().to_toml()?;
    std::fs::write(path, rendered).map_err(|source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DEBUG" => Some(Self::Debug),
            "INFO" => Some(Self::Info),
            "WARNING" | "WARN" => Some(Self::Warning),
            "ERROR" => Some(Self::Error),
            "CRITICAL" => Some(Self::Critical),
            _ => None,
        }
    }

    /// Directive understood by `tracing_subscriber::EnvFilter`.
    pub fn as_directive(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warn",
            Self::Error | Self::Critical => "error",
        }
    }
}

// =============================================================================
// Runtime config (derived from FileConfig, used by the relay service)
// =============================================================================

#[derive(Clone, Debug)]
pub struct RelayConfig {
    pub mqtt: MqttSettings,
    pub replay: ReplaySettings,
    pub quiet_period: Duration,
}

impl RelayConfig {
    /// Expects a config that passed [`FileConfig::validate`].
    pub fn from_file(fc: &FileConfig) -> Self {
        Self {
            mqtt: MqttSettings {
                broker: fc.mqtt.broker.clone(),
                port: fc.mqtt.port,
                username: fc.mqtt.username.clone(),
                password: fc.mqtt.password.clone(),
                client_id_prefix: fc.mqtt.client_id_prefix.clone(),
                keepalive: Duration::from_secs(fc.mqtt.keepalive),
                subscribe_topic: fc.topics.subscribe.clone(),
            },
            replay: ReplaySettings {
                relay_uid: fc.echo.uid,
                callsign_prefix: fc.echo.callsign_prefix.clone(),
                publish_topic: fc.topics.publish.clone(),
            },
            quiet_period: Duration::from_secs_f64(fc.echo.timeout),
        }
    }
}
