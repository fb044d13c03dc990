//! Configuration Module
//!
//! Resolves the harness settings once per run:
//! - Defaults for every key
//! - A `.env` settings file found by walking upward from the working directory
//! - Environment variable overrides (`HOST`, `TOKEN`, `BROKER`, ...)
//!
//! The settings file holds `KEY=value` lines and may reference the
//! environment with `${VAR}` or `${VAR:-default}`.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use config::{Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, error};

use crate::poll::PollPolicy;
use crate::protocol::{ProtocolVersion, QoS};


/// Name of the settings file searched for
pub const SETTINGS_FILE: &str = ".env";

/// Recognized keys. Environment variables use the upper-cased name.
pub const KEYS: &[&str] = &[
    "host",
    "token",
    "broker",
    "mqtt_port",
    "mqtt_protocol",
    "mqtt_keep_alive",
    "mqtt_qos",
    "connect_timeout",
    "request_timeout",
    "poll_max_attempts",
    "poll_interval",
    "device_prefix",
    "log_level",
];

/// Configuration error types
#[derive(Debug)]
pub enum ConfigError {
    /// The working directory could not be determined
    WorkingDirectory(std::io::Error),
    /// IO error reading the settings file
    Io(std::io::Error),
    /// Config crate error
    Config(config::ConfigError),
    /// Validation error
    Validation(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::WorkingDirectory(e) => {
                write!(f, "Cannot determine working directory: {}", e)
            }
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Config(e) => write!(f, "Config error: {}", e),
            ConfigError::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::WorkingDirectory(e) | ConfigError::Io(e) => Some(e),
            ConfigError::Config(e) => Some(e),
            ConfigError::Validation(_) => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(e: config::ConfigError) -> Self {
        ConfigError::Config(e)
    }
}

/// Harness settings. Immutable once loaded.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Base URL of the device-management REST API
    pub host: String,
    /// Bearer token sent with every API request
    pub token: String,
    /// MQTT broker host
    pub broker: String,
    /// MQTT broker TLS port
    pub mqtt_port: u16,
    /// MQTT protocol level (4 = v3.1.1, 5 = v5.0)
    pub mqtt_protocol: u8,
    /// Keep alive sent in CONNECT, in seconds
    pub mqtt_keep_alive: u16,
    /// Publish QoS (0 or 1)
    pub mqtt_qos: u8,
    /// Bound on TCP connect, TLS handshake and broker acknowledgements
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Bound on a single HTTP request
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Convergence poller attempt ceiling
    pub poll_max_attempts: u32,
    /// Delay between convergence poll attempts
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Prefix for generated device names
    pub device_prefix: String,
    /// Log level: error, warn, info, debug, trace
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            token: String::new(),
            broker: "localhost".to_string(),
            mqtt_port: 8883,
            mqtt_protocol: 4,
            mqtt_keep_alive: 60,
            mqtt_qos: 0,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            poll_max_attempts: 20,
            poll_interval: Duration::from_secs(5),
            device_prefix: "it-test".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("host", &self.host)
            .field("token", &if self.token.is_empty() { "" } else { "<redacted>" })
            .field("broker", &self.broker)
            .field("mqtt_port", &self.mqtt_port)
            .field("mqtt_protocol", &self.mqtt_protocol)
            .field("mqtt_keep_alive", &self.mqtt_keep_alive)
            .field("mqtt_qos", &self.mqtt_qos)
            .field("connect_timeout", &self.connect_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("poll_max_attempts", &self.poll_max_attempts)
            .field("poll_interval", &self.poll_interval)
            .field("device_prefix", &self.device_prefix)
            .field("log_level", &self.log_level)
            .finish()
    }
}

/// Substitute environment variables in a string.
/// Supports `${VAR}` and `${VAR:-default}` syntax.
fn substitute_env_vars(content: &str, env: &HashMap<String, String>) -> String {
    let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}").unwrap();
    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        env.get(var_name)
            .cloned()
            .or_else(|| std::env::var(var_name).ok())
            .unwrap_or_else(|| default.to_string())
    })
    .to_string()
}

/// Normalize dotenv lines into INI `key=value` pairs.
///
/// Keys are lower-cased, an `export ` prefix is dropped and one layer of
/// matching quotes around the value is removed. Backslashes are escaped so
/// the INI parser keeps values as written.
fn normalize_dotenv(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let trimmed = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value)) = trimmed.split_once('=') else {
            continue;
        };
        let value = value.trim();
        let value = ['"', '\'']
            .iter()
            .find_map(|q| {
                value
                    .strip_prefix(*q)
                    .and_then(|v| v.strip_suffix(*q))
            })
            .unwrap_or(value);
        out.push_str(&key.trim().to_lowercase());
        out.push('=');
        out.push_str(&value.replace('\\', "\\\\"));
        out.push('\n');
    }
    out
}

/// Walk from `start` toward the filesystem root looking for the settings file.
pub fn find_settings_file(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(SETTINGS_FILE))
        .find(|candidate| candidate.is_file())
}

/// The settings file a run reads: `explicit` when given, otherwise the
/// nearest one found upward from `start`.
pub fn settings_source(explicit: Option<&Path>, start: &Path) -> Option<PathBuf> {
    explicit
        .map(Path::to_path_buf)
        .or_else(|| find_settings_file(start))
}

/// Recognized variables from the process environment, keyed by their upper-case names
pub fn process_env() -> HashMap<String, String> {
    KEYS.iter()
        .filter_map(|key| {
            let name = key.to_uppercase();
            std::env::var(&name).ok().map(|value| (name, value))
        })
        .collect()
}

impl Settings {
    /// Resolve settings starting from the process working directory.
    pub fn load() -> Result<Self, ConfigError> {
        let cwd = std::env::current_dir().map_err(ConfigError::WorkingDirectory)?;
        Self::load_from(&cwd, &process_env())
    }

    /// Resolve settings from an explicit start directory and environment.
    pub fn load_from(start: &Path, env: &HashMap<String, String>) -> Result<Self, ConfigError> {
        match find_settings_file(start) {
            Some(path) => {
                debug!("Loading settings from {}", path.display());
                let content = std::fs::read_to_string(&path)?;
                Self::build(Some(&content), env)
            }
            None => {
                debug!(
                    "No {} found above {}, using defaults",
                    SETTINGS_FILE,
                    start.display()
                );
                Self::build(None, env)
            }
        }
    }

    /// Load an explicit settings file, still honoring environment overrides.
    pub fn from_file<P: AsRef<Path>>(
        path: P,
        env: &HashMap<String, String>,
    ) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::build(Some(&content), env)
    }

    fn build(content: Option<&str>, env: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let defaults = Settings::default();
        let mut builder = config::Config::builder()
            .set_default("host", defaults.host)?
            .set_default("token", defaults.token)?
            .set_default("broker", defaults.broker)?
            .set_default("mqtt_port", defaults.mqtt_port as i64)?
            .set_default("mqtt_protocol", defaults.mqtt_protocol as i64)?
            .set_default("mqtt_keep_alive", defaults.mqtt_keep_alive as i64)?
            .set_default("mqtt_qos", defaults.mqtt_qos as i64)?
            .set_default("connect_timeout", "10s")?
            .set_default("request_timeout", "30s")?
            .set_default("poll_max_attempts", defaults.poll_max_attempts as i64)?
            .set_default("poll_interval", "5s")?
            .set_default("device_prefix", defaults.device_prefix)?
            .set_default("log_level", defaults.log_level)?;

        if let Some(content) = content {
            let normalized = normalize_dotenv(&substitute_env_vars(content, env));
            builder = builder.add_source(File::from_str(&normalized, FileFormat::Ini));
        }

        // Only recognized keys are taken from the environment
        let overrides: config::Map<String, String> = KEYS
            .iter()
            .filter_map(|key| {
                env.get(&key.to_uppercase())
                    .map(|value| (key.to_string(), value.clone()))
            })
            .collect();

        let cfg = builder
            .add_source(Environment::default().source(Some(overrides)))
            .build()?;

        let settings: Settings = cfg.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Validation("host must not be empty".to_string()));
        }

        reqwest::Url::parse(&self.base_url()).map_err(|e| {
            ConfigError::Validation(format!("host '{}' is not a valid URL: {}", self.host, e))
        })?;

        if self.broker.trim().is_empty() {
            return Err(ConfigError::Validation(
                "broker must not be empty".to_string(),
            ));
        }

        if ProtocolVersion::from_u8(self.mqtt_protocol).is_none() {
            return Err(ConfigError::Validation(
                "mqtt_protocol must be 4 (v3.1.1) or 5 (v5.0)".to_string(),
            ));
        }

        if self.mqtt_qos > 1 {
            return Err(ConfigError::Validation(
                "mqtt_qos must be 0 or 1".to_string(),
            ));
        }

        if self.poll_max_attempts == 0 {
            return Err(ConfigError::Validation(
                "poll_max_attempts must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// API base URL with a scheme and without a trailing slash
    pub fn base_url(&self) -> String {
        let host = self.host.trim().trim_end_matches('/');
        if host.contains("://") {
            host.to_string()
        } else if host == "localhost"
            || host.starts_with("localhost:")
            || host.starts_with("127.0.0.1")
        {
            format!("http://{}", host)
        } else {
            format!("https://{}", host)
        }
    }

    pub fn protocol_version(&self) -> ProtocolVersion {
        ProtocolVersion::from_u8(self.mqtt_protocol).unwrap_or(ProtocolVersion::V311)
    }

    pub fn publish_qos(&self) -> QoS {
        if self.mqtt_qos == 0 {
            QoS::AtMostOnce
        } else {
            QoS::AtLeastOnce
        }
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy::new(self.poll_max_attempts, self.poll_interval)
    }
}

static SHARED: OnceLock<Settings> = OnceLock::new();

/// Settings for this process, resolved on first use.
///
/// A resolution failure is fatal: it is logged and the process exits.
pub fn shared() -> &'static Settings {
    SHARED.get_or_init(|| match Settings::load() {
        Ok(settings) => settings,
        Err(e) => {
            error!("Failed to load settings: {}", e);
            std::process::exit(1);
        }
    })
}
