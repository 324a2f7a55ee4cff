//! Application configuration
//!
//! Loaded once at startup from a TOML file and handed explicitly to the
//! resolver and the broker session. Every field has a default; the api-key
//! variant additionally needs its endpoints and credentials filled in, either
//! in the file or through the environment.

use crate::mqtt::config::MqttProtocol;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

const CONFIG_DIR: &str = "netfield-dataservice";
const CONFIG_FILE: &str = "config.toml";
const CONFIG_PATH_ENV: &str = "DATASERVICE_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("Failed to parse config file {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Which of the two connection flows to run.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Variant {
    /// Discover broker credentials and the device topic through the data service API
    #[default]
    ApiKey,
    /// Connect straight to a broker reachable from inside the device
    DeviceContainer,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct ApiConfig {
    pub info_endpoint: String,
    pub devices_endpoint: String,
    pub api_key: String,
    pub device_id: String,
    pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            info_endpoint: String::new(),
            devices_endpoint: String::new(),
            api_key: String::new(),
            device_id: String::new(),
            request_timeout_secs: 30,
        }
    }
}

/// Static broker parameters for the device-container variant.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8883,
            username: None,
            password: None,
        }
    }
}

/// Session behaviour shared by both variants.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct MqttSettings {
    pub protocol: MqttProtocol,
    /// Appended to the device base topic in the api-key variant
    pub subscription_topic: String,
    pub publish_topic: String,
    pub publish_message: String,
    pub run_window_secs: u64,
    pub connect_timeout_secs: u64,
    pub keep_alive_secs: u64,
    pub websocket_path: String,
    pub client_id: Option<String>,
    pub request_capacity: usize,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            protocol: MqttProtocol::MqttWss,
            subscription_topic: "#".to_string(),
            publish_topic: "test".to_string(),
            publish_message: "Hello from rust".to_string(),
            run_window_secs: 30,
            connect_timeout_secs: 60,
            keep_alive_secs: 60,
            websocket_path: "/".to_string(),
            client_id: None,
            request_capacity: 10,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    pub variant: Variant,
    pub api: ApiConfig,
    pub broker: BrokerConfig,
    pub mqtt: MqttSettings,
}

impl AppConfig {
    /// Resolves the config location and loads it.
    ///
    /// An explicitly requested file (CLI argument or `DATASERVICE_CONFIG`) must
    /// exist. The per-user default location is optional and falls back to
    /// built-in defaults. Environment overrides are applied last.
    pub fn load(cli_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let explicit = cli_path.or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from));

        let mut config = match explicit {
            Some(path) => Self::from_file(&path)?,
            None => match default_config_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => {
                    info!("No config file found, using built-in defaults");
                    Self::default()
                }
            },
        };

        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        debug!("Loading config from {}", path.display());
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let config = Self::from_toml(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Overrides credentials and broker address from the environment.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("DATASERVICE_API_KEY") {
            self.api.api_key = key;
        }
        if let Some(id) = lookup("DATASERVICE_DEVICE_ID") {
            self.api.device_id = id;
        }
        if let Some(host) = lookup("DATASERVICE_BROKER_HOST") {
            self.broker.host = host;
        }
        if let Some(port) = lookup("DATASERVICE_BROKER_PORT") {
            self.broker.port = port.parse().map_err(|_| {
                ConfigError::Invalid(format!("DATASERVICE_BROKER_PORT is not a port: {port}"))
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.variant == Variant::ApiKey {
            let required = [
                ("api.info_endpoint", &self.api.info_endpoint),
                ("api.devices_endpoint", &self.api.devices_endpoint),
                ("api.api_key", &self.api.api_key),
                ("api.device_id", &self.api.device_id),
            ];
            if let Some((name, _)) = required.iter().find(|(_, value)| value.trim().is_empty()) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be set for the api-key variant"
                )));
            }
        }
        if self.mqtt.request_capacity == 0 {
            return Err(ConfigError::Invalid(
                "mqtt.request_capacity must be greater than zero".to_string(),
            ));
        }
        // rumqttc panics on keep alives below 5s and on blank client ids
        if self.mqtt.keep_alive_secs < 5 {
            return Err(ConfigError::Invalid(
                "mqtt.keep_alive_secs must be at least 5".to_string(),
            ));
        }
        if let Some(id) = &self.mqtt.client_id {
            if id.starts_with(' ') {
                return Err(ConfigError::Invalid(
                    "mqtt.client_id must not start with a space".to_string(),
                ));
            }
        }
        Ok(())
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|mut path| {
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        path
    })
}
