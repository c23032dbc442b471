//! Server options from the `http:` and `auth:` sections

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::path::Path;

use crate::error::{ConfigError, ConfigResult};
use crate::loader::load_configuration;

/// `http:` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_server_host")]
    pub server_host: String,

    #[serde(default = "default_server_port")]
    pub server_port: u16,
}

fn default_server_host() -> String {
    "0.0.0.0".to_string()
}

fn default_server_port() -> u16 {
    8123
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            server_host: default_server_host(),
            server_port: default_server_port(),
        }
    }
}

/// A long-lived access token and the user it authenticates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthTokenConfig {
    pub token: String,
    pub user_id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Admins may use the mutating websocket commands
    #[serde(default)]
    pub admin: bool,
}

/// Static access tokens accepted by the websocket API
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub tokens: Vec<AuthTokenConfig>,
}

/// Server settings read from `configuration.yaml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default)]
    pub auth: AuthConfig,
}

impl ServerConfig {
    /// Load from `configuration.yaml` in `config_dir`
    pub fn load(config_dir: impl AsRef<Path>) -> ConfigResult<Self> {
        Self::from_yaml(&load_configuration(config_dir.as_ref())?)
    }

    /// Extract the server settings from a loaded configuration
    ///
    /// Missing sections fall back to their defaults.
    pub fn from_yaml(yaml: &Value) -> ConfigResult<Self> {
        let mapping = yaml.as_mapping().ok_or_else(|| ConfigError::InvalidValue {
            key: "root".to_string(),
            reason: "configuration must be a mapping".to_string(),
        })?;

        let section = |key: &str| -> ConfigResult<Value> {
            match mapping.get(key) {
                None | Some(Value::Null) => Ok(Value::Mapping(serde_yaml::Mapping::new())),
                Some(value) if value.is_mapping() => Ok(value.clone()),
                Some(_) => Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    reason: "section must be a mapping".to_string(),
                }),
            }
        };

        let invalid = |key: &str, error: serde_yaml::Error| ConfigError::InvalidValue {
            key: key.to_string(),
            reason: error.to_string(),
        };

        let http: HttpConfig =
            serde_yaml::from_value(section("http")?).map_err(|e| invalid("http", e))?;
        let auth: AuthConfig =
            serde_yaml::from_value(section("auth")?).map_err(|e| invalid("auth", e))?;

        Ok(Self { http, auth })
    }

    /// `host:port` to bind the HTTP server to
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.http.server_host, self.http.server_port)
    }
}
