//! YAML configuration loading for Home Assistant
//!
//! `configuration.yaml` is read with Home Assistant's custom tags:
//!
//! - `!include path` - Include another YAML file
//! - `!secret key` - Substitute from secrets.yaml
//! - `!env_var VAR [default]` - Environment variable substitution
//!
//! # Example
//!
//! ```ignore
//! use ha_config::{load_configuration, section_items, ServerConfig};
//!
//! let config = load_configuration("/config")?;
//! let server = ServerConfig::from_yaml(&config)?;
//! let booleans = section_items(&config, "input_boolean")?;
//! ```

mod error;
mod loader;
mod sections;
mod server_config;

pub use error::{ConfigError, ConfigResult};
pub use loader::{load_configuration, YamlLoader, CONFIGURATION_FILE, SECRETS_FILE};
pub use sections::section_items;
pub use server_config::{AuthConfig, AuthTokenConfig, HttpConfig, ServerConfig};

pub use serde_yaml::Value;
