//! YAML loader with custom tag support
//!
//! - `!include path` - Include another YAML file
//! - `!secret key` - Substitute from secrets.yaml
//! - `!env_var VAR [default]` - Environment variable substitution

use crate::error::{ConfigError, ConfigResult};
use serde_yaml::Value;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};

/// Main configuration file name
pub const CONFIGURATION_FILE: &str = "configuration.yaml";
/// Secrets file name, looked up next to the file that references it
pub const SECRETS_FILE: &str = "secrets.yaml";

/// YAML loader bound to one config directory
pub struct YamlLoader {
    config_dir: PathBuf,
    secrets: HashMap<String, String>,
    /// Files currently being loaded, to detect include cycles
    include_stack: HashSet<PathBuf>,
}

impl YamlLoader {
    /// Loader for `config_dir`, reading `secrets.yaml` if present
    pub fn new(config_dir: impl Into<PathBuf>) -> ConfigResult<Self> {
        let config_dir = config_dir.into();
        let secrets = load_secrets(&config_dir.join(SECRETS_FILE))?;
        Ok(Self {
            config_dir,
            secrets,
            include_stack: HashSet::new(),
        })
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Load a file relative to the config directory
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> ConfigResult<Value> {
        let path = self.resolve_path(path.as_ref());
        debug!(path = ?path, "Loading YAML file");

        if self.include_stack.contains(&path) {
            return Err(ConfigError::CircularInclude { path });
        }

        let content = fs::read_to_string(&path).map_err(|source| ConfigError::ReadFile {
            path: path.clone(),
            source,
        })?;

        self.include_stack.insert(path.clone());
        let result = self.load_string(&content, &path);
        self.include_stack.remove(&path);
        result
    }

    /// Parse `content` as if it had been read from `source_path`
    pub fn load_string(&mut self, content: &str, source_path: &Path) -> ConfigResult<Value> {
        let value: Value =
            serde_yaml::from_str(content).map_err(|source| ConfigError::ParseYaml {
                path: source_path.to_path_buf(),
                source,
            })?;
        self.process_value(value, source_path)
    }

    fn process_value(&mut self, value: Value, source_path: &Path) -> ConfigResult<Value> {
        match value {
            Value::Tagged(tagged) => self.process_tagged(*tagged, source_path),
            Value::Mapping(map) => {
                let mut result = serde_yaml::Mapping::with_capacity(map.len());
                for (key, value) in map {
                    result.insert(key, self.process_value(value, source_path)?);
                }
                Ok(Value::Mapping(result))
            }
            Value::Sequence(seq) => seq
                .into_iter()
                .map(|value| self.process_value(value, source_path))
                .collect::<ConfigResult<Vec<_>>>()
                .map(Value::Sequence),
            other => Ok(other),
        }
    }

    fn process_tagged(
        &mut self,
        tagged: serde_yaml::value::TaggedValue,
        source_path: &Path,
    ) -> ConfigResult<Value> {
        let tag = tagged.tag.to_string();
        trace!(tag = %tag, "Processing tag");

        match tag.as_str() {
            "!include" => {
                let path = include_path(&tagged.value, source_path, &self.config_dir)?;
                self.load_file(path)
            }
            "!secret" => {
                let key = tag_argument(&tagged.value, "!secret")?;
                self.secrets
                    .get(key)
                    .map(|secret| Value::String(secret.clone()))
                    .ok_or_else(|| ConfigError::SecretNotFound {
                        key: key.to_string(),
                    })
            }
            "!env_var" => {
                let argument = tag_argument(&tagged.value, "!env_var")?;
                let (var, default) = match argument.split_once(char::is_whitespace) {
                    Some((var, default)) => (var, Some(default.trim())),
                    None => (argument, None),
                };
                match (std::env::var(var), default) {
                    (Ok(value), _) => Ok(Value::String(value)),
                    (Err(_), Some(default)) => Ok(Value::String(default.to_string())),
                    (Err(_), None) => Err(ConfigError::EnvVarNotFound {
                        var: var.to_string(),
                    }),
                }
            }
            _ => {
                warn!(tag = %tag, "Unknown YAML tag, keeping value");
                let value = self.process_value(tagged.value, source_path)?;
                Ok(Value::Tagged(Box::new(serde_yaml::value::TaggedValue {
                    tag: tagged.tag,
                    value,
                })))
            }
        }
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.config_dir.join(path)
        }
    }
}

/// Load `configuration.yaml`; an absent file is an empty configuration
pub fn load_configuration(config_dir: impl Into<PathBuf>) -> ConfigResult<Value> {
    let mut loader = YamlLoader::new(config_dir)?;
    if !loader.config_dir().join(CONFIGURATION_FILE).exists() {
        warn!(dir = ?loader.config_dir(), "No configuration.yaml, using defaults");
        return Ok(Value::Mapping(serde_yaml::Mapping::new()));
    }
    match loader.load_file(CONFIGURATION_FILE)? {
        Value::Null => Ok(Value::Mapping(serde_yaml::Mapping::new())),
        value => Ok(value),
    }
}

fn tag_argument<'a>(value: &'a Value, tag: &str) -> ConfigResult<&'a str> {
    value.as_str().ok_or_else(|| ConfigError::InvalidValue {
        key: tag.to_string(),
        reason: "argument must be a string".to_string(),
    })
}

fn include_path(value: &Value, source_path: &Path, config_dir: &Path) -> ConfigResult<PathBuf> {
    let path = value
        .as_str()
        .ok_or_else(|| ConfigError::InvalidIncludePath {
            path: format!("{:?}", value),
            reason: "path must be a string".to_string(),
        })?;

    let base_dir = source_path.parent().unwrap_or(config_dir);
    Ok(if Path::new(path).is_absolute() {
        PathBuf::from(path)
    } else {
        base_dir.join(path)
    })
}

fn load_secrets(path: &Path) -> ConfigResult<HashMap<String, String>> {
    if !path.exists() {
        debug!(path = ?path, "No secrets.yaml, using empty secrets");
        return Ok(HashMap::new());
    }

    let content = fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    let raw: HashMap<String, Value> =
        serde_yaml::from_str(&content).map_err(|source| ConfigError::ParseYaml {
            path: path.to_path_buf(),
            source,
        })?;

    let secrets: HashMap<String, String> = raw
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                Value::Null => String::new(),
                other => serde_yaml::to_string(&other)
                    .unwrap_or_default()
                    .trim()
                    .to_string(),
            };
            (key, value)
        })
        .collect();

    debug!(count = secrets.len(), "Loaded secrets");
    Ok(secrets)
}
