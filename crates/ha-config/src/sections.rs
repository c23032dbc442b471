//! Integration sections shaped `object_id: {options}`

use serde_json::{Map, Value as JsonValue};
use serde_yaml::Value;

use crate::error::{ConfigError, ConfigResult};

/// Items of the `domain:` section, each with its object id under `id`
///
/// A missing or empty section yields no items. An entry without options
/// (`hall:`) becomes an item holding only its id.
pub fn section_items(config: &Value, domain: &str) -> ConfigResult<Vec<Map<String, JsonValue>>> {
    let section = match config.get(domain) {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Mapping(section)) => section,
        Some(_) => {
            return Err(ConfigError::InvalidValue {
                key: domain.to_string(),
                reason: "expected a mapping of object ids to options".to_string(),
            })
        }
    };

    let mut items = Vec::with_capacity(section.len());
    for (object_id, options) in section {
        let object_id = object_id
            .as_str()
            .ok_or_else(|| ConfigError::InvalidValue {
                key: domain.to_string(),
                reason: format!("object id {:?} is not a string", object_id),
            })?;
        let key = format!("{}.{}", domain, object_id);

        let mut item = Map::new();
        item.insert(
            ha_core::CONF_ID.to_string(),
            JsonValue::String(object_id.to_string()),
        );
        match serde_json::to_value(options) {
            Ok(JsonValue::Object(options)) => {
                item.extend(options.into_iter().filter(|(k, _)| k != ha_core::CONF_ID))
            }
            Ok(JsonValue::Null) => {}
            Ok(_) => {
                return Err(ConfigError::InvalidValue {
                    key,
                    reason: "options must be a mapping".to_string(),
                })
            }
            Err(e) => {
                return Err(ConfigError::InvalidValue {
                    key,
                    reason: e.to_string(),
                })
            }
        }
        items.push(item);
    }
    Ok(items)
}
