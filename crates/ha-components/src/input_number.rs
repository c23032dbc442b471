//! Input Number
//!
//! A user-controlled number within a range, shown as a slider or a box.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use ha_core::{ServiceCall, CONF_ID};
use ha_helpers::{CollectionEntity, CollectionError, Entity, EntityBase, Item, ItemValidator};
use ha_service_registry::{ServiceError, ServiceRegistry};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use crate::helper::{config_item, item_id, parse_config, require_name, HelperPlatform, HelperValidator};
use crate::{ComponentContext, ComponentError};

/// Integration domain
pub const DOMAIN: &str = "input_number";

/// The `input_number` integration
pub type InputNumberPlatform = HelperPlatform<InputNumber, InputNumberValidator>;

/// Display mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumberMode {
    #[default]
    Slider,
    Box,
}

/// Input number options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputNumberConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub min: f64,
    pub max: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial: Option<f64>,
    #[serde(default = "default_step")]
    pub step: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_of_measurement: Option<String>,
    #[serde(default)]
    pub mode: NumberMode,
}

fn default_step() -> f64 {
    1.0
}

impl InputNumberConfig {
    /// Cross-field constraints
    pub fn check(&self) -> Result<(), CollectionError> {
        if self.step <= 0.0 {
            return Err(CollectionError::Invalid(
                "value must be at least 1e-09 @ data['step']".to_string(),
            ));
        }
        if self.min >= self.max {
            return Err(CollectionError::Invalid(format!(
                "Maximum ({}) is not greater than minimum ({})",
                self.max, self.min
            )));
        }
        if let Some(initial) = self.initial {
            if initial < self.min || initial > self.max {
                return Err(CollectionError::Invalid(format!(
                    "Initial value {} not in range {}-{}",
                    initial, self.min, self.max
                )));
            }
        }
        Ok(())
    }
}

fn fields_schema() -> Value {
    json!({
        "properties": {
            "name": {"type": "string", "minLength": 1},
            "min": {"type": "number"},
            "max": {"type": "number"},
            "initial": {"type": "number"},
            "step": {"type": "number", "exclusiveMinimum": 0},
            "icon": {"type": "string"},
            "unit_of_measurement": {"type": "string"},
            "mode": {"enum": ["slider", "box"]}
        },
        "required": ["name", "min", "max"],
        "additionalProperties": false
    })
}

// =============================================================================
// Validation
// =============================================================================

/// Validates `input_number` items, including `min < max`
pub struct InputNumberValidator;

impl InputNumberValidator {
    fn validate_storage(data: &Item) -> Result<InputNumberConfig, CollectionError> {
        let config: InputNumberConfig = parse_config(data)?;
        require_name(config.name.as_deref())?;
        config.check()?;
        Ok(config)
    }
}

#[async_trait]
impl ItemValidator for InputNumberValidator {
    async fn process_create_data(&self, data: Item) -> Result<Item, CollectionError> {
        config_item(None, &Self::validate_storage(&data)?)
    }

    fn get_suggested_id(&self, info: &Item) -> String {
        info.get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    }

    /// Updates replace the whole config
    async fn update_data(&self, item: &Item, update_data: Item) -> Result<Item, CollectionError> {
        let item_id = item.get(CONF_ID).and_then(Value::as_str);
        config_item(item_id, &Self::validate_storage(&update_data)?)
    }
}

impl HelperValidator for InputNumberValidator {
    fn validate_yaml(&self, item: Item) -> Result<Item, CollectionError> {
        let config: InputNumberConfig = parse_config(&item)?;
        config.check()?;
        config_item(item.get(CONF_ID).and_then(Value::as_str), &config)
    }
}

// =============================================================================
// Entity
// =============================================================================

/// A number within `[min, max]`
pub struct InputNumber {
    base: EntityBase,
    id: String,
    config: RwLock<InputNumberConfig>,
    editable: bool,
    value: Mutex<f64>,
}

impl InputNumber {
    fn from_item(item: Item, editable: bool) -> anyhow::Result<Self> {
        let id = item_id(&item)?;
        let config: InputNumberConfig = parse_config(&item)?;
        let value = config.initial.unwrap_or(config.min);
        Ok(Self {
            base: EntityBase::new(),
            id,
            config: RwLock::new(config),
            editable,
            value: Mutex::new(value),
        })
    }

    fn config(&self) -> anyhow::Result<InputNumberConfig> {
        self.config
            .read()
            .map(|c| c.clone())
            .map_err(|_| anyhow::anyhow!("config lock poisoned"))
    }

    pub fn value(&self) -> f64 {
        self.value.lock().map(|v| *v).unwrap_or_default()
    }

    /// Set a new value; values outside `min..=max` are rejected
    pub fn async_set_value(&self, value: f64) -> Result<(), String> {
        let config = self.config().map_err(|e| e.to_string())?;
        if value < config.min || value > config.max {
            return Err(format!(
                "Invalid value for {}: {} (range {} - {})",
                self.entity_id()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| self.id.clone()),
                value,
                config.min,
                config.max
            ));
        }
        if let Ok(mut current) = self.value.lock() {
            *current = value;
        }
        self.async_write_ha_state();
        Ok(())
    }

    /// Raise the value by one step
    ///
    /// Fails without changing anything if that would pass `max`.
    pub fn async_increment(&self) -> Result<(), String> {
        let step = self.config().map_err(|e| e.to_string())?.step;
        self.async_set_value(self.value() + step)
    }

    /// Lower the value by one step
    pub fn async_decrement(&self) -> Result<(), String> {
        let step = self.config().map_err(|e| e.to_string())?.step;
        self.async_set_value(self.value() - step)
    }
}

/// Format a number for state display (remove trailing zeros)
fn format_number(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{:.0}", value)
    } else {
        format!("{}", value)
    }
}

#[async_trait]
impl Entity for InputNumber {
    fn base(&self) -> &EntityBase {
        &self.base
    }

    fn unique_id(&self) -> Option<String> {
        Some(self.id.clone())
    }

    fn name(&self) -> Option<String> {
        self.config().ok().and_then(|c| c.name)
    }

    fn icon(&self) -> Option<String> {
        self.config().ok().and_then(|c| c.icon)
    }

    fn requested_object_id(&self) -> Option<String> {
        (!self.editable).then(|| self.id.clone())
    }

    fn state(&self) -> String {
        format_number(self.value())
    }

    fn extra_state_attributes(&self) -> HashMap<String, Value> {
        let mut attributes = HashMap::from([("editable".to_string(), json!(self.editable))]);
        if let Ok(config) = self.config() {
            attributes.insert("initial".to_string(), json!(config.initial));
            attributes.insert("min".to_string(), json!(config.min));
            attributes.insert("max".to_string(), json!(config.max));
            attributes.insert("step".to_string(), json!(config.step));
            attributes.insert("mode".to_string(), json!(config.mode));
            if let Some(unit) = config.unit_of_measurement {
                attributes.insert("unit_of_measurement".to_string(), json!(unit));
            }
        }
        attributes
    }
}

#[async_trait]
impl CollectionEntity for InputNumber {
    fn from_storage(config: Item) -> anyhow::Result<Self> {
        Self::from_item(config, true)
    }

    fn from_yaml(config: Item) -> anyhow::Result<Self> {
        Self::from_item(config, false)
    }

    /// Keeps the current value, clamped into the new range
    async fn async_update_config(&self, config: Item) -> anyhow::Result<()> {
        let config: InputNumberConfig = parse_config(&config)?;
        if let Ok(mut value) = self.value.lock() {
            *value = value.clamp(config.min, config.max);
        }
        if let Ok(mut current) = self.config.write() {
            *current = config;
        }
        self.async_write_ha_state();
        Ok(())
    }
}

// =============================================================================
// Setup
// =============================================================================

/// Set up input_number from `configuration.yaml` and storage
pub async fn async_setup(
    ctx: &ComponentContext,
    config: &ha_config::Value,
) -> Result<Arc<InputNumberPlatform>, ComponentError> {
    let platform = HelperPlatform::async_setup(
        ctx,
        DOMAIN,
        InputNumberValidator,
        config,
        fields_schema(),
        fields_schema(),
    )
    .await?;
    register_services(&ctx.services, &platform)?;
    Ok(platform)
}

fn register_services(
    services: &ServiceRegistry,
    platform: &Arc<InputNumberPlatform>,
) -> Result<(), ServiceError> {
    let handler = platform.clone();
    services.register(
        DOMAIN,
        "set_value",
        move |call: ServiceCall| {
            let platform = handler.clone();
            async move {
                let value: f64 = call.get("value").ok_or_else(|| {
                    ServiceError::InvalidData("required key not provided @ data['value']".into())
                })?;
                for entity in platform.target_entities(&call) {
                    entity
                        .async_set_value(value)
                        .map_err(ServiceError::CallFailed)?;
                }
                Ok(())
            }
        },
        Some(json!({
            "type": "object",
            "properties": {"value": {"type": "number"}},
            "required": ["value"]
        })),
    )?;

    let steps: [(&str, fn(&InputNumber) -> Result<(), String>); 2] = [
        ("increment", InputNumber::async_increment),
        ("decrement", InputNumber::async_decrement),
    ];
    for (service, step) in steps {
        let handler = platform.clone();
        services.register(
            DOMAIN,
            service,
            move |call: ServiceCall| {
                let platform = handler.clone();
                async move {
                    for entity in platform.target_entities(&call) {
                        step(entity.as_ref()).map_err(ServiceError::CallFailed)?;
                    }
                    Ok(())
                }
            },
            None,
        )?;
    }

    info!("Input number services registered");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(value: Value) -> Item {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(120.0), "120");
        assert_eq!(format_number(-5.0), "-5");
        assert_eq!(format_number(120.5), "120.5");
        assert_eq!(format_number(0.123), "0.123");
    }

    #[test]
    fn test_input_number_config_deserialize() {
        let config: InputNumberConfig = serde_yaml::from_str(
            r#"
            name: Target Temperature
            min: 100
            max: 140
            initial: 120
            icon: mdi:thermometer
            mode: box
        "#,
        )
        .unwrap();
        assert_eq!(config.min, 100.0);
        assert_eq!(config.max, 140.0);
        assert_eq!(config.step, 1.0);
        assert_eq!(config.initial, Some(120.0));
        assert_eq!(config.mode, NumberMode::Box);
    }

    #[tokio::test]
    async fn test_create_applies_defaults_and_constraints() {
        let validator = InputNumberValidator;

        let created = validator
            .process_create_data(item(json!({"name": "Volume", "min": 0, "max": 10})))
            .await
            .unwrap();
        assert_eq!(created["step"], json!(1.0));
        assert_eq!(created["mode"], json!("slider"));

        let err = validator
            .process_create_data(item(json!({"name": "Volume", "min": 10, "max": 0})))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Maximum (0) is not greater than minimum (10)");

        let err = validator
            .process_create_data(item(json!({"name": "Volume", "min": 0, "max": 10, "initial": 11})))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Initial value 11 not in range 0-10");

        assert!(validator
            .process_create_data(item(json!({"name": "Volume", "min": 0, "max": 10, "step": 0})))
            .await
            .is_err());
        assert!(validator
            .process_create_data(item(json!({"min": 0, "max": 10})))
            .await
            .is_err());
    }

    #[test]
    fn test_entity_value_and_attributes() {
        let number = InputNumber::from_yaml(item(json!({
            "id": "volume", "min": 0, "max": 10, "step": 2, "unit_of_measurement": "dB"
        })))
        .unwrap();
        assert_eq!(number.state(), "0");
        assert_eq!(number.extra_state_attributes()["initial"], Value::Null);
        assert_eq!(number.extra_state_attributes()["unit_of_measurement"], "dB");

        number.async_increment().unwrap();
        number.async_increment().unwrap();
        assert_eq!(number.state(), "4");
        number.async_decrement().unwrap();
        assert_eq!(number.value(), 2.0);

        assert!(number.async_set_value(11.0).is_err());
        assert!(number.async_decrement().is_ok());
        assert!(number.async_decrement().is_err());
        assert_eq!(number.value(), 0.0);
    }

    #[tokio::test]
    async fn test_update_config_clamps_value() {
        let number = InputNumber::from_storage(item(json!({
            "id": "volume", "name": "Volume", "min": 0, "max": 10, "initial": 8
        })))
        .unwrap();

        number
            .async_update_config(item(json!({"id": "volume", "name": "Volume", "min": 0, "max": 5})))
            .await
            .unwrap();
        assert_eq!(number.value(), 5.0);
        assert_eq!(number.extra_state_attributes()["max"], json!(5.0));
    }
}
