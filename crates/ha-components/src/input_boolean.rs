//! Input Boolean
//!
//! A user-controlled on/off switch for automations.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use ha_core::ServiceCall;
use ha_helpers::{CollectionEntity, CollectionError, Entity, EntityBase, Item, ItemValidator};
use ha_service_registry::{ServiceError, ServiceRegistry};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::helper::{config_item, item_id, parse_config, require_name, HelperPlatform, HelperValidator};
use crate::{ComponentContext, ComponentError};

/// Integration domain
pub const DOMAIN: &str = "input_boolean";

/// The `input_boolean` integration
pub type InputBooleanPlatform = HelperPlatform<InputBoolean, InputBooleanValidator>;

/// Input boolean options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputBooleanConfig {
    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Initial state (default: false/off)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial: Option<bool>,
    /// Icon (e.g., "mdi:bug")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

fn fields_schema() -> Value {
    json!({
        "properties": {
            "name": {"type": "string", "minLength": 1},
            "initial": {"type": "boolean"},
            "icon": {"type": "string"}
        },
        "required": ["name"],
        "additionalProperties": false
    })
}

// =============================================================================
// Validation
// =============================================================================

/// Validates `input_boolean` items created over the websocket API
pub struct InputBooleanValidator;

impl InputBooleanValidator {
    fn validate_storage(data: &Item) -> Result<InputBooleanConfig, CollectionError> {
        let config: InputBooleanConfig = parse_config(data)?;
        require_name(config.name.as_deref())?;
        Ok(config)
    }
}

#[async_trait]
impl ItemValidator for InputBooleanValidator {
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
        let item_id = item.get(ha_core::CONF_ID).and_then(Value::as_str);
        config_item(item_id, &Self::validate_storage(&update_data)?)
    }
}

impl HelperValidator for InputBooleanValidator {
    fn validate_yaml(&self, item: Item) -> Result<Item, CollectionError> {
        let config: InputBooleanConfig = parse_config(&item)?;
        config_item(item.get(ha_core::CONF_ID).and_then(Value::as_str), &config)
    }
}

// =============================================================================
// Entity
// =============================================================================

/// A boolean the user can toggle
pub struct InputBoolean {
    base: EntityBase,
    id: String,
    config: RwLock<InputBooleanConfig>,
    editable: bool,
    is_on: AtomicBool,
}

impl InputBoolean {
    fn from_item(item: Item, editable: bool) -> anyhow::Result<Self> {
        let id = item_id(&item)?;
        let config: InputBooleanConfig = parse_config(&item)?;
        Ok(Self {
            base: EntityBase::new(),
            id,
            is_on: AtomicBool::new(config.initial.unwrap_or(false)),
            config: RwLock::new(config),
            editable,
        })
    }

    fn config(&self) -> InputBooleanConfig {
        self.config.read().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn is_on(&self) -> bool {
        self.is_on.load(Ordering::SeqCst)
    }

    pub fn async_turn_on(&self) {
        self.is_on.store(true, Ordering::SeqCst);
        self.async_write_ha_state();
    }

    pub fn async_turn_off(&self) {
        self.is_on.store(false, Ordering::SeqCst);
        self.async_write_ha_state();
    }

    /// Flip the state and write it
    pub fn async_toggle(&self) {
        self.is_on.fetch_xor(true, Ordering::SeqCst);
        self.async_write_ha_state();
    }
}

#[async_trait]
impl Entity for InputBoolean {
    fn base(&self) -> &EntityBase {
        &self.base
    }

    fn unique_id(&self) -> Option<String> {
        Some(self.id.clone())
    }

    fn name(&self) -> Option<String> {
        self.config().name
    }

    fn icon(&self) -> Option<String> {
        self.config().icon
    }

    fn requested_object_id(&self) -> Option<String> {
        (!self.editable).then(|| self.id.clone())
    }

    fn state(&self) -> String {
        let state = if self.is_on() { "on" } else { "off" };
        state.to_string()
    }

    fn extra_state_attributes(&self) -> HashMap<String, Value> {
        HashMap::from([("editable".to_string(), json!(self.editable))])
    }
}

#[async_trait]
impl CollectionEntity for InputBoolean {
    fn from_storage(config: Item) -> anyhow::Result<Self> {
        Self::from_item(config, true)
    }

    fn from_yaml(config: Item) -> anyhow::Result<Self> {
        Self::from_item(config, false)
    }

    async fn async_update_config(&self, config: Item) -> anyhow::Result<()> {
        let config: InputBooleanConfig = parse_config(&config)?;
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

/// Set up input_boolean from `configuration.yaml` and storage
pub async fn async_setup(
    ctx: &ComponentContext,
    config: &ha_config::Value,
) -> Result<Arc<InputBooleanPlatform>, ComponentError> {
    let platform = HelperPlatform::async_setup(
        ctx,
        DOMAIN,
        InputBooleanValidator,
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
    platform: &Arc<InputBooleanPlatform>,
) -> Result<(), ServiceError> {
    let actions: [(&str, fn(&InputBoolean)); 3] = [
        ("turn_on", InputBoolean::async_turn_on),
        ("turn_off", InputBoolean::async_turn_off),
        ("toggle", InputBoolean::async_toggle),
    ];

    for (service, action) in actions {
        let platform = platform.clone();
        services.register(
            DOMAIN,
            service,
            move |call: ServiceCall| {
                let platform = platform.clone();
                async move {
                    for entity in platform.target_entities(&call) {
                        debug!(entity_id = ?entity.entity_id(), service = %call.service, "Applying service");
                        action(entity.as_ref());
                    }
                    Ok(())
                }
            },
            None,
        )?;
    }

    info!("Input boolean services registered");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(value: Value) -> Item {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_input_boolean_config_deserialize() {
        let config: InputBooleanConfig = serde_yaml::from_str(
            r#"
            name: Debug Mode
            icon: mdi:bug
            initial: true
        "#,
        )
        .unwrap();
        assert_eq!(config.name, Some("Debug Mode".to_string()));
        assert_eq!(config.icon, Some("mdi:bug".to_string()));
        assert_eq!(config.initial, Some(true));
    }

    #[tokio::test]
    async fn test_create_requires_name() {
        let validator = InputBooleanValidator;

        let err = validator
            .process_create_data(item(json!({"initial": true})))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "required key not provided @ data['name']");

        let created = validator
            .process_create_data(item(json!({"name": "Porch light", "initial": true})))
            .await
            .unwrap();
        assert_eq!(created, item(json!({"name": "Porch light", "initial": true})));
        assert_eq!(validator.get_suggested_id(&created), "Porch light");
    }

    #[tokio::test]
    async fn test_update_replaces_config() {
        let validator = InputBooleanValidator;
        let current = item(json!({"id": "porch", "name": "Porch", "icon": "mdi:lamp"}));

        let updated = validator
            .update_data(&current, item(json!({"name": "Front porch"})))
            .await
            .unwrap();
        assert_eq!(updated, item(json!({"id": "porch", "name": "Front porch"})));
    }

    #[test]
    fn test_yaml_name_is_optional() {
        let validator = InputBooleanValidator;
        let validated = validator
            .validate_yaml(item(json!({"id": "hall"})))
            .unwrap();
        assert_eq!(validated, item(json!({"id": "hall"})));
        assert!(validator
            .validate_yaml(item(json!({"id": "hall", "initial": "yes"})))
            .is_err());
    }

    #[test]
    fn test_entity_state() {
        let yaml = InputBoolean::from_yaml(item(json!({"id": "hall", "initial": true}))).unwrap();
        assert_eq!(yaml.state(), "on");
        assert_eq!(yaml.requested_object_id(), Some("hall".to_string()));
        assert_eq!(yaml.extra_state_attributes()["editable"], json!(false));

        let stored = InputBoolean::from_storage(item(json!({"id": "porch", "name": "Porch"}))).unwrap();
        assert_eq!(stored.state(), "off");
        assert_eq!(stored.requested_object_id(), None);
        stored.async_toggle();
        assert!(stored.is_on());
    }
}
