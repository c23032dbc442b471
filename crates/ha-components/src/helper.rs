//! Shared setup for user-editable helpers
//!
//! A helper domain keeps two collections under one [`IdManager`]: items from
//! `configuration.yaml` and items created through the websocket API. Both
//! drive entities in one [`EntityComponent`]; storage items also own their
//! entity registry entries.

use std::path::PathBuf;
use std::sync::Arc;

use ha_api::StorageCollectionWebsocket;
use ha_config::{load_configuration, section_items};
use ha_core::{ServiceCall, CONF_ID};
use ha_helpers::{
    attach_entity_registry_cleaner, sync_entity_lifecycle, CollectionEntity, CollectionError,
    EntityComponent, IdManager, Item, ItemValidator, StorageCollection, YamlCollection,
};
use ha_service_registry::{ServiceError, ServiceRegistry};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::{ComponentContext, ComponentError};

const STORAGE_VERSION: u32 = 1;

/// Validation of `configuration.yaml` items, next to the storage hooks
pub trait HelperValidator: ItemValidator {
    /// Validate one YAML item; the result keeps the item's `id`
    fn validate_yaml(&self, item: Item) -> Result<Item, CollectionError>;
}

/// The collections, entities and commands of one helper domain
pub struct HelperPlatform<E: CollectionEntity, V: HelperValidator> {
    domain: &'static str,
    config_dir: PathBuf,
    component: Arc<EntityComponent<E>>,
    yaml: YamlCollection,
    storage: Arc<StorageCollection<V>>,
}

impl<E: CollectionEntity, V: HelperValidator> HelperPlatform<E, V> {
    /// Load both collections and register the websocket commands and the
    /// `reload` service
    pub async fn async_setup(
        ctx: &ComponentContext,
        domain: &'static str,
        validator: V,
        config: &ha_config::Value,
        create_schema: Value,
        update_schema: Value,
    ) -> Result<Arc<Self>, ComponentError> {
        let component = Arc::new(
            EntityComponent::new(domain, ctx.states.clone())
                .with_registry(ctx.entity_registry.clone()),
        );
        let id_manager = Arc::new(IdManager::new());

        let yaml = YamlCollection::new(Some(id_manager.clone()));
        sync_entity_lifecycle(component.clone(), domain, &yaml);

        let storage = Arc::new(StorageCollection::new(
            ctx.storage.store(domain, STORAGE_VERSION),
            Some(id_manager),
            validator,
        ));
        sync_entity_lifecycle(component.clone(), domain, storage.as_ref());
        attach_entity_registry_cleaner(
            ctx.entity_registry.clone(),
            domain,
            domain,
            storage.as_ref(),
        );

        let platform = Arc::new(Self {
            domain,
            config_dir: ctx.config_dir.clone(),
            component,
            yaml,
            storage,
        });

        platform
            .yaml
            .async_load(platform.validate_yaml_items(section_items(config, domain)?))
            .await?;
        platform.storage.async_load().await?;

        Arc::new(StorageCollectionWebsocket::new(
            platform.storage.clone(),
            domain,
            domain,
            create_schema,
            update_schema,
        ))
        .async_setup(&ctx.commands)?;

        platform.register_reload_service(&ctx.services)?;

        info!(
            domain,
            entities = platform.component.entity_ids().len(),
            "Set up helper"
        );
        Ok(platform)
    }

    pub fn domain(&self) -> &'static str {
        self.domain
    }

    pub fn component(&self) -> &Arc<EntityComponent<E>> {
        &self.component
    }

    /// Items from `configuration.yaml`
    pub fn yaml_collection(&self) -> &YamlCollection {
        &self.yaml
    }

    /// Items created through the websocket API
    pub fn storage_collection(&self) -> &Arc<StorageCollection<V>> {
        &self.storage
    }

    /// Re-read `configuration.yaml` and apply this domain's section
    pub async fn async_reload(&self) -> Result<(), ComponentError> {
        let config = load_configuration(&self.config_dir)?;
        let items = self.validate_yaml_items(section_items(&config, self.domain)?);
        info!(domain = self.domain, items = items.len(), "Reloading YAML items");
        self.yaml.async_load(items).await?;
        Ok(())
    }

    /// Live entities addressed by the call's `entity_id`
    pub fn target_entities(&self, call: &ServiceCall) -> Vec<Arc<E>> {
        call.entity_ids()
            .iter()
            .filter_map(|entity_id| self.component.get_entity(entity_id))
            .collect()
    }

    fn validate_yaml_items(&self, items: Vec<Item>) -> Vec<Item> {
        items
            .into_iter()
            .filter_map(|item| {
                let item_id = item
                    .get(CONF_ID)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                match self.storage.validator().validate_yaml(item) {
                    Ok(item) => Some(item),
                    Err(e) => {
                        warn!(
                            domain = self.domain,
                            item_id = %item_id,
                            error = %e,
                            "Invalid config, skipping"
                        );
                        None
                    }
                }
            })
            .collect()
    }

    fn register_reload_service(
        self: &Arc<Self>,
        services: &ServiceRegistry,
    ) -> Result<(), ServiceError> {
        let platform = self.clone();
        services.register(
            self.domain,
            "reload",
            move |_call: ServiceCall| {
                let platform = platform.clone();
                async move {
                    platform
                        .async_reload()
                        .await
                        .map_err(|e| ServiceError::CallFailed(e.to_string()))
                }
            },
            None,
        )
    }
}

/// Deserialize the options of an item, ignoring its `id`
pub fn parse_config<T: DeserializeOwned>(item: &Item) -> Result<T, CollectionError> {
    let mut options = item.clone();
    options.remove(CONF_ID);
    serde_json::from_value(Value::Object(options))
        .map_err(|e| CollectionError::Invalid(e.to_string()))
}

/// Serialize `config` back into an item, with `id` first when given
pub fn config_item<T: Serialize>(
    item_id: Option<&str>,
    config: &T,
) -> Result<Item, CollectionError> {
    let mut item = Item::new();
    if let Some(item_id) = item_id {
        item.insert(CONF_ID.to_string(), Value::String(item_id.to_string()));
    }
    match serde_json::to_value(config) {
        Ok(Value::Object(options)) => {
            item.extend(options);
            Ok(item)
        }
        Ok(_) => Err(CollectionError::Invalid("expected a dictionary".to_string())),
        Err(e) => Err(CollectionError::Invalid(e.to_string())),
    }
}

/// Id of an item handed to an entity constructor
pub fn item_id(item: &Item) -> anyhow::Result<String> {
    item.get(CONF_ID)
        .and_then(Value::as_str)
        .map(String::from)
        .ok_or_else(|| anyhow::anyhow!("item has no id"))
}

/// `name` must be present and non-empty for items created at runtime
pub fn require_name(name: Option<&str>) -> Result<(), CollectionError> {
    match name {
        None => Err(CollectionError::Invalid(
            "required key not provided @ data['name']".to_string(),
        )),
        Some("") => Err(CollectionError::Invalid(
            "length of value must be at least 1 @ data['name']".to_string(),
        )),
        Some(_) => Ok(()),
    }
}
