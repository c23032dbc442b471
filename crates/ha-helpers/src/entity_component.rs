//! Live entities of one domain
//!
//! The component picks entity ids (through the entity registry when an
//! entity has a unique id), attaches entities to the state store and
//! detaches them again on removal.

use std::sync::{Arc, RwLock};

use ha_core::{Context, EntityId, EntityIdError};
use ha_registries::{EntityRegistry, EntityRegistryError};
use ha_state_store::StateStore;
use indexmap::IndexMap;
use thiserror::Error;
use tracing::{debug, error, info, instrument};

use crate::entity::Entity;

/// Errors from adding or removing entities
#[derive(Debug, Error)]
pub enum EntityComponentError {
    /// The generated entity id is not valid
    #[error(transparent)]
    InvalidEntityId(#[from] EntityIdError),

    /// The entity registry rejected the operation
    #[error(transparent)]
    Registry(#[from] EntityRegistryError),

    /// Another entity already holds this id
    #[error("Entity id {0} is already in use")]
    EntityIdTaken(String),

    /// A lifecycle hook of the entity failed
    #[error("Entity {entity_id} failed: {source}")]
    Entity {
        entity_id: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Entities of one domain
///
/// Adding an entity registers it, writes its first state and keeps it
/// listed until it is removed.
pub struct EntityComponent<E: Entity> {
    domain: String,
    states: Arc<StateStore>,
    registry: Option<Arc<EntityRegistry>>,
    entities: RwLock<IndexMap<String, Arc<E>>>,
}

impl<E: Entity> EntityComponent<E> {
    /// Create an empty component for `domain`
    pub fn new(domain: impl Into<String>, states: Arc<StateStore>) -> Self {
        Self {
            domain: domain.into(),
            states,
            registry: None,
            entities: RwLock::new(IndexMap::new()),
        }
    }

    /// Register entities with unique ids in `registry`
    pub fn with_registry(mut self, registry: Arc<EntityRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Attach `entities` for `platform` and write their first state
    ///
    /// An entity that cannot be added is logged and skipped. Returns the
    /// entity ids that were added.
    #[instrument(skip(self, entities), fields(domain = %self.domain, count = entities.len()))]
    pub async fn async_add_entities(&self, platform: &str, entities: Vec<Arc<E>>) -> Vec<EntityId> {
        let mut added = Vec::with_capacity(entities.len());
        for entity in entities {
            match self.add_entity(platform, entity).await {
                Ok(entity_id) => added.push(entity_id),
                Err(err) => error!(error = %err, "Error adding entity"),
            }
        }
        if !added.is_empty() {
            info!(count = added.len(), "Added entities");
        }
        added
    }

    async fn add_entity(
        &self,
        platform: &str,
        entity: Arc<E>,
    ) -> Result<EntityId, EntityComponentError> {
        let entity_id = self.assign_entity_id(platform, entity.as_ref())?;
        let key = entity_id.to_string();

        self.states.reserve(&entity_id);
        entity
            .base()
            .attach(entity_id.clone(), platform, self.states.clone());
        if let Ok(mut entities) = self.entities.write() {
            entities.insert(key.clone(), entity.clone());
        }

        if let Err(source) = entity.async_added_to_hass().await {
            self.forget(&entity_id, entity.as_ref());
            return Err(EntityComponentError::Entity {
                entity_id: key,
                source,
            });
        }

        entity.async_write_ha_state();
        debug!(entity_id = %entity_id, platform, "Entity added");
        Ok(entity_id)
    }

    fn assign_entity_id(&self, platform: &str, entity: &E) -> Result<EntityId, EntityComponentError> {
        if let Some(object_id) = entity.requested_object_id() {
            let entity_id = EntityId::new(self.domain.clone(), object_id)?;
            if !self.states.is_available(&entity_id.to_string()) {
                return Err(EntityComponentError::EntityIdTaken(entity_id.to_string()));
            }
            return Ok(entity_id);
        }

        let suggested = entity
            .name()
            .or_else(|| entity.unique_id())
            .unwrap_or_else(|| platform.to_string());

        match (&self.registry, entity.unique_id()) {
            (Some(registry), Some(unique_id)) => {
                let entry = registry.async_get_or_create(
                    &self.domain,
                    platform,
                    &unique_id,
                    &suggested,
                    entity.name(),
                    |candidate| !self.states.is_available(candidate),
                )?;
                let entity_id: EntityId = entry.entity_id.parse()?;
                if !self.states.is_available(&entry.entity_id) {
                    return Err(EntityComponentError::EntityIdTaken(entry.entity_id.clone()));
                }
                Ok(entity_id)
            }
            _ => Ok(self.states.generate_entity_id(&self.domain, &suggested)?),
        }
    }

    /// Detach an entity and drop its state
    ///
    /// Returns false if no entity has this id.
    #[instrument(skip(self), fields(domain = %self.domain))]
    pub async fn async_remove_entity(&self, entity_id: &str) -> Result<bool, EntityComponentError> {
        let entity = self
            .entities
            .write()
            .ok()
            .and_then(|mut entities| entities.shift_remove(entity_id));
        let Some(entity) = entity else {
            return Ok(false);
        };

        let hook = entity.async_will_remove_from_hass().await;
        if let Some(id) = entity.entity_id() {
            self.forget(&id, entity.as_ref());
        }
        debug!("Entity removed");

        hook.map(|_| true).map_err(|source| EntityComponentError::Entity {
            entity_id: entity_id.to_string(),
            source,
        })
    }

    fn forget(&self, entity_id: &EntityId, entity: &E) {
        if let Ok(mut entities) = self.entities.write() {
            entities.shift_remove(&entity_id.to_string());
        }
        self.states.remove(entity_id, Context::new());
        entity.base().detach();
    }

    /// Look up a live entity
    pub fn get_entity(&self, entity_id: &str) -> Option<Arc<E>> {
        self.entities
            .read()
            .ok()
            .and_then(|entities| entities.get(entity_id).cloned())
    }

    pub fn entities(&self) -> Vec<Arc<E>> {
        self.entities
            .read()
            .map(|entities| entities.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn entity_ids(&self) -> Vec<String> {
        self.entities
            .read()
            .map(|entities| entities.keys().cloned().collect())
            .unwrap_or_default()
    }
}

/// Shared reference to an entity component
pub type SharedEntityComponent<E> = Arc<EntityComponent<E>>;
