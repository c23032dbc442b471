//! Entities and their attachment to the state store
//!
//! An [`Entity`] describes its state; the [`EntityBase`] it embeds records
//! where it has been attached (entity id, platform and state store) once an
//! [`EntityComponent`](crate::EntityComponent) adds it, and runs the
//! callbacks registered with [`EntityBase::async_on_remove`] when it is
//! removed again.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use ha_core::{Context, EntityId, State};
use ha_state_store::StateStore;
use serde_json::{json, Value};
use tracing::trace;

use crate::collection::Item;

type OnRemove = Box<dyn FnOnce() + Send>;

#[derive(Clone)]
struct Attachment {
    entity_id: EntityId,
    platform: String,
    states: Arc<StateStore>,
}

/// Attachment bookkeeping shared by every entity
#[derive(Default)]
pub struct EntityBase {
    attachment: RwLock<Option<Attachment>>,
    on_remove: Mutex<Vec<OnRemove>>,
}

impl EntityBase {
    /// Create a handle not yet attached to a component
    pub fn new() -> Self {
        Self::default()
    }

    /// Entity id assigned when the entity was added
    pub fn entity_id(&self) -> Option<EntityId> {
        self.attached().map(|a| a.entity_id)
    }

    pub fn platform(&self) -> Option<String> {
        self.attached().map(|a| a.platform)
    }

    pub fn is_attached(&self) -> bool {
        self.attached().is_some()
    }

    /// Run `callback` once when the entity is removed
    pub fn async_on_remove(&self, callback: impl FnOnce() + Send + 'static) {
        if let Ok(mut on_remove) = self.on_remove.lock() {
            on_remove.push(Box::new(callback));
        }
    }

    /// Write `state` for the attached entity; `None` while detached
    pub fn write_state(
        &self,
        state: impl Into<String>,
        attributes: HashMap<String, Value>,
        context: Context,
    ) -> Option<State> {
        let attachment = self.attached()?;
        Some(
            attachment
                .states
                .set(attachment.entity_id, state, attributes, context),
        )
    }

    pub(crate) fn attach(&self, entity_id: EntityId, platform: &str, states: Arc<StateStore>) {
        if let Ok(mut attachment) = self.attachment.write() {
            *attachment = Some(Attachment {
                entity_id,
                platform: platform.to_string(),
                states,
            });
        }
    }

    /// Forget the attachment and run the removal callbacks
    pub(crate) fn detach(&self) {
        if let Ok(mut attachment) = self.attachment.write() {
            *attachment = None;
        }
        let callbacks = self
            .on_remove
            .lock()
            .map(|mut on_remove| std::mem::take(&mut *on_remove))
            .unwrap_or_default();
        trace!(callbacks = callbacks.len(), "Running entity removal callbacks");
        for callback in callbacks {
            callback();
        }
    }

    fn attached(&self) -> Option<Attachment> {
        self.attachment.read().ok().and_then(|a| a.clone())
    }
}

/// An entity owned by an [`EntityComponent`](crate::EntityComponent)
#[async_trait]
pub trait Entity: Send + Sync + 'static {
    fn base(&self) -> &EntityBase;

    /// Stable id used to look the entity up in the entity registry
    fn unique_id(&self) -> Option<String> {
        None
    }

    fn name(&self) -> Option<String> {
        None
    }

    fn icon(&self) -> Option<String> {
        None
    }

    /// Object id the entity insists on, bypassing the registry
    fn requested_object_id(&self) -> Option<String> {
        None
    }

    fn state(&self) -> String;

    fn extra_state_attributes(&self) -> HashMap<String, Value> {
        HashMap::new()
    }

    async fn async_added_to_hass(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn async_will_remove_from_hass(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn entity_id(&self) -> Option<EntityId> {
        self.base().entity_id()
    }

    /// Publish the current state, name and icon to the state store
    fn async_write_ha_state(&self) -> Option<State> {
        let mut attributes = self.extra_state_attributes();
        if let Some(name) = self.name() {
            attributes.insert("friendly_name".to_string(), json!(name));
        }
        if let Some(icon) = self.icon() {
            attributes.insert("icon".to_string(), json!(icon));
        }
        self.base()
            .write_state(self.state(), attributes, Context::new())
    }
}

/// An entity built from a collection item and kept in sync with it
#[async_trait]
pub trait CollectionEntity: Entity + Sized {
    /// Entity for an item created at runtime
    fn from_storage(config: Item) -> anyhow::Result<Self>;

    /// Entity for an item from `configuration.yaml`
    fn from_yaml(config: Item) -> anyhow::Result<Self>;

    /// Apply a changed item and write the new state
    async fn async_update_config(&self, config: Item) -> anyhow::Result<()>;
}
