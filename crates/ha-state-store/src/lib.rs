//! Live entity states for Home Assistant
//!
//! The StateStore tracks the current state of every attached entity, keeps a
//! per-domain index, hands out fresh entity ids for entities that have no
//! registry entry, and fires STATE_CHANGED on every write and removal.

use dashmap::{DashMap, DashSet};
use ha_core::events::StateChangedData;
use ha_core::util::{ensure_unique_string, slugify};
use ha_core::{Context, EntityId, EntityIdError, State};
use ha_event_bus::EventBus;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument, trace};

/// Current state of every entity
///
/// Writes fire `state_changed` on the event bus.
pub struct StateStore {
    /// Entity states keyed by entity_id string
    states: DashMap<String, State>,
    domain_index: DashMap<String, Vec<String>>,
    /// Ids handed out but not yet written
    reserved: DashSet<String>,
    event_bus: Arc<EventBus>,
}

impl StateStore {
    /// Create an empty store firing on `event_bus`
    pub fn new(event_bus: Arc<EventBus>) -> Self {
        Self {
            states: DashMap::new(),
            domain_index: DashMap::new(),
            reserved: DashSet::new(),
            event_bus,
        }
    }

    /// Write the state of an entity and fire STATE_CHANGED
    #[instrument(skip(self, state, attributes, context), fields(entity_id = %entity_id))]
    pub fn set(
        &self,
        entity_id: EntityId,
        state: impl Into<String>,
        attributes: HashMap<String, serde_json::Value>,
        context: Context,
    ) -> State {
        let entity_id_str = entity_id.to_string();
        let old_state = self.states.get(&entity_id_str).map(|s| s.clone());

        let new_state = match &old_state {
            Some(existing) => existing.with_update(state, attributes, context.clone()),
            None => State::new(entity_id.clone(), state, attributes, context.clone()),
        };

        debug!(state = %new_state.state, "Setting entity state");

        self.states.insert(entity_id_str.clone(), new_state.clone());
        self.reserved.remove(&entity_id_str);

        if old_state.is_none() {
            self.domain_index
                .entry(entity_id.domain().to_string())
                .or_default()
                .push(entity_id_str);
        }

        self.event_bus.fire_typed(
            StateChangedData {
                entity_id,
                old_state,
                new_state: Some(new_state.clone()),
            },
            context,
        );

        new_state
    }

    /// Get the current state of an entity
    pub fn get(&self, entity_id: &str) -> Option<State> {
        self.states.get(entity_id).map(|s| s.clone())
    }

    /// Entity ids in `domain`
    pub fn entity_ids(&self, domain: &str) -> Vec<String> {
        self.domain_index
            .get(domain)
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    pub fn all(&self) -> Vec<State> {
        self.states.iter().map(|r| r.value().clone()).collect()
    }

    /// Remove an entity's state, firing STATE_CHANGED with no new state
    #[instrument(skip(self, context), fields(entity_id = %entity_id))]
    pub fn remove(&self, entity_id: &EntityId, context: Context) -> Option<State> {
        let entity_id_str = entity_id.to_string();
        self.reserved.remove(&entity_id_str);

        let old_state = self.states.remove(&entity_id_str).map(|(_, s)| s);

        if let Some(ref state) = old_state {
            trace!("Removing entity state");

            if let Some(mut ids) = self.domain_index.get_mut(entity_id.domain()) {
                ids.retain(|id| id != &entity_id_str);
            }

            self.event_bus.fire_typed(
                StateChangedData {
                    entity_id: entity_id.clone(),
                    old_state: Some(state.clone()),
                    new_state: None,
                },
                context,
            );
        }

        old_state
    }

    /// True if nothing is using or has reserved `entity_id`
    pub fn is_available(&self, entity_id: &str) -> bool {
        !self.states.contains_key(entity_id) && !self.reserved.contains(entity_id)
    }

    /// Hold `entity_id` for an entity that will write its state shortly
    pub fn reserve(&self, entity_id: &EntityId) {
        self.reserved.insert(entity_id.to_string());
    }

    /// First free `domain.<slug>` id, suffixed `_2`, `_3`, ... on collision
    pub fn generate_entity_id(
        &self,
        domain: &str,
        suggested_object_id: &str,
    ) -> Result<EntityId, EntityIdError> {
        let preferred = format!("{}.{}", domain, slugify(suggested_object_id));
        ensure_unique_string(&preferred, |candidate| !self.is_available(candidate)).parse()
    }

    pub fn entity_count(&self) -> usize {
        self.states.len()
    }
}

/// Shared reference to the state store
pub type SharedStateStore = Arc<StateStore>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> (Arc<EventBus>, StateStore) {
        let bus = Arc::new(EventBus::new());
        (bus.clone(), StateStore::new(bus))
    }

    #[test]
    fn test_set_get_remove_fire_events() {
        let (bus, states) = store();
        let mut rx = bus.subscribe_typed::<StateChangedData>();
        let id: EntityId = "input_boolean.hall".parse().unwrap();

        let mut attrs = HashMap::new();
        attrs.insert("editable".to_string(), json!(true));
        states.set(id.clone(), "on", attrs, Context::new());

        assert_eq!(states.get("input_boolean.hall").unwrap().state, "on");
        assert_eq!(states.entity_ids("input_boolean"), vec!["input_boolean.hall"]);

        let added = rx.try_recv().unwrap();
        assert!(added.data.old_state.is_none());

        let removed = states.remove(&id, Context::new()).unwrap();
        assert_eq!(removed.state, "on");
        assert!(states.get("input_boolean.hall").is_none());
        assert!(states.entity_ids("input_boolean").is_empty());

        let gone = rx.try_recv().unwrap();
        assert!(gone.data.new_state.is_none());
    }

    #[test]
    fn test_generate_entity_id_skips_used_and_reserved() {
        let (_bus, states) = store();
        let first = states.generate_entity_id("input_number", "Living Room").unwrap();
        assert_eq!(first.to_string(), "input_number.living_room");

        states.reserve(&first);
        let second = states.generate_entity_id("input_number", "Living Room").unwrap();
        assert_eq!(second.to_string(), "input_number.living_room_2");

        states.set(second.clone(), "1.0", HashMap::new(), Context::new());
        let third = states.generate_entity_id("input_number", "living room").unwrap();
        assert_eq!(third.to_string(), "input_number.living_room_3");
    }
}
