//! Entity Registry
//!
//! Remembers which entity id was assigned to each `(domain, platform,
//! unique_id)` so an entity keeps its id across restarts. Persisted through a
//! [`Store`] with a delayed save.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use ha_core::events::EntityRegistryUpdatedData;
use ha_core::util::{ensure_unique_string, slugify};
use ha_core::{Context, EntityId, EntityIdError};
use ha_event_bus::EventBus;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::storage::{Storage, StorageResult, Store};

/// Errors from entity registry operations
#[derive(Debug, Error, Clone)]
pub enum EntityRegistryError {
    /// No entry for this entity id
    #[error("Entity not found: {0}")]
    NotFound(String),

    /// The entity id does not parse
    #[error("Invalid entity id: {0}")]
    InvalidEntityId(#[from] EntityIdError),
}

/// Storage key for the entity registry
pub const STORAGE_KEY: &str = "core.entity_registry";
/// Major version of the stored document
pub const STORAGE_VERSION: u32 = 1;
pub const STORAGE_MINOR_VERSION: u32 = 1;

const SAVE_DELAY: Duration = Duration::from_secs(10);

/// How long a removed entry is remembered for id reuse
pub const ORPHANED_ENTITY_KEEP_DAYS: i64 = 30;

/// `(domain, platform, unique_id)`
type UniqueKey = (String, String, String);

/// A registered entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityEntry {
    /// Registry-internal id, stable across entity id renames
    pub id: String,
    pub entity_id: String,
    pub unique_id: String,
    /// Integration that provides the entity
    pub platform: String,

    /// User-set name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Name the integration gave the entity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_name: Option<String>,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub modified_at: DateTime<Utc>,
    /// When a removed entry was orphaned; `None` for live entries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orphaned_timestamp: Option<DateTime<Utc>>,
}

impl EntityEntry {
    pub fn domain(&self) -> &str {
        self.entity_id.split('.').next().unwrap_or(&self.entity_id)
    }

    fn unique_key(&self) -> UniqueKey {
        (
            self.domain().to_string(),
            self.platform.clone(),
            self.unique_id.clone(),
        )
    }
}

/// Entity registry
///
/// Keeps a stable entity id for every `(domain, platform, unique_id)` and
/// remembers removed entries so a returning entity gets its old id back.
/// Persisted shape of the entity registry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityRegistryData {
    /// Live entries
    pub entities: Vec<EntityEntry>,
    /// Removed entries; recreating the same unique id reuses their ids
    #[serde(default)]
    pub deleted_entities: Vec<EntityEntry>,
}

type EntryIndex = Arc<RwLock<IndexMap<String, Arc<EntityEntry>>>>;
type DeletedIndex = Arc<RwLock<IndexMap<UniqueKey, Arc<EntityEntry>>>>;

pub struct EntityRegistry {
    store: Store<EntityRegistryData>,
    bus: Arc<EventBus>,

    /// entity_id -> entry, in registration order
    by_entity_id: EntryIndex,

    /// (domain, platform, unique_id) -> entity_id
    by_unique_key: DashMap<UniqueKey, String>,

    deleted: DeletedIndex,
}

impl EntityRegistry {
    /// Create an empty registry backed by `storage`
    pub fn new(storage: &Storage) -> Self {
        Self {
            store: storage.store(STORAGE_KEY, STORAGE_VERSION),
            bus: storage.bus().clone(),
            by_entity_id: Arc::new(RwLock::new(IndexMap::new())),
            by_unique_key: DashMap::new(),
            deleted: Arc::new(RwLock::new(IndexMap::new())),
        }
    }

    /// Load entries from storage and purge expired orphans
    pub async fn async_load(&self) -> StorageResult<()> {
        let Some(data) = self.store.async_load().await? else {
            return Ok(());
        };

        info!(
            entities = data.entities.len(),
            deleted = data.deleted_entities.len(),
            "Loading entity registry"
        );

        for entry in data.entities {
            self.index_entry(Arc::new(entry));
        }
        if let Ok(mut deleted) = self.deleted.write() {
            for entry in data.deleted_entities {
                deleted.insert(entry.unique_key(), Arc::new(entry));
            }
        }
        self.async_purge_expired_orphaned_entities();
        Ok(())
    }

    /// Forget removed entries orphaned more than
    /// [`ORPHANED_ENTITY_KEEP_DAYS`] ago
    pub fn async_purge_expired_orphaned_entities(&self) {
        let cutoff = Utc::now() - chrono::Duration::days(ORPHANED_ENTITY_KEEP_DAYS);
        let purged = match self.deleted.write() {
            Ok(mut deleted) => {
                let before = deleted.len();
                deleted.retain(|_, entry| {
                    entry
                        .orphaned_timestamp
                        .map_or(true, |orphaned| orphaned >= cutoff)
                });
                before - deleted.len()
            }
            Err(_) => 0,
        };

        if purged > 0 {
            info!(purged, "Purged expired orphaned entities");
            self.async_schedule_save();
        }
    }

    /// Persist a snapshot once changes have settled
    pub fn async_schedule_save(&self) {
        let entities = self.by_entity_id.clone();
        let deleted = self.deleted.clone();
        self.store.async_delay_save(
            move || EntityRegistryData {
                entities: entities
                    .read()
                    .map(|e| e.values().map(|v| (**v).clone()).collect())
                    .unwrap_or_default(),
                deleted_entities: deleted
                    .read()
                    .map(|d| d.values().map(|v| (**v).clone()).collect())
                    .unwrap_or_default(),
            },
            SAVE_DELAY,
        );
    }

    fn index_entry(&self, entry: Arc<EntityEntry>) {
        self.by_unique_key
            .insert(entry.unique_key(), entry.entity_id.clone());
        if let Ok(mut idx) = self.by_entity_id.write() {
            idx.insert(entry.entity_id.clone(), entry);
        }
    }

    /// Get an entry by entity id
    pub fn get(&self, entity_id: &str) -> Option<Arc<EntityEntry>> {
        self.by_entity_id
            .read()
            .ok()
            .and_then(|idx| idx.get(entity_id).cloned())
    }

    /// Entity id registered for `unique_id` of `platform` in `domain`
    pub fn async_get_entity_id(
        &self,
        domain: &str,
        platform: &str,
        unique_id: &str,
    ) -> Option<String> {
        self.by_unique_key
            .get(&(domain.to_string(), platform.to_string(), unique_id.to_string()))
            .map(|entity_id| entity_id.clone())
    }

    /// Look up the entry for a unique id, registering it if it is new
    ///
    /// New entity ids come from `suggested_object_id` and skip ids that are
    /// already registered or that `in_use` reports as taken.
    #[instrument(skip(self, in_use, original_name))]
    pub fn async_get_or_create(
        &self,
        domain: &str,
        platform: &str,
        unique_id: &str,
        suggested_object_id: &str,
        original_name: Option<String>,
        in_use: impl Fn(&str) -> bool,
    ) -> Result<Arc<EntityEntry>, EntityRegistryError> {
        if let Some(entity_id) = self.async_get_entity_id(domain, platform, unique_id) {
            if let Some(existing) = self.get(&entity_id) {
                debug!(entity_id = %existing.entity_id, "Found registered entity");
                return Ok(existing);
            }
        }

        let preferred = format!("{}.{}", domain, slugify(suggested_object_id));
        let entity_id = ensure_unique_string(&preferred, |candidate| {
            self.get(candidate).is_some() || in_use(candidate)
        });
        let entity_id: EntityId = entity_id.parse()?;

        let key = (
            domain.to_string(),
            platform.to_string(),
            unique_id.to_string(),
        );
        let restored = self
            .deleted
            .write()
            .ok()
            .and_then(|mut d| d.shift_remove(&key));

        let now = Utc::now();
        let entry = match restored {
            Some(previous) => EntityEntry {
                entity_id: entity_id.to_string(),
                original_name,
                modified_at: now,
                orphaned_timestamp: None,
                ..(*previous).clone()
            },
            None => EntityEntry {
                id: ulid::Ulid::new().to_string().to_lowercase(),
                entity_id: entity_id.to_string(),
                unique_id: unique_id.to_string(),
                platform: platform.to_string(),
                name: None,
                original_name,
                created_at: now,
                modified_at: now,
                orphaned_timestamp: None,
            },
        };

        let entry = Arc::new(entry);
        self.index_entry(entry.clone());
        self.async_schedule_save();

        info!(entity_id = %entity_id, "Registered new entity");
        self.bus.fire_typed(
            EntityRegistryUpdatedData {
                action: "create".into(),
                entity_id: entity_id.to_string(),
            },
            Context::new(),
        );
        Ok(entry)
    }

    /// Remove an entry, keeping it as deleted so its id can be reused
    pub fn async_remove(&self, entity_id: &str) -> Result<Arc<EntityEntry>, EntityRegistryError> {
        let entry = self
            .by_entity_id
            .write()
            .ok()
            .and_then(|mut idx| idx.shift_remove(entity_id))
            .ok_or_else(|| EntityRegistryError::NotFound(entity_id.to_string()))?;

        self.by_unique_key.remove(&entry.unique_key());
        // Without config entries every removed entry is orphaned right away
        let orphan = Arc::new(EntityEntry {
            orphaned_timestamp: Some(Utc::now()),
            ..(*entry).clone()
        });
        if let Ok(mut deleted) = self.deleted.write() {
            deleted.insert(entry.unique_key(), orphan);
        }
        self.async_schedule_save();

        info!(entity_id, "Removed entity");
        self.bus.fire_typed(
            EntityRegistryUpdatedData {
                action: "remove".into(),
                entity_id: entity_id.to_string(),
            },
            Context::new(),
        );
        Ok(entry)
    }

    pub fn entity_ids(&self) -> Vec<String> {
        self.by_entity_id
            .read()
            .map(|idx| idx.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.by_entity_id.read().map(|idx| idx.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBackend;
    use ha_core::{CoreState, SharedCoreState};
    use serde_json::json;

    fn registry() -> (Storage, Arc<MemoryBackend>, EntityRegistry) {
        let backend = Arc::new(MemoryBackend::new());
        let storage = Storage::with_backend(
            backend.clone(),
            Arc::new(EventBus::new()),
            SharedCoreState::new(CoreState::Running),
        );
        let registry = EntityRegistry::new(&storage);
        (storage, backend, registry)
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_get_or_create_is_stable() {
        let (_storage, _backend, registry) = registry();

        let first = registry
            .async_get_or_create("input_boolean", "input_boolean", "hall", "Hall", None, |_| false)
            .unwrap();
        assert_eq!(first.entity_id, "input_boolean.hall");

        let again = registry
            .async_get_or_create("input_boolean", "input_boolean", "hall", "Other", None, |_| false)
            .unwrap();
        assert_eq!(again.id, first.id);
        assert_eq!(
            registry.async_get_entity_id("input_boolean", "input_boolean", "hall"),
            Some("input_boolean.hall".to_string())
        );
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_entity_id_collisions_get_suffix() {
        let (_storage, _backend, registry) = registry();

        registry
            .async_get_or_create("input_boolean", "input_boolean", "a", "Hall", None, |_| false)
            .unwrap();
        let second = registry
            .async_get_or_create("input_boolean", "input_boolean", "b", "Hall", None, |id| {
                id == "input_boolean.hall_2"
            })
            .unwrap();
        assert_eq!(second.entity_id, "input_boolean.hall_3");
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_remove_then_recreate_reuses_registry_id() {
        let (_storage, _backend, registry) = registry();
        let mut events = registry.bus.subscribe_typed::<EntityRegistryUpdatedData>();

        let created = registry
            .async_get_or_create("input_boolean", "input_boolean", "hall", "Hall", None, |_| false)
            .unwrap();
        registry.async_remove("input_boolean.hall").unwrap();

        assert!(registry.is_empty());
        assert_eq!(
            registry.async_get_entity_id("input_boolean", "input_boolean", "hall"),
            None
        );
        assert!(matches!(
            registry.async_remove("input_boolean.hall"),
            Err(EntityRegistryError::NotFound(_))
        ));

        let restored = registry
            .async_get_or_create("input_boolean", "input_boolean", "hall", "Hall", None, |_| false)
            .unwrap();
        assert_eq!(restored.id, created.id);

        let actions: Vec<_> = std::iter::from_fn(|| events.try_recv())
            .map(|e| e.data.action)
            .collect();
        assert_eq!(actions, vec!["create", "remove", "create"]);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_persists_after_delay_and_reloads() {
        let (storage, backend, registry) = registry();

        registry
            .async_get_or_create("input_number", "input_number", "slider", "Slider", None, |_| false)
            .unwrap();
        assert_eq!(backend.write_count(), 0);

        tokio::time::sleep(SAVE_DELAY + Duration::from_secs(1)).await;
        assert_eq!(backend.write_count(), 1);

        let reloaded = EntityRegistry::new(&storage);
        reloaded.async_load().await.unwrap();
        assert_eq!(reloaded.entity_ids(), vec!["input_number.slider"]);
        assert_eq!(
            reloaded.async_get_entity_id("input_number", "input_number", "slider"),
            Some("input_number.slider".to_string())
        );
    }

    fn deleted_entry(unique_id: &str, orphaned: DateTime<Utc>) -> serde_json::Value {
        json!({
            "id": format!("reg_{unique_id}"),
            "entity_id": format!("input_boolean.{unique_id}"),
            "unique_id": unique_id,
            "platform": "input_boolean",
            "orphaned_timestamp": orphaned,
        })
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_removed_entries_are_orphaned_and_expire() {
        let (_storage, _backend, registry) = registry();
        registry
            .async_get_or_create("input_boolean", "input_boolean", "hall", "Hall", None, |_| false)
            .unwrap();
        let removed = registry.async_remove("input_boolean.hall").unwrap();
        assert_eq!(removed.orphaned_timestamp, None);

        let key = removed.unique_key();
        let orphan = registry.deleted.read().unwrap().get(&key).cloned().unwrap();
        assert!(orphan.orphaned_timestamp.is_some());

        let restored = registry
            .async_get_or_create("input_boolean", "input_boolean", "hall", "Hall", None, |_| false)
            .unwrap();
        assert_eq!(restored.orphaned_timestamp, None);

        let (storage, backend, _) = self::registry();
        let expired = Utc::now() - chrono::Duration::days(ORPHANED_ENTITY_KEEP_DAYS + 1);
        backend.insert(
            STORAGE_KEY,
            json!({
                "version": STORAGE_VERSION,
                "minor_version": STORAGE_MINOR_VERSION,
                "key": STORAGE_KEY,
                "data": {
                    "entities": [],
                    "deleted_entities": [
                        deleted_entry("old", expired),
                        deleted_entry("recent", Utc::now()),
                    ]
                }
            })
            .to_string(),
        );

        let reloaded = EntityRegistry::new(&storage);
        reloaded.async_load().await.unwrap();
        let kept: Vec<String> = reloaded
            .deleted
            .read()
            .unwrap()
            .values()
            .map(|entry| entry.unique_id.clone())
            .collect();
        assert_eq!(kept, vec!["recent"]);

        tokio::time::sleep(SAVE_DELAY + Duration::from_secs(1)).await;
        let saved = backend.get_json(STORAGE_KEY).unwrap();
        assert_eq!(saved["data"]["deleted_entities"].as_array().unwrap().len(), 1);
    }
}
