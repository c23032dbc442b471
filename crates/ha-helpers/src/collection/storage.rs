use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ha_core::CONF_ID;
use ha_registries::Store;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use super::{
    ChangeType, Collection, CollectionChange, CollectionError, IdManager, Item, ItemSource,
    ObservableCollection,
};

/// Quiet period before mutations are persisted
pub const SAVE_DELAY: Duration = Duration::from_secs(10);

/// Persisted shape of a storage collection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SerializedStorageCollection {
    pub items: Vec<Item>,
}

/// Integration-specific validation for a [`StorageCollection`]
#[async_trait]
pub trait ItemValidator: Send + Sync + 'static {
    /// Validate and normalize a creation payload. Must not assign `id`.
    async fn process_create_data(&self, data: Item) -> Result<Item, CollectionError>;

    /// Human readable seed for the id of a newly created item
    fn get_suggested_id(&self, info: &Item) -> String;

    /// Validate `update_data` and merge it into `item`
    async fn update_data(&self, item: &Item, update_data: Item) -> Result<Item, CollectionError>;
}

/// Items created and edited at runtime, persisted in `.storage/`
pub struct StorageCollection<V: ItemValidator> {
    base: ObservableCollection,
    store: Store<SerializedStorageCollection>,
    validator: V,
}

impl<V: ItemValidator> StorageCollection<V> {
    /// Create an empty collection; call `async_load` before use
    pub fn new(
        store: Store<SerializedStorageCollection>,
        id_manager: Option<Arc<IdManager>>,
        validator: V,
    ) -> Self {
        Self {
            base: ObservableCollection::new(id_manager),
            store,
            validator,
        }
    }

    pub fn store(&self) -> &Store<SerializedStorageCollection> {
        &self.store
    }

    pub fn validator(&self) -> &V {
        &self.validator
    }

    /// Load persisted items and announce each of them as added
    pub async fn async_load(&self) -> Result<(), CollectionError> {
        let stored = self.store.async_load().await?.unwrap_or_default();

        let mut changes = Vec::with_capacity(stored.items.len());
        for item in stored.items {
            let Some(item_id) = item.get(CONF_ID).and_then(Value::as_str).map(String::from) else {
                continue;
            };
            self.base.insert(item_id.clone(), item.clone());
            changes.push(CollectionChange::new(ChangeType::Added, item_id, item));
        }

        info!(key = %self.store.key(), items = changes.len(), "Loaded storage collection");
        self.base.notify_changes(changes).await
    }

    /// Validate `data`, assign it a unique id derived from its suggested id
    /// and add it
    ///
    /// Listeners see `added` before this returns.
    pub async fn async_create_item(&self, data: Item) -> Result<Item, CollectionError> {
        let validated = self.validator.process_create_data(data).await?;
        let suggestion = self.validator.get_suggested_id(&validated);

        let item = self.base.id_manager().claim_id(&suggestion, |item_id| {
            let mut item = Item::new();
            item.insert(CONF_ID.to_string(), Value::String(item_id.clone()));
            for (key, value) in validated {
                if key != CONF_ID {
                    item.insert(key, value);
                }
            }
            self.base.insert(item_id, item.clone());
            item
        });
        let item_id = item_id_of(&item);

        debug!(key = %self.store.key(), item_id = %item_id, "Created item");
        self.async_schedule_save();
        self.base
            .notify_changes(vec![CollectionChange::new(
                ChangeType::Added,
                item_id,
                item.clone(),
            )])
            .await?;
        Ok(item)
    }

    /// Validate and apply `updates` to an existing item
    ///
    /// `id` can never change.
    pub async fn async_update_item(
        &self,
        item_id: &str,
        updates: Item,
    ) -> Result<Item, CollectionError> {
        let current = self
            .base
            .get(item_id)
            .ok_or_else(|| CollectionError::ItemNotFound(item_id.to_string()))?;

        if updates.contains_key(CONF_ID) {
            return Err(CollectionError::CannotUpdateId);
        }

        let mut updated = self.validator.update_data(&current, updates).await?;
        updated.insert(CONF_ID.to_string(), Value::String(item_id.to_string()));

        // Deleted while the validator ran
        if !self.base.contains(item_id) {
            return Err(CollectionError::ItemNotFound(item_id.to_string()));
        }
        self.base.insert(item_id.to_string(), updated.clone());

        debug!(key = %self.store.key(), item_id, "Updated item");
        self.async_schedule_save();
        self.base
            .notify_changes(vec![CollectionChange::new(
                ChangeType::Updated,
                item_id,
                updated.clone(),
            )])
            .await?;
        Ok(updated)
    }

    /// Remove an item and announce `removed`
    pub async fn async_delete_item(&self, item_id: &str) -> Result<(), CollectionError> {
        let item = self
            .base
            .remove(item_id)
            .ok_or_else(|| CollectionError::ItemNotFound(item_id.to_string()))?;

        debug!(key = %self.store.key(), item_id, "Deleted item");
        self.async_schedule_save();
        self.base
            .notify_changes(vec![CollectionChange::new(
                ChangeType::Removed,
                item_id,
                item,
            )])
            .await
    }

    /// Persist the current items once mutations have been quiet for
    /// [`SAVE_DELAY`]
    pub fn async_schedule_save(&self) {
        let data = self.base.data().clone();
        self.store.async_delay_save(
            move || SerializedStorageCollection {
                items: data
                    .read()
                    .map(|items| items.values().cloned().collect())
                    .unwrap_or_default(),
            },
            SAVE_DELAY,
        );
    }
}

impl<V: ItemValidator> Collection for StorageCollection<V> {
    fn observable(&self) -> &ObservableCollection {
        &self.base
    }

    fn item_source(&self) -> ItemSource {
        ItemSource::Storage
    }
}

fn item_id_of(item: &Item) -> String {
    item.get(CONF_ID)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ha_core::{CoreState, SharedCoreState};
    use ha_event_bus::EventBus;
    use ha_registries::{MemoryBackend, Storage};
    use serde_json::json;
    use std::sync::Mutex;

    /// Accepts anything with a string `name`; updates replace all fields
    struct NameValidator;

    #[async_trait]
    impl ItemValidator for NameValidator {
        async fn process_create_data(&self, data: Item) -> Result<Item, CollectionError> {
            match data.get("name") {
                Some(Value::String(_)) => Ok(data),
                _ => Err(CollectionError::Invalid(
                    "required key not provided @ data['name']".into(),
                )),
            }
        }

        fn get_suggested_id(&self, info: &Item) -> String {
            info["name"].as_str().unwrap_or_default().to_string()
        }

        async fn update_data(&self, item: &Item, update_data: Item) -> Result<Item, CollectionError> {
            let mut merged = item.clone();
            merged.extend(update_data);
            Ok(merged)
        }
    }

    fn item(value: Value) -> Item {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn setup() -> (Storage, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        let storage = Storage::with_backend(
            backend.clone(),
            Arc::new(EventBus::new()),
            SharedCoreState::new(CoreState::Running),
        );
        (storage, backend)
    }

    fn collection(storage: &Storage) -> StorageCollection<NameValidator> {
        StorageCollection::new(storage.store("test_data", 1), None, NameValidator)
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_create_assigns_slug_id_first() {
        let (storage, _backend) = setup();
        let coll = collection(&storage);

        let created = coll
            .async_create_item(item(json!({"name": "Mock 3"})))
            .await
            .unwrap();
        assert_eq!(created["id"], "mock_3");
        assert_eq!(created.keys().next().map(String::as_str), Some("id"));

        let items = coll.async_items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["name"], "Mock 3");

        let again = coll
            .async_create_item(item(json!({"name": "Mock 3"})))
            .await
            .unwrap();
        assert_eq!(again["id"], "mock_3_2");
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_invalid_create_adds_nothing() {
        let (storage, backend) = setup();
        let coll = collection(&storage);

        let err = coll
            .async_create_item(item(json!({"icon": "mdi:x"})))
            .await
            .unwrap_err();
        assert!(matches!(err, CollectionError::Invalid(_)));
        assert!(coll.async_items().is_empty());

        tokio::time::sleep(SAVE_DELAY * 2).await;
        assert_eq!(backend.write_count(), 0);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_update_rejects_id_and_unknown_items() {
        let (storage, _backend) = setup();
        let coll = collection(&storage);
        coll.async_create_item(item(json!({"name": "Hall"})))
            .await
            .unwrap();

        let err = coll
            .async_update_item("hall", item(json!({"id": "other"})))
            .await
            .unwrap_err();
        assert!(matches!(err, CollectionError::CannotUpdateId));
        assert_eq!(coll.get("hall").unwrap()["name"], "Hall");
        assert!(coll.get("other").is_none());

        let err = coll
            .async_update_item("nope", item(json!({"name": "x"})))
            .await
            .unwrap_err();
        assert!(matches!(err, CollectionError::ItemNotFound(id) if id == "nope"));

        let updated = coll
            .async_update_item("hall", item(json!({"name": "Hallway"})))
            .await
            .unwrap();
        assert_eq!(updated, item(json!({"id": "hall", "name": "Hallway"})));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_delete_then_not_found() {
        let (storage, _backend) = setup();
        let coll = collection(&storage);
        coll.async_create_item(item(json!({"name": "Hall"})))
            .await
            .unwrap();

        tokio_test::assert_ok!(coll.async_delete_item("hall").await);
        tokio_test::assert_err!(coll.async_delete_item("hall").await);
        assert!(matches!(
            coll.async_delete_item("hall").await,
            Err(CollectionError::ItemNotFound(_))
        ));
        assert!(matches!(
            coll.async_update_item("hall", Item::new()).await,
            Err(CollectionError::ItemNotFound(_))
        ));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_mutations_coalesce_into_one_write_and_reload() {
        let (storage, backend) = setup();
        let coll = collection(&storage);

        coll.async_create_item(item(json!({"name": "One"})))
            .await
            .unwrap();
        coll.async_create_item(item(json!({"name": "Two"})))
            .await
            .unwrap();
        coll.async_update_item("one", item(json!({"initial": true})))
            .await
            .unwrap();
        coll.async_delete_item("two").await.unwrap();
        assert_eq!(backend.write_count(), 0);

        tokio::time::sleep(SAVE_DELAY + Duration::from_secs(1)).await;
        assert_eq!(backend.write_count(), 1);
        assert_eq!(
            backend.get_json("test_data").unwrap()["data"],
            json!({"items": [{"id": "one", "name": "One", "initial": true}]})
        );

        let reloaded = collection(&storage);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _listener = reloaded.observable().async_add_listener(move |change| {
            let sink = sink.clone();
            async move {
                sink.lock().unwrap().push((change.change_type, change.item_id));
                Ok(())
            }
        });
        reloaded.async_load().await.unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![(ChangeType::Added, "one".to_string())]
        );
        assert_eq!(
            reloaded.get("one").unwrap(),
            item(json!({"id": "one", "name": "One", "initial": true}))
        );
    }

    #[tokio::test]
    async fn test_load_without_document_is_empty() {
        let (storage, _backend) = setup();
        let coll = collection(&storage);
        coll.async_load().await.unwrap();
        assert!(coll.async_items().is_empty());
    }
}
