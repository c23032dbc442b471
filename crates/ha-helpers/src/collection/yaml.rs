use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ha_core::CONF_ID;
use serde_json::Value;
use tracing::{debug, warn};

use super::{
    ChangeType, Collection, CollectionChange, CollectionError, IdManager, Item, ItemSource,
    ObservableCollection,
};

/// Mirror of a YAML configuration section
///
/// Every [`async_load`](Self::async_load) replaces the whole content and
/// notifies `updated` for items that stay, `added` for new ones and
/// `removed` for those that disappeared.
pub struct YamlCollection {
    base: ObservableCollection,
}

impl YamlCollection {
    /// Create an empty collection
    pub fn new(id_manager: Option<Arc<IdManager>>) -> Self {
        Self {
            base: ObservableCollection::new(id_manager),
        }
    }

    /// Replace the contents with `items`, announcing the difference
    pub async fn async_load(&self, items: Vec<Item>) -> Result<(), CollectionError> {
        let mut new_ids = HashSet::new();
        let mut changes = Vec::new();

        for item in items {
            let Some(item_id) = item.get(CONF_ID).and_then(Value::as_str).map(String::from) else {
                warn!("Skipping YAML item without an id");
                continue;
            };

            if new_ids.contains(&item_id) {
                warn!(item_id = %item_id, "Duplicate ID detected, skipping");
                continue;
            }

            let change_type = if self.base.contains(&item_id) {
                ChangeType::Updated
            } else if self.base.id_manager().has_id(&item_id) {
                warn!(item_id = %item_id, "Duplicate ID detected, skipping");
                continue;
            } else {
                ChangeType::Added
            };

            new_ids.insert(item_id.clone());
            self.base.insert(item_id.clone(), item.clone());
            changes.push(CollectionChange::new(change_type, item_id, item));
        }

        for item_id in self.base.item_ids() {
            if new_ids.contains(&item_id) {
                continue;
            }
            if let Some(item) = self.base.remove(&item_id) {
                changes.push(CollectionChange::new(ChangeType::Removed, item_id, item));
            }
        }

        debug!(changes = changes.len(), "Loaded YAML collection");
        self.base.notify_changes(changes).await
    }
}

impl Collection for YamlCollection {
    fn observable(&self) -> &ObservableCollection {
        &self.base
    }

    fn item_source(&self) -> ItemSource {
        ItemSource::Yaml
    }
}

/// YAML collection for configs that carry no id of their own
///
/// Each load removes everything and re-adds the new items under fresh
/// `fakeid-N` ids.
pub struct IdLessCollection {
    base: ObservableCollection,
    counter: AtomicUsize,
}

impl IdLessCollection {
    pub fn new(id_manager: Option<Arc<IdManager>>) -> Self {
        Self {
            base: ObservableCollection::new(id_manager),
            counter: AtomicUsize::new(0),
        }
    }

    /// Replace the contents with `items`
    pub async fn async_load(&self, items: Vec<Item>) -> Result<(), CollectionError> {
        let mut removed = Vec::new();
        for item_id in self.base.item_ids() {
            if let Some(item) = self.base.remove(&item_id) {
                removed.push(CollectionChange::new(ChangeType::Removed, item_id, item));
            }
        }
        self.base.notify_changes(removed).await?;

        let mut added = Vec::new();
        for mut item in items {
            let item_id = format!("fakeid-{}", self.counter.fetch_add(1, Ordering::SeqCst) + 1);
            item.insert(CONF_ID.to_string(), Value::String(item_id.clone()));
            self.base.insert(item_id.clone(), item.clone());
            added.push(CollectionChange::new(ChangeType::Added, item_id, item));
        }
        self.base.notify_changes(added).await
    }
}

impl Collection for IdLessCollection {
    fn observable(&self) -> &ObservableCollection {
        &self.base
    }

    fn item_source(&self) -> ItemSource {
        ItemSource::Yaml
    }
}
