//! Collections of user-managed configuration items
//!
//! A collection maps item ids to [`Item`]s and tells its listeners about
//! every addition, update and removal. [`YamlCollection`] mirrors a section
//! of `configuration.yaml`; [`StorageCollection`] owns items created at
//! runtime and persists them through a [`Store`](ha_registries::Store).
//! Several collections of one helper type share an [`IdManager`] so their
//! ids never collide.

mod id_manager;
mod lifecycle;
mod observable;
mod storage;
mod yaml;

pub use id_manager::IdManager;
pub use lifecycle::{attach_entity_registry_cleaner, sync_entity_lifecycle};
pub use observable::{ListenerRemover, ObservableCollection};
pub use storage::{ItemValidator, SerializedStorageCollection, StorageCollection, SAVE_DELAY};
pub use yaml::{IdLessCollection, YamlCollection};

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use ha_registries::StorageError;

/// A configuration item; always carries a string `id`
pub type Item = serde_json::Map<String, serde_json::Value>;

/// Kind of change announced to collection listeners
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    /// Item appeared, on load or create
    Added,
    /// Item replaced by a new version
    Updated,
    /// Item deleted or gone from the source
    Removed,
}

impl ChangeType {
    /// Wire name used in websocket subscriptions
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Added => "added",
            ChangeType::Updated => "updated",
            ChangeType::Removed => "removed",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One mutation of a collection
///
/// For removals `item` is the item as it was before removal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionChange {
    /// What happened to the item
    pub change_type: ChangeType,
    /// Id of the affected item
    pub item_id: String,
    /// The item after the change
    pub item: Item,
}

impl CollectionChange {
    /// Create a change record
    pub fn new(change_type: ChangeType, item_id: impl Into<String>, item: Item) -> Self {
        Self {
            change_type,
            item_id: item_id.into(),
            item,
        }
    }
}

/// Where the items of a collection come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemSource {
    /// `configuration.yaml`; read-only at runtime
    Yaml,
    /// Created through the API and persisted in `.storage/`
    Storage,
}

/// Errors from collection loads, mutations and listeners
#[derive(Debug, Error)]
pub enum CollectionError {
    /// No item with this id
    #[error("Item {0} not found.")]
    ItemNotFound(String),

    /// Data rejected by the integration's validation
    #[error("{0}")]
    Invalid(String),

    /// An update tried to change `id`
    #[error("Cannot update ID")]
    CannotUpdateId,

    /// A change listener failed
    #[error("Collection listener failed: {0}")]
    Listener(#[source] anyhow::Error),

    /// Loading the persisted items failed
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Read access shared by every collection flavor
pub trait Collection: Send + Sync {
    fn observable(&self) -> &ObservableCollection;

    fn item_source(&self) -> ItemSource;

    /// Snapshot of all items in insertion order
    fn async_items(&self) -> Vec<Item> {
        self.observable().async_items()
    }

    fn get(&self, item_id: &str) -> Option<Item> {
        self.observable().get(item_id)
    }
}
