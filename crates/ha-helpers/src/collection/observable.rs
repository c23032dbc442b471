use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use futures::future::{try_join_all, BoxFuture, FutureExt};
use indexmap::IndexMap;
use tracing::debug;

use super::{CollectionChange, CollectionError, IdManager, Item};

/// Item storage shared between a collection and its [`IdManager`]
pub(crate) type ItemData = Arc<RwLock<IndexMap<String, Item>>>;

type ChangeListener =
    Arc<dyn Fn(CollectionChange) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;
type ChangeSetListener =
    Arc<dyn Fn(Vec<CollectionChange>) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

#[derive(Clone)]
enum Listener {
    Change(ChangeListener),
    ChangeSet(ChangeSetListener),
}

#[derive(Default)]
struct Listeners {
    next_id: AtomicU64,
    registered: RwLock<IndexMap<u64, Listener>>,
}

impl Listeners {
    fn add(self: &Arc<Self>, listener: Listener) -> ListenerRemover {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut registered) = self.registered.write() {
            registered.insert(id, listener);
        }
        ListenerRemover {
            listeners: Arc::downgrade(self),
            id,
        }
    }

    fn snapshot(&self) -> Vec<Listener> {
        self.registered
            .read()
            .map(|r| r.values().cloned().collect())
            .unwrap_or_default()
    }
}

/// Unregisters a collection listener; dropping it keeps the listener
pub struct ListenerRemover {
    listeners: Weak<Listeners>,
    id: u64,
}

impl ListenerRemover {
    /// Returns false if the listener was already gone
    pub fn remove(self) -> bool {
        self.listeners
            .upgrade()
            .and_then(|listeners| {
                listeners
                    .registered
                    .write()
                    .ok()
                    .map(|mut r| r.shift_remove(&self.id).is_some())
            })
            .unwrap_or(false)
    }
}

/// Items keyed by id, plus the listeners that hear about every change
///
/// Mutation is reserved to the collection flavors in this module; outside
/// code only reads and listens.
pub struct ObservableCollection {
    id_manager: Arc<IdManager>,
    data: ItemData,
    listeners: Arc<Listeners>,
}

impl ObservableCollection {
    /// Register a fresh item map with `id_manager`, or with a private
    /// manager when none is shared
    pub fn new(id_manager: Option<Arc<IdManager>>) -> Self {
        let id_manager = id_manager.unwrap_or_default();
        let data: ItemData = Arc::new(RwLock::new(IndexMap::new()));
        id_manager.add_collection(data.clone());

        Self {
            id_manager,
            data,
            listeners: Arc::new(Listeners::default()),
        }
    }

    /// Id manager this collection registered with
    pub fn id_manager(&self) -> &Arc<IdManager> {
        &self.id_manager
    }

    /// Snapshot of all items, in insertion order
    pub fn async_items(&self) -> Vec<Item> {
        self.data
            .read()
            .map(|items| items.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Get an item by id
    pub fn get(&self, item_id: &str) -> Option<Item> {
        self.data
            .read()
            .ok()
            .and_then(|items| items.get(item_id).cloned())
    }

    pub fn contains(&self, item_id: &str) -> bool {
        self.data
            .read()
            .map(|items| items.contains_key(item_id))
            .unwrap_or(false)
    }

    pub fn item_ids(&self) -> Vec<String> {
        self.data
            .read()
            .map(|items| items.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.data.read().map(|items| items.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hear about every change, one call per change
    pub fn async_add_listener<F, Fut>(&self, listener: F) -> ListenerRemover
    where
        F: Fn(CollectionChange) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.listeners
            .add(Listener::Change(Arc::new(move |change| listener(change).boxed())))
    }

    /// Hear about every notification as one batch of changes
    pub fn async_add_change_set_listener<F, Fut>(&self, listener: F) -> ListenerRemover
    where
        F: Fn(Vec<CollectionChange>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.listeners
            .add(Listener::ChangeSet(Arc::new(move |changes| listener(changes).boxed())))
    }

    /// Run every listener on `changes` concurrently and wait for all
    ///
    /// The first listener error is returned; the other listeners of this
    /// notification are dropped at that point.
    pub async fn notify_changes(&self, changes: Vec<CollectionChange>) -> Result<(), CollectionError> {
        if changes.is_empty() {
            return Ok(());
        }

        let listeners = self.listeners.snapshot();
        debug!(
            changes = changes.len(),
            listeners = listeners.len(),
            "Notifying collection listeners"
        );

        let mut calls: Vec<BoxFuture<'static, anyhow::Result<()>>> = Vec::new();
        for listener in listeners {
            match listener {
                Listener::Change(listener) => {
                    calls.extend(changes.iter().cloned().map(|change| listener(change)));
                }
                Listener::ChangeSet(listener) => calls.push(listener(changes.clone())),
            }
        }

        try_join_all(calls)
            .await
            .map(|_| ())
            .map_err(CollectionError::Listener)
    }

    pub(crate) fn data(&self) -> &ItemData {
        &self.data
    }

    /// Insert or replace without notifying
    pub(crate) fn insert(&self, item_id: String, item: Item) {
        if let Ok(mut items) = self.data.write() {
            items.insert(item_id, item);
        }
    }

    pub(crate) fn remove(&self, item_id: &str) -> Option<Item> {
        self.data
            .write()
            .ok()
            .and_then(|mut items| items.shift_remove(item_id))
    }
}
