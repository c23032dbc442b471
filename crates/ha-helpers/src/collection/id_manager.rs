use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use ha_core::util::{ensure_unique_string, slugify};

use super::observable::ItemData;

/// Id space shared by several collections
///
/// Generated ids are unique across every collection registered here at the
/// moment of generation.
#[derive(Default)]
pub struct IdManager {
    collections: RwLock<Vec<ItemData>>,
    /// Held from generating an id until the owner has inserted it
    claim: Mutex<()>,
}

impl IdManager {
    /// Create a manager tracking no collections
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add_collection(&self, data: ItemData) {
        if let Ok(mut collections) = self.collections.write() {
            collections.push(data);
        }
    }

    /// True if any registered collection holds `item_id`
    pub fn has_id(&self, item_id: &str) -> bool {
        self.collections
            .read()
            .map(|collections| {
                collections.iter().any(|data| {
                    data.read()
                        .map(|items| items.contains_key(item_id))
                        .unwrap_or(false)
                })
            })
            .unwrap_or(false)
    }

    /// Slugify `suggestion`, then append `_2`, `_3`, ... until unused
    pub fn generate_id(&self, suggestion: &str) -> String {
        ensure_unique_string(&slugify(suggestion), |candidate| self.has_id(candidate))
    }

    /// Generate an id and hand it to `claim` before anyone else can
    pub(crate) fn claim_id<R>(&self, suggestion: &str, claim: impl FnOnce(String) -> R) -> R {
        let _guard: MutexGuard<'_, ()> = match self.claim.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        claim(self.generate_id(suggestion))
    }
}

impl std::fmt::Debug for IdManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.collections.read().map(|c| c.len()).unwrap_or(0);
        f.debug_struct("IdManager").field("collections", &count).finish()
    }
}

/// Shared reference to an id manager
pub type SharedIdManager = Arc<IdManager>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::Item;
    use indexmap::IndexMap;

    fn data(ids: &[&str]) -> ItemData {
        let map: IndexMap<String, Item> = ids
            .iter()
            .map(|id| (id.to_string(), Item::new()))
            .collect();
        Arc::new(RwLock::new(map))
    }

    #[test]
    fn test_generate_id_across_collections() {
        let manager = IdManager::new();
        manager.add_collection(data(&["hello"]));
        manager.add_collection(data(&["hello_2", "bye"]));

        assert!(manager.has_id("bye"));
        assert!(!manager.has_id("hola"));

        assert_eq!(manager.generate_id("Hello"), "hello_3");
        assert_eq!(manager.generate_id("Bye!"), "bye_2");
        assert_eq!(manager.generate_id("Good Morning"), "good_morning");
    }

    #[test]
    fn test_generate_id_transliterates_names() {
        let manager = IdManager::new();
        manager.add_collection(data(&["kuche"]));

        assert_eq!(manager.generate_id("Küche"), "kuche_2");
        assert_eq!(manager.generate_id("Café Licht"), "cafe_licht");
        assert_ne!(manager.generate_id("客厅"), "unknown");
    }

    #[test]
    fn test_generation_sees_later_insertions() {
        let manager = IdManager::new();
        let items = data(&[]);
        manager.add_collection(items.clone());

        let id = manager.claim_id("Mock 3", |id| {
            items.write().unwrap().insert(id.clone(), Item::new());
            id
        });
        assert_eq!(id, "mock_3");
        assert_eq!(manager.generate_id("mock 3"), "mock_3_2");
    }
}
