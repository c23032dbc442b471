//! Keeps entities and the entity registry in step with a collection

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use futures::future::{try_join_all, BoxFuture, FutureExt};
use ha_registries::EntityRegistry;
use tracing::{debug, warn};

use super::{ChangeType, Collection, CollectionChange, ItemSource, ListenerRemover};
use crate::entity::{CollectionEntity, Entity};
use crate::entity_component::EntityComponent;

type Tracked<E> = Arc<Mutex<HashMap<String, Arc<E>>>>;

/// Create, update and remove one entity per item of `collection`
///
/// Entities for added items come from [`CollectionEntity::from_yaml`] or
/// [`CollectionEntity::from_storage`] depending on where the collection's
/// items come from, and are added to `component` under `platform` once the
/// updates and removals of the same change set have finished.
pub fn sync_entity_lifecycle<C, E>(
    component: Arc<EntityComponent<E>>,
    platform: impl Into<String>,
    collection: &C,
) -> ListenerRemover
where
    C: Collection + ?Sized,
    E: CollectionEntity,
{
    let platform = platform.into();
    let source = collection.item_source();
    let tracked: Tracked<E> = Arc::new(Mutex::new(HashMap::new()));

    collection
        .observable()
        .async_add_change_set_listener(move |changes| {
            let component = component.clone();
            let platform = platform.clone();
            let tracked = tracked.clone();
            async move { apply_changes(component, platform, source, tracked, changes).await }
        })
}

async fn apply_changes<E: CollectionEntity>(
    component: Arc<EntityComponent<E>>,
    platform: String,
    source: ItemSource,
    tracked: Tracked<E>,
    changes: Vec<CollectionChange>,
) -> anyhow::Result<()> {
    let mut new_entities = Vec::new();
    let mut pending: Vec<BoxFuture<'static, anyhow::Result<()>>> = Vec::new();

    for CollectionChange {
        change_type,
        item_id,
        item,
    } in changes
    {
        match change_type {
            ChangeType::Added => {
                let entity = Arc::new(match source {
                    ItemSource::Yaml => E::from_yaml(item)?,
                    ItemSource::Storage => E::from_storage(item)?,
                });
                forget_on_remove(&tracked, &item_id, &entity);
                lock(&tracked).insert(item_id, entity.clone());
                new_entities.push(entity);
            }
            ChangeType::Updated => {
                let Some(entity) = lock(&tracked).get(&item_id).cloned() else {
                    warn!(item_id, "Update for an item without entity");
                    continue;
                };
                pending.push(async move { entity.async_update_config(item).await }.boxed());
            }
            ChangeType::Removed => {
                let Some(entity) = lock(&tracked).remove(&item_id) else {
                    continue;
                };
                let component = component.clone();
                pending.push(
                    async move {
                        if let Some(entity_id) = entity.entity_id() {
                            component.async_remove_entity(&entity_id.to_string()).await?;
                        }
                        Ok(())
                    }
                    .boxed(),
                );
            }
        }
    }

    if !pending.is_empty() {
        try_join_all(pending).await?;
    }
    if !new_entities.is_empty() {
        debug!(platform, count = new_entities.len(), "Adding collection entities");
        component.async_add_entities(&platform, new_entities).await;
    }
    Ok(())
}

/// Drop the tracking entry when the entity goes away on its own, unless the
/// item has been given a new entity meanwhile
fn forget_on_remove<E: CollectionEntity>(tracked: &Tracked<E>, item_id: &str, entity: &Arc<E>) {
    let tracked: Weak<Mutex<HashMap<String, Arc<E>>>> = Arc::downgrade(tracked);
    let this: Weak<E> = Arc::downgrade(entity);
    let item_id = item_id.to_string();

    entity.base().async_on_remove(move || {
        let Some(tracked) = tracked.upgrade() else {
            return;
        };
        let mut tracked = lock(&tracked);
        if tracked
            .get(&item_id)
            .is_some_and(|current| std::ptr::eq(Arc::as_ptr(current), this.as_ptr()))
        {
            tracked.remove(&item_id);
        }
    });
}

fn lock<E>(
    tracked: &Mutex<HashMap<String, Arc<E>>>,
) -> std::sync::MutexGuard<'_, HashMap<String, Arc<E>>> {
    tracked.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Remove the registry entry of every storage item that is deleted
pub fn attach_entity_registry_cleaner<C>(
    registry: Arc<EntityRegistry>,
    domain: impl Into<String>,
    platform: impl Into<String>,
    collection: &C,
) -> ListenerRemover
where
    C: Collection + ?Sized,
{
    let domain = domain.into();
    let platform = platform.into();

    collection.observable().async_add_listener(move |change| {
        let registry = registry.clone();
        let domain = domain.clone();
        let platform = platform.clone();
        async move {
            if change.change_type != ChangeType::Removed {
                return Ok(());
            }
            if let Some(entity_id) =
                registry.async_get_entity_id(&domain, &platform, &change.item_id)
            {
                registry.async_remove(&entity_id)?;
            }
            Ok(())
        }
    })
}
