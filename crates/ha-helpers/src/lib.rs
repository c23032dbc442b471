//! Helpers that integrations build on
//!
//! - [`collection`]: observable sets of user-managed config items, loaded
//!   from YAML or kept in storage, with change notification
//! - [`entity`]: the entity trait and its attachment to the state store
//! - [`entity_component`]: owns the live entities of one domain

pub mod collection;
pub mod entity;
pub mod entity_component;

pub use collection::{
    attach_entity_registry_cleaner, sync_entity_lifecycle, ChangeType, Collection,
    CollectionChange, CollectionError, IdLessCollection, IdManager, Item, ItemSource,
    ItemValidator, ListenerRemover, ObservableCollection, SerializedStorageCollection,
    StorageCollection, YamlCollection,
};
pub use entity::{CollectionEntity, Entity, EntityBase};
pub use entity_component::{EntityComponent, EntityComponentError, SharedEntityComponent};
