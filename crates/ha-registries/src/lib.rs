//! Home Assistant persistence and registries
//!
//! - [`storage`]: versioned JSON documents in `.storage/` with debounced
//!   saves and a final flush on shutdown
//! - [`entity_registry`]: stable entity ids keyed by unique id

pub mod entity_registry;
pub mod storage;

pub use entity_registry::{EntityEntry, EntityRegistry, EntityRegistryData, EntityRegistryError};
pub use storage::{
    FileBackend, MemoryBackend, MigrationFn, Storage, StorageBackend, StorageError, StorageFile,
    StorageResult, Store, StoreData, StoreOptions,
};
