//! Versioned JSON persistence under `.storage/`
//!
//! [`Storage`] is the per-instance persistence context: it owns the backend
//! (the `.storage/` directory, or memory in tests), knows the instance
//! lifecycle state, and hands out typed [`Store`] handles, one per storage
//! key.
//!
//! On disk every document is wrapped in a version envelope:
//!
//! ```json
//! {
//!   "version": 1,
//!   "minor_version": 1,
//!   "key": "input_boolean",
//!   "data": { "items": [] }
//! }
//! ```

mod backend;
mod store;

pub use backend::{FileBackend, MemoryBackend, StorageBackend};
pub use store::{MigrationFn, Store, StoreData, StoreOptions};

use ha_core::SharedCoreState;
use ha_event_bus::EventBus;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::debug;

/// Errors from reading, migrating or writing stored documents
#[derive(Debug, Error)]
pub enum StorageError {
    /// Reading or writing the backing file failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The document is not valid JSON or does not match its type
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Stored version is older and the store has no migration function
    #[error("Migration required for {key}: stored version {from} does not match {to}")]
    MigrationRequired { key: String, from: u32, to: u32 },

    /// Stored major version is newer than this build understands
    #[error("Unsupported storage version for {key}: found {found}, supports up to {supported}")]
    UnsupportedVersion {
        key: String,
        found: u32,
        supported: u32,
    },

    /// The migration function returned an error
    #[error("Migration of {key} failed: {message}")]
    MigrationFailed { key: String, message: String },
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// The on-disk envelope around a stored document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageFile<T> {
    /// Major version, bumped on breaking changes
    pub version: u32,
    /// Documents written before minor versions existed lack this field
    #[serde(default = "default_minor_version")]
    pub minor_version: u32,
    pub key: String,
    pub data: T,
}

fn default_minor_version() -> u32 {
    1
}

/// Persistence context shared by every [`Store`] of one instance
#[derive(Clone)]
pub struct Storage {
    inner: Arc<StorageInner>,
}

struct StorageInner {
    backend: Arc<dyn StorageBackend>,
    bus: Arc<EventBus>,
    core_state: SharedCoreState,
    /// Final-write listeners and delayed-write timers, awaited during
    /// shutdown
    final_writes: Mutex<Vec<JoinHandle<()>>>,
}

impl Storage {
    /// Storage in `<config_dir>/.storage`
    pub fn new(
        config_dir: impl AsRef<Path>,
        bus: Arc<EventBus>,
        core_state: SharedCoreState,
    ) -> Self {
        Self::with_backend(
            Arc::new(FileBackend::new(config_dir.as_ref().join(".storage"))),
            bus,
            core_state,
        )
    }

    /// Create storage on top of an explicit backend
    pub fn with_backend(
        backend: Arc<dyn StorageBackend>,
        bus: Arc<EventBus>,
        core_state: SharedCoreState,
    ) -> Self {
        Self {
            inner: Arc::new(StorageInner {
                backend,
                bus,
                core_state,
                final_writes: Mutex::new(Vec::new()),
            }),
        }
    }

    /// A store for `key` at `version`.1
    pub fn store<T: StoreData>(&self, key: impl Into<String>, version: u32) -> Store<T> {
        self.store_with_options(key, version, StoreOptions::default())
    }

    /// Create a store for `key` with migration and read-only settings
    pub fn store_with_options<T: StoreData>(
        &self,
        key: impl Into<String>,
        version: u32,
        options: StoreOptions,
    ) -> Store<T> {
        Store::new(self.clone(), key.into(), version, options)
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.inner.backend
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.inner.bus
    }

    pub fn core_state(&self) -> &SharedCoreState {
        &self.inner.core_state
    }

    /// Wait until every store has flushed in response to
    /// `homeassistant_final_write`. Only meaningful after that event fired.
    pub async fn async_wait_final_writes(&self) {
        loop {
            let handles: Vec<_> = match self.inner.final_writes.lock() {
                Ok(mut guard) => guard.drain(..).collect(),
                Err(poisoned) => poisoned.into_inner().drain(..).collect(),
            };
            if handles.is_empty() {
                break;
            }
            debug!(count = handles.len(), "Waiting for final writes");
            for handle in handles {
                // Cancelled tasks have nothing left to write
                let _ = handle.await;
            }
        }
    }

    fn track_final_write(&self, handle: JoinHandle<()>) {
        let mut guard = match self.inner.final_writes.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.retain(|h| !h.is_finished());
        guard.push(handle);
    }
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("backend", &self.inner.backend)
            .field("core_state", &self.inner.core_state.get())
            .finish()
    }
}
