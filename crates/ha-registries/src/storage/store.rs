//! Typed, debounced access to one storage key

use ha_core::events::HOMEASSISTANT_FINAL_WRITE;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::AbortHandle;
use tracing::{debug, error, info};

use super::{Storage, StorageError, StorageFile, StorageResult};

/// Anything a [`Store`] can hold
pub trait StoreData: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> StoreData for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// Upgrade stored data: `(old_major, old_minor, data) -> data`
pub type MigrationFn = fn(u32, u32, Value) -> StorageResult<Value>;

/// Optional settings for a [`Store`]
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Minor version written with new documents
    pub minor_version: u32,
    /// Never write, only load
    pub read_only: bool,
    /// Called with `(major, minor, data)` when the stored version is older
    pub migrate: Option<MigrationFn>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            minor_version: 1,
            read_only: false,
            migrate: None,
        }
    }
}

/// Typed handle on one versioned document
///
/// Cloning is cheap; clones share pending data and timers.
///
/// Writes are either immediate ([`Store::async_save`]) or debounced
/// ([`Store::async_delay_save`]). A debounced write evaluates its data
/// closure only when the write happens, so it always persists the latest
/// snapshot. While the instance is stopping, nothing is written until
/// `homeassistant_final_write` fires.
pub struct Store<T: StoreData> {
    inner: Arc<StoreInner<T>>,
}

impl<T: StoreData> Clone for Store<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct StoreInner<T> {
    storage: Storage,
    key: String,
    version: u32,
    options: StoreOptions,
    pending: Mutex<PendingState<T>>,
    write_lock: tokio::sync::Mutex<()>,
    load_lock: tokio::sync::Mutex<()>,
}

enum PendingData<T> {
    Value(T),
    Producer(Box<dyn FnOnce() -> T + Send>),
}

impl<T> PendingData<T> {
    fn resolve(self) -> T {
        match self {
            PendingData::Value(data) => data,
            PendingData::Producer(produce) => produce(),
        }
    }
}

struct PendingState<T> {
    data: Option<PendingData<T>>,
    delay_timer: Option<AbortHandle>,
    /// Bumped whenever the delay timer is replaced
    delay_generation: u64,
    final_write_listener: Option<AbortHandle>,
}

impl<T: StoreData> Store<T> {
    pub(super) fn new(storage: Storage, key: String, version: u32, options: StoreOptions) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                storage,
                key,
                version,
                options,
                pending: Mutex::new(PendingState {
                    data: None,
                    delay_timer: None,
                    delay_generation: 0,
                    final_write_listener: None,
                }),
                write_lock: tokio::sync::Mutex::new(()),
                load_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Storage key, also the file name under `.storage/`
    pub fn key(&self) -> &str {
        &self.inner.key
    }

    pub fn version(&self) -> u32 {
        self.inner.version
    }

    pub fn minor_version(&self) -> u32 {
        self.inner.options.minor_version
    }

    /// True while data is waiting to be written
    pub fn has_pending_write(&self) -> bool {
        self.pending().data.is_some()
    }

    fn pending(&self) -> MutexGuard<'_, PendingState<T>> {
        match self.inner.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    // ===== Loading =====

    /// Load the stored data, or `None` if nothing was stored yet
    ///
    /// Data waiting in a pending write wins over what is on disk. Loads are
    /// serialized per store.
    pub async fn async_load(&self) -> StorageResult<Option<T>> {
        let _guard = self.inner.load_lock.lock().await;

        {
            let mut pending = self.pending();
            if let Some(data) = pending.data.take() {
                let data = data.resolve();
                pending.data = Some(PendingData::Value(data.clone()));
                return Ok(Some(data));
            }
        }

        let Some(envelope) = self.read_envelope().await? else {
            return Ok(None);
        };

        let stored_major = envelope.version;
        let stored_minor = envelope.minor_version;

        if stored_major == self.inner.version && stored_minor == self.inner.options.minor_version
        {
            return Ok(Some(serde_json::from_value(envelope.data)?));
        }

        if stored_major > self.inner.version {
            return Err(StorageError::UnsupportedVersion {
                key: self.inner.key.clone(),
                found: stored_major,
                supported: self.inner.version,
            });
        }

        info!(
            key = %self.inner.key,
            from = %format!("{stored_major}.{stored_minor}"),
            to = %format!("{}.{}", self.inner.version, self.inner.options.minor_version),
            "Migrating storage"
        );

        let migrated = match self.inner.options.migrate {
            Some(migrate) => migrate(stored_major, stored_minor, envelope.data)?,
            None if stored_major == self.inner.version => envelope.data,
            None => {
                return Err(StorageError::MigrationRequired {
                    key: self.inner.key.clone(),
                    from: stored_major,
                    to: self.inner.version,
                })
            }
        };

        let data: T = serde_json::from_value(migrated)?;
        self.async_save(data.clone()).await;
        Ok(Some(data))
    }

    async fn read_envelope(&self) -> StorageResult<Option<StorageFile<Value>>> {
        let backend = self.inner.storage.backend();
        let Some(raw) = backend.read(&self.inner.key).await? else {
            return Ok(None);
        };

        match serde_json::from_str::<StorageFile<Value>>(&raw) {
            Ok(envelope) => Ok(Some(envelope)),
            Err(err) => {
                let location = backend.location(&self.inner.key);
                let moved_to = backend.quarantine(&self.inner.key).await?;
                error!(
                    key = %self.inner.key,
                    %location,
                    %moved_to,
                    error = %err,
                    "Unrecoverable error decoding storage; the corrupt file was moved aside \
                     and the data starts empty"
                );
                Ok(None)
            }
        }
    }

    // ===== Saving =====

    /// Write `data` now, superseding any pending delayed write
    ///
    /// Write failures are logged, not returned. While the instance is
    /// stopping the data is held for the final write instead.
    pub async fn async_save(&self, data: T) {
        {
            let mut pending = self.pending();
            pending.data = Some(PendingData::Value(data));
            if self.inner.storage.core_state().is_stopping() {
                self.ensure_final_write_listener(&mut pending);
                return;
            }
        }
        self.handle_write_data().await;
    }

    /// Write whatever `data_func` returns once `delay` has passed quietly
    ///
    /// Each call replaces the pending closure and restarts the timer, so a
    /// burst of calls produces one write with the newest data.
    pub fn async_delay_save<F>(&self, data_func: F, delay: Duration)
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let mut pending = self.pending();
        pending.data = Some(PendingData::Producer(Box::new(data_func)));

        if let Some(timer) = pending.delay_timer.take() {
            timer.abort();
        }
        pending.delay_generation += 1;
        self.ensure_final_write_listener(&mut pending);

        if self.inner.storage.core_state().is_stopping() {
            return;
        }

        let generation = pending.delay_generation;
        let store = self.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            store.delayed_write_due(generation).await;
        });
        pending.delay_timer = Some(timer.abort_handle());
        // A timer that already started writing has no final-write listener
        // left, so shutdown waits on the timer itself
        self.inner.storage.track_final_write(timer);

        debug!(key = %self.inner.key, ?delay, "Scheduled delayed save");
    }

    /// Drop pending data and delete the stored document
    pub async fn async_remove(&self) -> StorageResult<()> {
        {
            let mut pending = self.pending();
            pending.data = None;
            Self::cancel_listeners(&mut pending);
        }
        self.inner.storage.backend().remove(&self.inner.key).await
    }

    async fn delayed_write_due(&self, generation: u64) {
        {
            let mut pending = self.pending();
            if pending.delay_generation != generation {
                return;
            }
            pending.delay_timer = None;
            if self.inner.storage.core_state().is_stopping() {
                self.ensure_final_write_listener(&mut pending);
                return;
            }
        }
        self.handle_write_data().await;
    }

    async fn final_write_due(&self) {
        self.pending().final_write_listener = None;
        self.handle_write_data().await;
    }

    fn ensure_final_write_listener(&self, pending: &mut PendingState<T>) {
        if pending.final_write_listener.is_some() {
            return;
        }

        // Subscribe before spawning so the event cannot slip past
        let mut rx = self.inner.storage.bus().subscribe(HOMEASSISTANT_FINAL_WRITE);
        let store = self.clone();
        let handle = tokio::spawn(async move {
            match rx.recv().await {
                Ok(_) | Err(RecvError::Lagged(_)) => store.final_write_due().await,
                Err(RecvError::Closed) => {}
            }
        });
        pending.final_write_listener = Some(handle.abort_handle());
        self.inner.storage.track_final_write(handle);
    }

    fn cancel_listeners(pending: &mut PendingState<T>) {
        if let Some(timer) = pending.delay_timer.take() {
            timer.abort();
        }
        pending.delay_generation += 1;
        if let Some(listener) = pending.final_write_listener.take() {
            listener.abort();
        }
    }

    async fn handle_write_data(&self) {
        let _guard = self.inner.write_lock.lock().await;

        let data = {
            let mut pending = self.pending();
            Self::cancel_listeners(&mut pending);
            // Another writer may have consumed it while we waited
            match pending.data.take() {
                Some(data) => data,
                None => return,
            }
        };

        if self.inner.options.read_only {
            return;
        }

        if let Err(err) = self.write_data(data.resolve()).await {
            error!(key = %self.inner.key, error = %err, "Error writing config");
        }
    }

    async fn write_data(&self, data: T) -> StorageResult<()> {
        let envelope = StorageFile {
            version: self.inner.version,
            minor_version: self.inner.options.minor_version,
            key: self.inner.key.clone(),
            data,
        };
        let content = serde_json::to_string_pretty(&envelope)?;

        self.inner
            .storage
            .backend()
            .write(&self.inner.key, &content)
            .await?;

        debug!(
            key = %self.inner.key,
            version = %format!("{}.{}", self.inner.version, self.inner.options.minor_version),
            "Saved storage"
        );
        Ok(())
    }
}
