//! The central Home Assistant instance and its start/stop lifecycle

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ha_api::WebSocketCommands;
use ha_components::{
    input_boolean, input_number, ComponentContext, InputBooleanPlatform,
    InputNumberPlatform,
};
use ha_core::events::{
    HOMEASSISTANT_CLOSE, HOMEASSISTANT_FINAL_WRITE, HOMEASSISTANT_START, HOMEASSISTANT_STOP,
};
use ha_core::{Context, CoreState, SharedCoreState};
use ha_event_bus::EventBus;
use ha_registries::{EntityRegistry, FileBackend, Storage, StorageBackend};
use ha_service_registry::ServiceRegistry;
use ha_state_store::StateStore;
use tracing::info;

/// Helper integrations set up on this instance
pub struct Helpers {
    pub input_boolean: Arc<InputBooleanPlatform>,
    pub input_number: Arc<InputNumberPlatform>,
}

/// The running instance
///
/// Owns the bus, the state store, services, storage and registries, and
/// drives the core state through startup and shutdown.
pub struct HomeAssistant {
    pub config_dir: PathBuf,
    /// Event bus for pub/sub communication
    pub bus: Arc<EventBus>,
    pub states: Arc<StateStore>,
    pub services: Arc<ServiceRegistry>,
    pub core_state: SharedCoreState,
    pub storage: Storage,
    pub entity_registry: Arc<EntityRegistry>,
}

impl HomeAssistant {
    /// Instance persisting to `<config_dir>/.storage`
    pub fn new(config_dir: impl AsRef<Path>) -> Self {
        let backend = Arc::new(FileBackend::new(config_dir.as_ref().join(".storage")));
        Self::with_storage_backend(config_dir, backend)
    }

    /// Create an instance on an explicit storage backend
    pub fn with_storage_backend(
        config_dir: impl AsRef<Path>,
        backend: Arc<dyn StorageBackend>,
    ) -> Self {
        let bus = Arc::new(EventBus::new());
        let core_state = SharedCoreState::new(CoreState::NotRunning);
        let storage = Storage::with_backend(backend, bus.clone(), core_state.clone());
        let entity_registry = Arc::new(EntityRegistry::new(&storage));

        Self {
            config_dir: config_dir.as_ref().to_path_buf(),
            states: Arc::new(StateStore::new(bus.clone())),
            services: Arc::new(ServiceRegistry::new()),
            bus,
            core_state,
            storage,
            entity_registry,
        }
    }

    /// Load the entity registry and set up the helper integrations
    pub async fn async_setup(
        &self,
        config: &ha_config::Value,
        commands: Arc<WebSocketCommands>,
    ) -> anyhow::Result<Helpers> {
        self.core_state.set(CoreState::Starting);
        self.entity_registry.async_load().await?;

        let ctx = ComponentContext {
            config_dir: self.config_dir.clone(),
            states: self.states.clone(),
            services: self.services.clone(),
            storage: self.storage.clone(),
            entity_registry: self.entity_registry.clone(),
            commands,
        };

        let helpers = Helpers {
            input_boolean: input_boolean::async_setup(&ctx, config).await?,
            input_number: input_number::async_setup(&ctx, config).await?,
        };
        info!(
            entities = self.states.entity_count(),
            services = self.services.service_count(),
            "Integrations set up"
        );
        Ok(helpers)
    }

    /// Mark the instance running and fire `homeassistant_start`
    pub fn async_start(&self) {
        self.core_state.set(CoreState::Running);
        self.bus.fire_simple(HOMEASSISTANT_START, Context::new());
        info!("Home Assistant is running");
    }

    /// Stop in stages; pending delayed saves are flushed at the final write
    pub async fn async_stop(&self) {
        info!("Stopping Home Assistant");
        self.core_state.set(CoreState::Stopping);
        self.bus.fire_simple(HOMEASSISTANT_STOP, Context::new());

        self.core_state.set(CoreState::FinalWrite);
        self.bus.fire_simple(HOMEASSISTANT_FINAL_WRITE, Context::new());
        self.storage.async_wait_final_writes().await;

        self.bus.fire_simple(HOMEASSISTANT_CLOSE, Context::new());
        self.core_state.set(CoreState::Stopped);
        info!("Home Assistant stopped");
    }
}
