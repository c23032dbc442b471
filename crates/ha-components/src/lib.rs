//! Home Assistant Built-in Components
//!
//! User-editable helpers built on the collection framework. Each keeps its
//! YAML items and its runtime-created items in one id namespace, exposes
//! `{domain}/list|create|update|delete` over the websocket API and a
//! `reload` service.

mod helper;
pub mod input_boolean;
pub mod input_number;

use std::path::PathBuf;
use std::sync::Arc;

use ha_api::{CommandError, WebSocketCommands};
use ha_config::ConfigError;
use ha_helpers::CollectionError;
use ha_registries::{EntityRegistry, Storage};
use ha_service_registry::{ServiceError, ServiceRegistry};
use ha_state_store::StateStore;
use thiserror::Error;

pub use helper::{HelperPlatform, HelperValidator};
pub use input_boolean::{InputBoolean, InputBooleanConfig, InputBooleanPlatform};
pub use input_number::{InputNumber, InputNumberConfig, InputNumberPlatform, NumberMode};

/// What a helper needs from the running instance
#[derive(Clone)]
pub struct ComponentContext {
    pub config_dir: PathBuf,
    pub states: Arc<StateStore>,
    pub services: Arc<ServiceRegistry>,
    pub storage: Storage,
    pub entity_registry: Arc<EntityRegistry>,
    pub commands: Arc<WebSocketCommands>,
}

/// Errors from setting up a helper integration
#[derive(Debug, Error)]
pub enum ComponentError {
    #[error(transparent)]
    Collection(#[from] CollectionError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Service(#[from] ServiceError),
}
