//! Core types for Home Assistant
//!
//! The value types shared by every other crate in the workspace: entity ids,
//! states, events, contexts, service calls, and the instance lifecycle state.

mod context;
mod core_state;
mod entity_id;
mod event;
mod service_call;
mod state;
pub mod util;

pub use context::Context;
pub use core_state::{CoreState, SharedCoreState};
pub use entity_id::{EntityId, EntityIdError};
pub use event::{Event, EventData, EventType};
pub use service_call::ServiceCall;
pub use state::State;

/// Field holding the id of a collection item or config entry
pub const CONF_ID: &str = "id";

/// Standard event types used by Home Assistant
pub mod events {
    use super::*;

    /// Event type for state changes
    pub const STATE_CHANGED: &str = "state_changed";

    /// Event type for Home Assistant start
    pub const HOMEASSISTANT_START: &str = "homeassistant_start";

    /// Event type for Home Assistant stop
    pub const HOMEASSISTANT_STOP: &str = "homeassistant_stop";

    /// Last chance to persist data before the process exits
    pub const HOMEASSISTANT_FINAL_WRITE: &str = "homeassistant_final_write";

    /// Event type for Home Assistant close
    pub const HOMEASSISTANT_CLOSE: &str = "homeassistant_close";

    /// Event type for entity registry changes
    pub const ENTITY_REGISTRY_UPDATED: &str = "entity_registry_updated";

    /// Data for STATE_CHANGED events
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    pub struct StateChangedData {
        pub entity_id: EntityId,
        pub old_state: Option<State>,
        pub new_state: Option<State>,
    }

    impl EventData for StateChangedData {
        fn event_type() -> &'static str {
            STATE_CHANGED
        }
    }

    /// Data for ENTITY_REGISTRY_UPDATED events
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    pub struct EntityRegistryUpdatedData {
        /// One of "create", "update", "remove"
        pub action: String,
        pub entity_id: String,
    }

    impl EventData for EntityRegistryUpdatedData {
        fn event_type() -> &'static str {
            ENTITY_REGISTRY_UPDATED
        }
    }
}
