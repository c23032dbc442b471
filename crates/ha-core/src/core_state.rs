//! Lifecycle state of a running instance

use std::fmt;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

/// Where the instance is in its start/stop lifecycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoreState {
    #[default]
    NotRunning,
    Starting,
    Running,
    /// Shutdown requested; persistence holds writes until the final write
    Stopping,
    FinalWrite,
    Stopped,
}

impl CoreState {
    /// Upper-case name used when logging
    pub fn as_str(&self) -> &'static str {
        match self {
            CoreState::NotRunning => "NOT_RUNNING",
            CoreState::Starting => "STARTING",
            CoreState::Running => "RUNNING",
            CoreState::Stopping => "STOPPING",
            CoreState::FinalWrite => "FINAL_WRITE",
            CoreState::Stopped => "STOPPED",
        }
    }
}

impl fmt::Display for CoreState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cloneable handle on the instance lifecycle state
#[derive(Debug, Clone, Default)]
pub struct SharedCoreState(Arc<RwLock<CoreState>>);

impl SharedCoreState {
    /// Create a shared handle starting at `state`
    pub fn new(state: CoreState) -> Self {
        Self(Arc::new(RwLock::new(state)))
    }

    pub fn get(&self) -> CoreState {
        match self.0.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn set(&self, state: CoreState) {
        match self.0.write() {
            Ok(mut guard) => *guard = state,
            Err(poisoned) => *poisoned.into_inner() = state,
        }
    }

    /// True once shutdown has begun
    pub fn is_stopping(&self) -> bool {
        self.get() == CoreState::Stopping
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_state_visible_through_clones() {
        let state = SharedCoreState::default();
        let other = state.clone();
        assert_eq!(other.get(), CoreState::NotRunning);

        state.set(CoreState::Stopping);
        assert!(other.is_stopping());
        assert_eq!(other.get().to_string(), "STOPPING");
    }
}
