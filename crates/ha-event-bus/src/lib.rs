//! Event bus for Home Assistant
//!
//! Per-event-type broadcast channels. Lifecycle events
//! (`homeassistant_stop`, `homeassistant_final_write`), state changes and
//! registry updates all travel over this bus.

use dashmap::DashMap;
use ha_core::{Context, Event, EventData, EventType};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace};

const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Receiver for untyped events
pub type EventReceiver = broadcast::Receiver<Event<serde_json::Value>>;

/// Event bus with one broadcast channel per event type
///
/// Channels are created on first subscribe; firing a type nobody listens to
/// drops the event.
pub struct EventBus {
    channels: DashMap<EventType, broadcast::Sender<Event<serde_json::Value>>>,
    capacity: usize,
}

impl EventBus {
    /// Create a bus with the default channel capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a bus buffering up to `capacity` events per slow subscriber
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity,
        }
    }

    /// Receive every event of `event_type` fired after this call
    pub fn subscribe(&self, event_type: impl Into<EventType>) -> EventReceiver {
        let event_type = event_type.into();
        trace!(event_type = %event_type, "Subscribing to event type");

        self.channels
            .entry(event_type)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Subscribe to events of type `T` only
    pub fn subscribe_typed<T: EventData + serde::de::DeserializeOwned>(
        &self,
    ) -> TypedEventReceiver<T> {
        TypedEventReceiver {
            rx: self.subscribe(T::event_type()),
            _phantom: std::marker::PhantomData,
        }
    }

    /// Fire an event to all subscribers
    ///
    /// Firing with no subscribers is not an error.
    pub fn fire(&self, event: Event<serde_json::Value>) {
        debug!(event_type = %event.event_type, "Firing event");

        if let Some(sender) = self.channels.get(&event.event_type) {
            // No receivers is not an error
            let _ = sender.send(event);
        }
    }

    /// Fire an event that carries no data
    pub fn fire_simple(&self, event_type: &str, context: Context) {
        self.fire(Event::new(
            event_type,
            serde_json::Value::Object(Default::default()),
            context,
        ));
    }

    /// Serialize `data` and fire it under its own event type
    pub fn fire_typed<T: EventData + serde::Serialize>(&self, data: T, context: Context) {
        let data = serde_json::to_value(&data).unwrap_or_default();
        self.fire(Event::new(T::event_type(), data, context));
    }

    /// Number of event types that have ever been subscribed to
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiver that deserializes event data, skipping events that do not parse
pub struct TypedEventReceiver<T> {
    rx: EventReceiver,
    _phantom: std::marker::PhantomData<T>,
}

impl<T: EventData + serde::de::DeserializeOwned> TypedEventReceiver<T> {
    /// Wait for the next event of type `T`
    pub async fn recv(&mut self) -> Result<Event<T>, broadcast::error::RecvError> {
        loop {
            let event = self.rx.recv().await?;
            if let Ok(data) = serde_json::from_value::<T>(event.data.clone()) {
                return Ok(Event {
                    event_type: event.event_type,
                    data,
                    time_fired: event.time_fired,
                    context: event.context,
                });
            }
        }
    }

    pub fn try_recv(&mut self) -> Option<Event<T>> {
        while let Ok(event) = self.rx.try_recv() {
            if let Ok(data) = serde_json::from_value::<T>(event.data.clone()) {
                return Some(Event {
                    event_type: event.event_type,
                    data,
                    time_fired: event.time_fired,
                    context: event.context,
                });
            }
        }
        None
    }
}

/// Shared reference to the event bus
pub type SharedEventBus = Arc<EventBus>;

#[cfg(test)]
mod tests {
    use super::*;
    use ha_core::events::{EntityRegistryUpdatedData, HOMEASSISTANT_FINAL_WRITE};
    use serde_json::json;

    #[tokio::test]
    async fn test_subscribe_and_fire() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe("test_event");

        bus.fire(Event::new("test_event", json!({"key": "value"}), Context::new()));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.event_type.as_str(), "test_event");
        assert_eq!(received.data["key"], "value");
    }

    #[tokio::test]
    async fn test_fire_simple_reaches_lifecycle_listeners() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe(HOMEASSISTANT_FINAL_WRITE);

        bus.fire_simple(HOMEASSISTANT_FINAL_WRITE, Context::new());

        let received = rx.recv().await.unwrap();
        assert_eq!(received.data, json!({}));
    }

    #[tokio::test]
    async fn test_typed_subscription() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe_typed::<EntityRegistryUpdatedData>();

        bus.fire_typed(
            EntityRegistryUpdatedData {
                action: "remove".into(),
                entity_id: "input_boolean.hall".into(),
            },
            Context::new(),
        );

        let received = rx.recv().await.unwrap();
        assert_eq!(received.data.action, "remove");
        assert_eq!(received.data.entity_id, "input_boolean.hall");
    }

    #[test]
    fn test_no_cross_event_pollution() {
        let bus = EventBus::new();
        let mut rx_a = bus.subscribe("event_a");
        let mut rx_b = bus.subscribe("event_b");

        bus.fire(Event::new("event_a", json!({"type": "a"}), Context::new()));

        assert_eq!(rx_a.try_recv().unwrap().data["type"], "a");
        assert!(rx_b.try_recv().is_err());
        assert_eq!(bus.channel_count(), 2);
    }
}
