//! Built-in WebSocket command handlers

use std::sync::Arc;

use ha_service_registry::{ServiceError, ServiceRegistry};
use ha_state_store::StateStore;
use serde_json::{json, Map, Value};
use tracing::warn;

use super::connection::ActiveConnection;
use super::dispatch::{CommandError, WebSocketCommands};
use super::types::error_codes;

/// Register `ping`, `get_states` and `call_service`
pub fn register_builtin_commands(
    commands: &WebSocketCommands,
    states: Arc<StateStore>,
    services: Arc<ServiceRegistry>,
) -> Result<(), CommandError> {
    commands.register("ping", None, false, |conn: Arc<ActiveConnection>, id, _msg| async move {
        conn.send_pong(id).await
    })?;

    commands.register("get_states", None, false, move |conn: Arc<ActiveConnection>, id, _msg| {
        let states = states.clone();
        async move { handle_get_states(&conn, id, &states).await }
    })?;

    commands.register(
        "call_service",
        Some(json!({
            "type": "object",
            "properties": {
                "domain": {"type": "string"},
                "service": {"type": "string"},
                "service_data": {"type": "object"},
                "target": {"type": "object"}
            },
            "required": ["domain", "service"]
        })),
        false,
        move |conn: Arc<ActiveConnection>, id, msg| {
            let services = services.clone();
            async move { handle_call_service(&conn, id, msg, &services).await }
        },
    )?;

    Ok(())
}

/// Handle get_states command
async fn handle_get_states(conn: &ActiveConnection, id: u64, states: &StateStore) {
    let mut all = states.all();
    all.sort_by_key(|state| state.entity_id.to_string());

    match serde_json::to_value(all) {
        Ok(result) => conn.send_result(id, result).await,
        Err(e) => {
            conn.send_error(id, error_codes::UNKNOWN_ERROR, e.to_string())
                .await
        }
    }
}

/// Handle call_service command
async fn handle_call_service(
    conn: &ActiveConnection,
    id: u64,
    mut msg: Map<String, Value>,
    services: &ServiceRegistry,
) {
    let domain = msg
        .get("domain")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let service = msg
        .get("service")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    // Merge target into service_data
    let mut data = match msg.remove("service_data") {
        Some(Value::Object(data)) => data,
        _ => Map::new(),
    };
    if let Some(Value::Object(target)) = msg.remove("target") {
        data.extend(target);
    }

    let context = conn.context();

    match services
        .call(&domain, &service, Value::Object(data), context.clone())
        .await
    {
        Ok(()) => {
            conn.send_result(id, json!({"context": context, "response": null}))
                .await
        }
        Err(ServiceError::NotFound { .. }) => {
            conn.send_error(
                id,
                error_codes::NOT_FOUND,
                format!("Service {}.{} not found.", domain, service),
            )
            .await
        }
        Err(ServiceError::InvalidData(message)) => {
            conn.send_error(id, error_codes::INVALID_FORMAT, message)
                .await
        }
        Err(e) => {
            warn!(domain = %domain, service = %service, error = %e, "Service call failed");
            conn.send_error(id, error_codes::HOME_ASSISTANT_ERROR, e.to_string())
                .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::User;
    use crate::websocket::types::OutgoingMessage;
    use ha_core::{Context, EntityId};
    use ha_event_bus::EventBus;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    struct Fixture {
        commands: WebSocketCommands,
        states: Arc<StateStore>,
        services: Arc<ServiceRegistry>,
        conn: Arc<ActiveConnection>,
        rx: mpsc::Receiver<OutgoingMessage>,
    }

    impl Fixture {
        fn new() -> Self {
            let states = Arc::new(StateStore::new(Arc::new(EventBus::new())));
            let services = Arc::new(ServiceRegistry::new());
            let commands = WebSocketCommands::new();
            register_builtin_commands(&commands, states.clone(), services.clone()).unwrap();

            let (tx, rx) = mpsc::channel(16);
            let user = User {
                id: "owner".to_string(),
                name: "Owner".to_string(),
                is_admin: true,
            };
            Self {
                commands,
                states,
                services,
                conn: Arc::new(ActiveConnection::new(user, tx)),
                rx,
            }
        }

        async fn send(&mut self, message: Value) -> Value {
            self.commands
                .handle_message(&self.conn, &message.to_string())
                .await;
            serde_json::to_value(self.rx.recv().await.unwrap()).unwrap()
        }
    }

    #[tokio::test]
    async fn test_ping() {
        let mut fx = Fixture::new();
        assert_eq!(
            fx.send(json!({"id": 1, "type": "ping"})).await,
            json!({"id": 1, "type": "pong"})
        );
    }

    #[tokio::test]
    async fn test_get_states() {
        let mut fx = Fixture::new();
        for object_id in ["zeta", "alpha"] {
            fx.states.set(
                EntityId::new("input_boolean", object_id).unwrap(),
                "off",
                HashMap::new(),
                Context::new(),
            );
        }

        let msg = fx.send(json!({"id": 1, "type": "get_states"})).await;
        let result = msg["result"].as_array().unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result[0]["entity_id"], "input_boolean.alpha");
        assert_eq!(result[1]["state"], "off");
    }

    #[tokio::test]
    async fn test_call_service() {
        let mut fx = Fixture::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        fx.services
            .register(
                "input_boolean",
                "turn_on",
                move |call| {
                    let counter = counter.clone();
                    async move {
                        assert_eq!(call.entity_ids(), vec!["input_boolean.hall".to_string()]);
                        assert_eq!(call.context.user_id.as_deref(), Some("owner"));
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                },
                None,
            )
            .unwrap();

        let msg = fx
            .send(json!({
                "id": 1,
                "type": "call_service",
                "domain": "input_boolean",
                "service": "turn_on",
                "target": {"entity_id": "input_boolean.hall"}
            }))
            .await;
        assert_eq!(msg["success"], true);
        assert_eq!(msg["result"]["context"]["user_id"], "owner");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let msg = fx
            .send(json!({
                "id": 2,
                "type": "call_service",
                "domain": "input_boolean",
                "service": "explode"
            }))
            .await;
        assert_eq!(msg["error"]["code"], "not_found");
        assert_eq!(msg["error"]["message"], "Service input_boolean.explode not found.");

        let msg = fx
            .send(json!({"id": 3, "type": "call_service", "domain": "input_boolean"}))
            .await;
        assert_eq!(msg["error"]["code"], "invalid_format");
    }
}
