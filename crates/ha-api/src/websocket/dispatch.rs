//! WebSocket message dispatch
//!
//! Commands are registered by type with an optional JSON schema. A message
//! passes the id check, the lookup, the admin check and the schema before
//! its handler runs.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::BoxFuture;
use ha_service_registry::humanize_errors;
use jsonschema::JSONSchema;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use super::connection::ActiveConnection;
use super::types::error_codes;

/// Handler for one websocket command
///
/// Receives the connection, the message id and the full message.
pub type CommandHandler =
    Arc<dyn Fn(Arc<ActiveConnection>, u64, Map<String, Value>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Errors from registering commands
#[derive(Debug, Error)]
pub enum CommandError {
    /// The command schema does not compile
    #[error("invalid schema for {command}: {message}")]
    InvalidSchema { command: String, message: String },
}

struct RegisteredCommand {
    handler: CommandHandler,
    schema: Option<Arc<JSONSchema>>,
    require_admin: bool,
}

/// All websocket commands, keyed by message type
#[derive(Default)]
pub struct WebSocketCommands {
    commands: DashMap<String, RegisteredCommand>,
}

impl WebSocketCommands {
    /// Create an empty command table
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the handler for `command_type`
    ///
    /// The handler receives the message id and the whole message, and must
    /// send exactly one reply through the connection.
    #[instrument(skip(self, command_type, schema, handler))]
    pub fn register<F, Fut>(
        &self,
        command_type: impl Into<String>,
        schema: Option<Value>,
        require_admin: bool,
        handler: F,
    ) -> Result<(), CommandError>
    where
        F: Fn(Arc<ActiveConnection>, u64, Map<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let command_type = command_type.into();

        let schema = match schema {
            Some(schema) => {
                let compiled =
                    JSONSchema::compile(&schema).map_err(|e| CommandError::InvalidSchema {
                        command: command_type.clone(),
                        message: e.to_string(),
                    })?;
                Some(Arc::new(compiled))
            }
            None => None,
        };

        if self.commands.contains_key(&command_type) {
            warn!(command = %command_type, "Replacing websocket command");
        } else {
            debug!(command = %command_type, "Registering websocket command");
        }

        let handler: CommandHandler =
            Arc::new(move |conn, id, msg| Box::pin(handler(conn, id, msg)) as BoxFuture<'static, ()>);

        self.commands.insert(
            command_type,
            RegisteredCommand {
                handler,
                schema,
                require_admin,
            },
        );
        Ok(())
    }

    pub fn contains(&self, command_type: &str) -> bool {
        self.commands.contains_key(command_type)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Handle one text frame from an authenticated connection
    pub async fn handle_message(&self, conn: &Arc<ActiveConnection>, text: &str) {
        let msg = match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(msg)) => msg,
            _ => {
                warn!("Received invalid websocket message");
                conn.send_error(0, error_codes::INVALID_FORMAT, "Message incorrectly formatted.")
                    .await;
                return;
            }
        };

        let Some(id) = msg.get("id").and_then(Value::as_u64) else {
            conn.send_error(0, error_codes::INVALID_FORMAT, "Message incorrectly formatted.")
                .await;
            return;
        };

        if conn.validate_id(id).is_err() {
            conn.send_error(
                id,
                error_codes::ID_REUSE,
                "Identifier values have to increase.",
            )
            .await;
            return;
        }

        let command_type = msg
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let Some((handler, schema, require_admin)) = self.commands.get(&command_type).map(|c| {
            (c.handler.clone(), c.schema.clone(), c.require_admin)
        }) else {
            warn!(command = %command_type, "Unhandled websocket message type");
            conn.send_error(id, error_codes::UNKNOWN_COMMAND, "Unknown command.")
                .await;
            return;
        };

        // The schema applies before the admin check
        let payload = Value::Object(msg);
        if let Some(schema) = schema {
            let problem = schema.validate(&payload).err().map(humanize_errors);
            if let Some(problem) = problem {
                conn.send_error(
                    id,
                    error_codes::INVALID_FORMAT,
                    format!("Message incorrectly formatted: {}", problem),
                )
                .await;
                return;
            }
        }
        let Value::Object(msg) = payload else {
            return;
        };

        if require_admin && !conn.user().is_admin {
            conn.send_error(id, error_codes::UNAUTHORIZED, "Unauthorized")
                .await;
            return;
        }

        debug!(command = %command_type, id, "Handling websocket command");
        handler(conn.clone(), id, msg).await;
    }
}

/// Shared reference to the command table
pub type SharedWebSocketCommands = Arc<WebSocketCommands>;
