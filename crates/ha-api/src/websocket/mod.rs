//! Home Assistant WebSocket API
//!
//! Protocol: https://developers.home-assistant.io/docs/api/websocket
//!
//! This module is organized into:
//! - `types` - Message type definitions
//! - `connection` - Connection handling and authentication
//! - `dispatch` - The command registry and message routing
//! - `handlers` - Built-in commands
//! - `collection` - CRUD commands over a storage collection

mod collection;
mod connection;
mod dispatch;
mod handlers;
mod types;

use axum::{
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
};

use crate::AppState;

pub use collection::StorageCollectionWebsocket;
pub use connection::ActiveConnection;
pub use dispatch::{CommandError, CommandHandler, SharedWebSocketCommands, WebSocketCommands};
pub use handlers::register_builtin_commands;
pub use types::{
    error_codes, AuthInvalidMessage, AuthOkMessage, AuthPhaseMessage, AuthRequiredMessage,
    ErrorInfo, OutgoingMessage, PongMessage, ResultMessage,
};

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_socket(socket, state))
}
