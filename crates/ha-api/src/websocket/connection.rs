//! WebSocket connection handling
//!
//! Runs the auth handshake, then feeds every text frame to the command
//! registry. Replies travel through an mpsc channel drained by a writer task.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use ha_core::Context;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::auth::User;
use crate::AppState;

use super::types::{
    AuthInvalidMessage, AuthOkMessage, AuthPhaseMessage, AuthRequiredMessage, OutgoingMessage,
    PongMessage, ResultMessage,
};

const AUTH_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// Connection State
// =============================================================================

/// An authenticated websocket client
pub struct ActiveConnection {
    user: User,
    /// Last message ID received
    last_id: AtomicU64,
    tx: mpsc::Sender<OutgoingMessage>,
}

impl ActiveConnection {
    /// Create a connection for an authenticated user
    pub fn new(user: User, tx: mpsc::Sender<OutgoingMessage>) -> Self {
        Self {
            user,
            last_id: AtomicU64::new(0),
            tx,
        }
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    /// Fresh context for one operation of this user
    pub fn context(&self) -> Context {
        Context::with_user(&self.user.id)
    }

    /// Validate that the message ID is increasing
    pub fn validate_id(&self, id: u64) -> Result<(), &'static str> {
        self.last_id
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                (id > last).then_some(id)
            })
            .map(|_| ())
            .map_err(|_| "id_reuse")
    }

    /// Queue a message; dropped if the client is gone
    pub async fn send_message(&self, msg: OutgoingMessage) {
        if self.tx.send(msg).await.is_err() {
            debug!(user_id = %self.user.id, "Dropping message for closed connection");
        }
    }

    /// Reply to command `id` with a successful result
    pub async fn send_result(&self, id: u64, result: serde_json::Value) {
        self.send_message(OutgoingMessage::Result(ResultMessage::success(id, result)))
            .await
    }

    /// Reply to command `id` with an error
    pub async fn send_error(&self, id: u64, code: &str, message: impl Into<String>) {
        self.send_message(OutgoingMessage::Result(ResultMessage::error(
            id, code, message,
        )))
        .await
    }

    pub async fn send_pong(&self, id: u64) {
        self.send_message(OutgoingMessage::Pong(PongMessage {
            id,
            msg_type: "pong",
        }))
        .await
    }
}

// =============================================================================
// WebSocket Handler
// =============================================================================

/// Handle a WebSocket connection
pub async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let ha_version = env!("CARGO_PKG_VERSION").to_string();

    let auth_required = OutgoingMessage::AuthRequired(AuthRequiredMessage {
        msg_type: "auth_required",
        ha_version: ha_version.clone(),
    });
    if let Err(e) = send_message(&mut sender, &auth_required).await {
        error!(error = %e, "Failed to send auth_required");
        return;
    }

    let user = match tokio::time::timeout(AUTH_TIMEOUT, wait_for_auth(&mut receiver)).await {
        Ok(Ok(Some(token))) => state.tokens.validate(&token),
        Ok(Ok(None)) => None,
        Ok(Err(e)) => {
            debug!(error = %e, "Connection closed during auth");
            return;
        }
        Err(_) => {
            let timeout = OutgoingMessage::AuthInvalid(AuthInvalidMessage {
                msg_type: "auth_invalid",
                message: "Authentication timeout".to_string(),
            });
            let _ = send_message(&mut sender, &timeout).await;
            warn!("WebSocket client authentication timeout");
            return;
        }
    };

    let Some(user) = user else {
        let invalid = OutgoingMessage::AuthInvalid(AuthInvalidMessage {
            msg_type: "auth_invalid",
            message: "Invalid access token or password".to_string(),
        });
        let _ = send_message(&mut sender, &invalid).await;
        warn!("WebSocket client authentication failed");
        return;
    };

    let auth_ok = OutgoingMessage::AuthOk(AuthOkMessage {
        msg_type: "auth_ok",
        ha_version,
    });
    if let Err(e) = send_message(&mut sender, &auth_ok).await {
        error!(error = %e, "Failed to send auth_ok");
        return;
    }
    info!(user_id = %user.id, admin = user.is_admin, "WebSocket client authenticated");

    let (tx, mut rx) = mpsc::channel::<OutgoingMessage>(256);
    let conn = Arc::new(ActiveConnection::new(user, tx));

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if send_message(&mut sender, &msg).await.is_err() {
                break;
            }
        }
    });

    while let Some(result) = receiver.next().await {
        match result {
            Ok(Message::Text(text)) => state.commands.handle_message(&conn, &text).await,
            Ok(Message::Close(_)) => {
                info!("WebSocket client disconnected");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                error!(error = %e, "WebSocket error");
                break;
            }
        }
    }

    send_task.abort();
    info!("WebSocket connection closed");
}

// =============================================================================
// Authentication
// =============================================================================

/// Wait for the `auth` message and return its token
async fn wait_for_auth(receiver: &mut SplitStream<WebSocket>) -> Result<Option<String>, String> {
    while let Some(result) = receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                return Ok(serde_json::from_str::<AuthPhaseMessage>(&text)
                    .ok()
                    .and_then(|AuthPhaseMessage::Auth { access_token }| access_token));
            }
            Ok(Message::Close(_)) => return Err("Connection closed".to_string()),
            Err(e) => return Err(format!("WebSocket error: {}", e)),
            _ => {}
        }
    }
    Err("Connection closed".to_string())
}

/// Send a message to the WebSocket
async fn send_message(
    sender: &mut SplitSink<WebSocket, Message>,
    msg: &OutgoingMessage,
) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    debug!(message = %json, "Sending");
    sender
        .send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
