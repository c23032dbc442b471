//! WebSocket message types
//!
//! Commands arrive as JSON objects with an integer `id` and a `type`; the
//! handshake message is the only one parsed into a dedicated type.

use serde::{Deserialize, Serialize};

/// Error codes sent in failed results
pub mod error_codes {
    /// Message id not greater than the previous one
    pub const ID_REUSE: &str = "id_reuse";
    /// Message failed schema validation
    pub const INVALID_FORMAT: &str = "invalid_format";
    /// Referenced item does not exist
    pub const NOT_FOUND: &str = "not_found";
    /// Command needs an admin user
    pub const UNAUTHORIZED: &str = "unauthorized";
    /// No handler for the command type
    pub const UNKNOWN_COMMAND: &str = "unknown_command";
    /// Unexpected handler failure
    pub const UNKNOWN_ERROR: &str = "unknown_error";
    /// Handler failed with a user-facing message
    pub const HOME_ASSISTANT_ERROR: &str = "home_assistant_error";
}

// =============================================================================
// Incoming Messages
// =============================================================================

/// Message expected while the connection is not yet authenticated
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthPhaseMessage {
    Auth {
        #[serde(default)]
        access_token: Option<String>,
    },
}

// =============================================================================
// Outgoing Messages
// =============================================================================

/// Outgoing WebSocket message to client
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum OutgoingMessage {
    AuthRequired(AuthRequiredMessage),
    AuthOk(AuthOkMessage),
    AuthInvalid(AuthInvalidMessage),
    Pong(PongMessage),
    Result(ResultMessage),
}

/// First message sent to every client
#[derive(Debug, Clone, Serialize)]
pub struct AuthRequiredMessage {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub ha_version: String,
}

/// Sent after a valid access token
#[derive(Debug, Clone, Serialize)]
pub struct AuthOkMessage {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub ha_version: String,
}

/// Sent before closing on a bad access token
#[derive(Debug, Clone, Serialize)]
pub struct AuthInvalidMessage {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PongMessage {
    pub id: u64,
    #[serde(rename = "type")]
    pub msg_type: &'static str,
}

/// Reply to a command
#[derive(Debug, Clone, Serialize)]
pub struct ResultMessage {
    pub id: u64,
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl ResultMessage {
    /// Successful reply carrying `result`
    pub fn success(id: u64, result: serde_json::Value) -> Self {
        Self {
            id,
            msg_type: "result",
            success: true,
            result: Some(result),
            error: None,
        }
    }

    /// Failed reply with an error code and message
    pub fn error(id: u64, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id,
            msg_type: "result",
            success: false,
            result: None,
            error: Some(ErrorInfo {
                code: code.into(),
                message: message.into(),
            }),
        }
    }
}

/// Error payload of a failed reply
#[derive(Debug, Clone, Serialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}
