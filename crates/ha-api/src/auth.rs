//! Access tokens for the WebSocket API
//!
//! Tokens are long-lived and come from the `auth:` section of the
//! configuration. Each resolves to a user; only admins may run commands
//! registered with `require_admin`.

use dashmap::DashMap;
use ha_config::AuthTokenConfig;
use serde::Serialize;
use tracing::debug;

/// A user in the system
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub is_admin: bool,
}

/// Token to user lookup
#[derive(Default)]
pub struct TokenStore {
    tokens: DashMap<String, User>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept every token listed in the `auth:` section as an admin
    pub fn from_config(tokens: &[AuthTokenConfig]) -> Self {
        let store = Self::new();
        for entry in tokens {
            store.add(
                entry.token.clone(),
                User {
                    id: entry.user_id.clone(),
                    name: entry.name.clone().unwrap_or_else(|| entry.user_id.clone()),
                    is_admin: entry.admin,
                },
            );
        }
        store
    }

    /// Accept `token` as `user`
    pub fn add(&self, token: impl Into<String>, user: User) {
        debug!(user_id = %user.id, admin = user.is_admin, "Registering access token");
        self.tokens.insert(token.into(), user);
    }

    /// User owning `token`, if it is known
    pub fn validate(&self, token: &str) -> Option<User> {
        self.tokens.get(token).map(|user| user.clone())
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}
