//! Home Assistant HTTP and WebSocket API
//!
//! Implements the WebSocket API using axum. Integrations add their own
//! commands to the shared [`WebSocketCommands`]; storage collections are
//! exposed through [`StorageCollectionWebsocket`].
//! Based on: https://developers.home-assistant.io/docs/api/websocket

pub mod auth;
mod websocket;

use std::future::Future;
use std::sync::Arc;

use axum::{routing::get, Json, Router};
use ha_event_bus::EventBus;
use ha_service_registry::ServiceRegistry;
use ha_state_store::StateStore;
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

pub use auth::{TokenStore, User};
pub use websocket::{
    error_codes, register_builtin_commands, ActiveConnection, CommandError, CommandHandler,
    ErrorInfo, OutgoingMessage, ResultMessage, SharedWebSocketCommands,
    StorageCollectionWebsocket, WebSocketCommands,
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub event_bus: Arc<EventBus>,
    pub states: Arc<StateStore>,
    pub services: Arc<ServiceRegistry>,
    /// Websocket commands, built-ins and integration commands alike
    pub commands: Arc<WebSocketCommands>,
    pub tokens: Arc<TokenStore>,
}

impl AppState {
    /// State with the built-in websocket commands registered
    pub fn new(
        event_bus: Arc<EventBus>,
        states: Arc<StateStore>,
        services: Arc<ServiceRegistry>,
        tokens: Arc<TokenStore>,
    ) -> Result<Self, CommandError> {
        let commands = Arc::new(WebSocketCommands::new());
        register_builtin_commands(&commands, states.clone(), services.clone())?;
        Ok(Self {
            event_bus,
            states,
            services,
            commands,
            tokens,
        })
    }
}

/// API status response
#[derive(Serialize)]
struct ApiStatus {
    message: &'static str,
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/websocket", get(websocket::ws_handler))
        .route("/api/", get(api_status))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve the API on `addr` until `shutdown` resolves
pub async fn start_server(
    state: AppState,
    addr: &str,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let router = create_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("API server listening on {}", addr);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}

/// GET /api/ - Returns API status
async fn api_status() -> Json<ApiStatus> {
    Json(ApiStatus {
        message: "API running.",
    })
}
