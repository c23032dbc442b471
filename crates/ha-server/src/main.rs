//! Home Assistant Rust Server
//!
//! Main entry point for the Home Assistant Rust implementation.
//!
//! Usage: `homeassistant [CONFIG_DIR]`. Without an argument the config
//! directory comes from `HA_CONFIG_DIR`, else `./config`.

mod hass;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use ha_api::{start_server, AppState, TokenStore};
use ha_config::ServerConfig;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::hass::HomeAssistant;

fn config_dir() -> PathBuf {
    std::env::args()
        .nth(1)
        .or_else(|| std::env::var("HA_CONFIG_DIR").ok())
        .unwrap_or_else(|| "config".to_string())
        .into()
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let config_dir = config_dir();
    info!(config_dir = %config_dir.display(), "Starting Home Assistant (Rust)");

    let config = ha_config::load_configuration(&config_dir)?;
    let server_config = ServerConfig::from_yaml(&config)?;

    let tokens = Arc::new(TokenStore::from_config(&server_config.auth.tokens));
    if tokens.is_empty() {
        warn!("No access tokens configured, websocket clients cannot authenticate");
    }

    let hass = HomeAssistant::new(&config_dir);
    let app_state = AppState::new(
        hass.bus.clone(),
        hass.states.clone(),
        hass.services.clone(),
        tokens,
    )?;

    let _helpers = hass.async_setup(&config, app_state.commands.clone()).await?;
    hass.async_start();

    start_server(app_state, &server_config.bind_address(), async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
        }
    })
    .await?;

    info!("Shutting down...");
    hass.async_stop().await;

    Ok(())
}
