//! Credex Flow - conversation flow engine for messaging channels
//!
//! Routes each inbound channel message through small validated components
//! arranged in paths, with conversation state in an atomic store.

mod api;
mod channel;
mod components;
mod config;
mod error;
mod flow;
mod ports;
mod state;
mod store;
#[cfg(test)]
mod testing;

use api::{create_router, AppState};
use channel::WhatsAppClient;
use config::{Config, StoreKind};
use flow::{ComponentRegistry, FlowProcessor};
use ports::{BackendApi, HttpBackendApi};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use store::{AtomicStore, MemoryStore, RedisStore, SqliteStore, StoreBackend};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const PURGE_INTERVAL: Duration = Duration::from_secs(60);
const MESSAGING_TIMEOUT: Duration = Duration::from_secs(15);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "credex_flow=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    let config = Config::from_env()?;

    // State store
    let backend: Arc<dyn StoreBackend> = match config.store {
        StoreKind::Sqlite => {
            if let Some(parent) = PathBuf::from(&config.db_path).parent() {
                std::fs::create_dir_all(parent)?;
            }
            tracing::info!(path = %config.db_path, "Opening SQLite state store");
            let sqlite = Arc::new(SqliteStore::open(&config.db_path)?);
            spawn_purge(sqlite.clone());
            sqlite
        }
        StoreKind::Redis => {
            tracing::info!(url = %config.redis_url, "Connecting to Redis state store");
            Arc::new(RedisStore::connect(&config.redis_url).await?)
        }
        StoreKind::Memory => {
            tracing::warn!("Using in-memory state store; conversations are lost on restart");
            Arc::new(MemoryStore::new())
        }
    };
    let store = AtomicStore::new(backend, config.store_max_retries);

    // Collaborators
    let api: Option<Arc<dyn BackendApi>> = match &config.api_base_url {
        Some(url) => Some(Arc::new(HttpBackendApi::new(url, config.api_timeout)?)),
        None => {
            tracing::warn!("CREDEX_API_BASE_URL not set; API components will fail");
            None
        }
    };

    let whatsapp = &config.whatsapp;
    if whatsapp.access_token.is_none() || whatsapp.phone_number_id.is_none() {
        tracing::warn!(
            "WhatsApp credentials not configured. Set WHATSAPP_ACCESS_TOKEN and WHATSAPP_PHONE_NUMBER_ID."
        );
    }
    let messaging = Arc::new(WhatsAppClient::new(
        &whatsapp.api_base,
        whatsapp.phone_number_id.as_deref().unwrap_or_default(),
        whatsapp.access_token.clone().unwrap_or_default(),
        MESSAGING_TIMEOUT,
    )?);

    // Flow engine
    let settings = config.flow_settings();
    let registry = ComponentRegistry::with_defaults(settings.state_ttl);
    registry.verify_table()?;
    tracing::info!(
        mode = ?settings.mode,
        max_depth = settings.max_depth,
        state_ttl_secs = settings.state_ttl.as_secs(),
        "Flow engine ready"
    );
    let processor = FlowProcessor::new(store, Arc::new(registry), messaging, api, settings);

    let state = AppState::new(
        processor,
        whatsapp.verify_token.clone(),
        config.allow_mock_testing,
    );
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Credex flow server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Drop expired conversations from SQLite in the background
fn spawn_purge(store: Arc<SqliteStore>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PURGE_INTERVAL);
        loop {
            interval.tick().await;
            match store.purge_expired() {
                Ok(0) => {}
                Ok(purged) => tracing::debug!(purged, "Purged expired conversations"),
                Err(e) => tracing::warn!(error = %e, "Failed to purge expired conversations"),
            }
        }
    });
}
