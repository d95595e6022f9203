//! Chat router server.
//!
//! Routes `POST /chat` queries to the Property or Tenancy agent.

mod config;

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use rentdesk_agents::{AgentSet, GeminiClient};
use rentdesk_session::{SessionManager, storage::MemoryStorage};
use rentdesk_transport::http::create_router;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = Config::from_env()?;

    let backend =
        GeminiClient::new(config.gemini.clone()).context("failed to build Gemini client")?;
    let agents = AgentSet::new(Arc::new(backend), config.model.clone());
    let storage = MemoryStorage::new().with_history_limit(config.history_limit);
    let manager = Arc::new(SessionManager::new(storage, agents).with_policy(config.selection));

    if let Some(ttl) = config.session_ttl {
        spawn_sweeper(Arc::clone(&manager), ttl);
    }

    let app = create_router(manager, config.max_upload_bytes);

    tracing::info!(
        model = %config.model,
        policy = %config.selection,
        "Server listening on http://{}",
        config.addr
    );

    let listener = tokio::net::TcpListener::bind(config.addr)
        .await
        .with_context(|| format!("failed to bind {}", config.addr))?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Periodically drop sessions idle longer than `ttl`.
fn spawn_sweeper(manager: Arc<SessionManager<MemoryStorage>>, ttl: Duration) {
    let period = (ttl / 2).max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            match manager.evict_idle(ttl).await {
                Ok(0) => {}
                Ok(evicted) => tracing::info!(evicted, "Evicted idle sessions"),
                Err(e) => tracing::warn!("Session sweep failed: {e}"),
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
