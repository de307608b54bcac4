//! Server entry point
//!
//! Parses configuration, starts the janitor and the HTTP/WebSocket listener,
//! and shuts down gracefully on SIGINT: connected peers get a
//! `server-closing` notice and in-flight connections have ten seconds to
//! drain before the process exits.

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use pairlink_server::{AppState, Config, Hub, Metrics, Store, protocol, router};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    config.validate()?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let metrics = Arc::new(Metrics::new().context("metrics registry")?);
    let store = Arc::new(Store::new(config.code_ttl()));
    let hub = Arc::new(Hub::new());
    let shutdown = Arc::new(Notify::new());

    let janitor = store
        .clone()
        .spawn_janitor(config.janitor_interval(), shutdown.clone());

    let bind_addr = config.bind_addr();
    let state = AppState::new(config, store, hub.clone(), metrics);
    let app = router(state);

    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("bind {bind_addr}"))?;
    info!(addr = %listener.local_addr()?, "listening");

    {
        let hub = hub.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received");
                hub.broadcast_event_all(&protocol::server_closing());
                shutdown.notify_waiters();
            }
        });
    }

    let graceful = shutdown.clone();
    let serve = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { graceful.notified().await })
    .into_future();

    // Live WebSockets keep the graceful path open indefinitely; cap the
    // drain the same way the shutdown timeout on a classic HTTP server would.
    let drain_cap = shutdown.clone();
    tokio::select! {
        result = serve => result.context("server")?,
        _ = async {
            drain_cap.notified().await;
            tokio::time::sleep(Duration::from_secs(10)).await;
        } => warn!("drain timeout reached, exiting"),
    }

    let _ = janitor.await;
    info!("bye");
    Ok(())
}
