//! Dashboard service entry point.
//!
//! Live sales dashboard: recent-orders feed over the backend's realtime
//! channel, period metrics and product rankings over RPC.

use anyhow::{Context, Result};
use common::ChannelManagerConfig;
use dashboard::{
    activate, create_router, spawn_broadcaster, AppState, ClientRegistry, Config, Procedures,
    RecentSalesFeed, SalesDashboard,
};
use external_services::backend::realtime::realtime_url;
use external_services::{Backend, BackendClient};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Clients silent for this long are dropped.
const MAX_CLIENT_IDLE_MS: i64 = 120_000;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting dashboard service");

    let config = Config::from_env()?;
    let realtime = match &config.realtime_url {
        Some(url) => url.clone(),
        None => realtime_url(&config.backend_url, &config.api_key)
            .context("cannot derive realtime URL from BACKEND_URL")?,
    };

    info!("Configuration:");
    info!("  BACKEND_URL: {}", config.backend_url);
    info!("  HTTP_PORT: {}", config.http_port);
    info!("  METRICS_PORT: {}", config.metrics_port);
    info!("  FEED_WINDOW: {}", config.feed_window);
    info!("  TOPLIST_LIMIT: {}", config.toplist_limit);

    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], config.metrics_port))
        .install()
        .context("failed to start Prometheus exporter")?;
    info!("Prometheus metrics server started on port {}", config.metrics_port);

    let backend: Arc<dyn Backend> = Arc::new(BackendClient::new(
        config.backend_url.clone(),
        config.api_key.clone(),
    ));

    // Snapshot first, then the realtime subscription
    let feed = Arc::new(RecentSalesFeed::new(
        backend.clone(),
        realtime,
        config.api_key.clone(),
        config.feed_window,
    ));
    let channel_config = ChannelManagerConfig {
        heartbeat_interval: config.heartbeat_interval,
        channel_label: "recent_sales".to_string(),
        ..Default::default()
    };
    let feed = Arc::new(activate(feed, channel_config).await);

    let dashboard = Arc::new(SalesDashboard::new(
        backend,
        Procedures {
            overview: config.overview_procedure.clone(),
            top_products: config.top_products_procedure.clone(),
            toplist_limit: config.toplist_limit,
        },
    ));
    dashboard.select_period(Default::default()).await;

    let registry = Arc::new(ClientRegistry::new());
    let state = Arc::new(AppState {
        registry: registry.clone(),
        feed: feed.clone(),
        dashboard,
    });

    let (broadcast_shutdown_tx, broadcast_shutdown_rx) = mpsc::channel(1);
    let broadcaster = spawn_broadcaster(state.clone(), broadcast_shutdown_rx);

    let janitor = tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(30));
        loop {
            tick.tick().await;
            let removed = registry.cleanup_stale_clients(MAX_CLIENT_IDLE_MS);
            if removed > 0 {
                warn!("Dropped {} idle clients", removed);
            }
        }
    });

    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    let listener = TcpListener::bind(addr).await?;
    info!("Dashboard listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down...");
    janitor.abort();
    let _ = broadcast_shutdown_tx.send(()).await;
    let _ = broadcaster.await;
    feed.shutdown().await;

    info!("Dashboard stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received terminate signal"),
    }
}
