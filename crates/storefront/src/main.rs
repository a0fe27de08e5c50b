//! Storefront service entry point.
//!
//! Serves the catalog, carts, guide articles, lab reports and site settings
//! over HTTP. Carts are persisted in Redis when `REDIS_URL` is set and kept in
//! memory otherwise.

use anyhow::Result;
use external_services::{Backend, BackendClient, KvStore, MemoryKvStore, RedisKvStore};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use storefront::{
    create_router, AppState, ArticleService, CartStore, Catalog, CoaService, Config,
    SettingsService,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting storefront...");

    let config = Config::from_env()?;

    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], config.metrics_port))
        .install()?;
    info!(
        "Prometheus metrics available at http://0.0.0.0:{}/metrics",
        config.metrics_port
    );

    let backend: Arc<dyn Backend> = Arc::new(BackendClient::new(&config.backend_url, &config.api_key));
    info!("Using backend at {}", config.backend_url);

    let kv: Arc<dyn KvStore> = match &config.redis_url {
        Some(url) => {
            info!("Persisting carts in Redis at {}", url);
            Arc::new(RedisKvStore::new(url)?)
        }
        None => {
            warn!("REDIS_URL not set, carts are kept in memory");
            Arc::new(MemoryKvStore::new())
        }
    };

    let settings = Arc::new(SettingsService::new(backend.clone(), config.settings_ttl));
    let app_state = AppState {
        catalog: Catalog::new(backend.clone()),
        carts: CartStore::new(kv),
        articles: ArticleService::new(backend.clone(), settings.clone(), config.default_author.clone()),
        coa: CoaService::new(backend, settings.clone()),
        settings,
    };
    let router = create_router(app_state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.http_port)).await?;
    info!("HTTP API listening on http://0.0.0.0:{}", config.http_port);
    info!("Available endpoints:");
    info!("  GET  /health                      - Health check");
    info!("  GET  /products                    - List products (?search=&sort=)");
    info!("  GET  /cart/{{cart_id}}              - Cart contents and totals");
    info!("  GET  /articles                    - Published guide articles");
    info!("  GET  /coa                         - Lab reports");
    info!("  GET  /settings                    - Site settings");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Storefront stopped");
    Ok(())
}
