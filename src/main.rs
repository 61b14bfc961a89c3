use std::sync::Arc;

use actix_web::{web, App, HttpServer};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod auth;
mod config;
mod engine;
mod metrics;
mod models;
mod store;

use api::AppState;
use config::Config;
use engine::OrderEngine;
use store::{PgStore, Store};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging with environment-based filtering
    // Default to INFO level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,storefront=debug")),
        )
        .init();

    let config = Config::from_env();
    tracing::info!(bind_addr = %config.bind_addr, "Starting storefront API");

    // === 1. Connect to PostgreSQL and bootstrap the schema ===
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;
    let store = PgStore::new(pool);
    store.ensure_schema().await?;
    let store: Arc<dyn Store> = Arc::new(store);

    // === 2. Initialize Prometheus metrics ===
    let metrics = Arc::new(metrics::Metrics::new()?);

    // Start metrics HTTP server in background thread
    let metrics_registry = Arc::new(metrics.registry().clone());
    let metrics_port = config.metrics_port;
    std::thread::spawn(move || {
        let rt = tokio::runtime::Runtime::new().expect("metrics runtime");
        rt.block_on(async {
            if let Err(e) = metrics::start_metrics_server(metrics_registry, metrics_port).await {
                tracing::error!("Metrics server error: {}", e);
            }
        });
    });

    // === 3. Wire the order engine and serve the API ===
    let engine = OrderEngine::new(store.clone());
    let state = web::Data::new(AppState {
        store,
        engine,
        metrics,
    });

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .configure(api::configure)
    })
    .bind(config.bind_addr.as_str())?
    .run()
    .await?;

    Ok(())
}
