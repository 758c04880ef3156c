use anyhow::Result;
use sarfi_service::{api, config::AppConfig, engine::SarfiEngine, metrics_server, observability, store::PgWeightStore};
use sqlx::postgres::PgPoolOptions;
use std::{net::SocketAddr, sync::Arc};

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing("sarfi_service");

    // Load configuration
    let cfg = AppConfig::load()?;

    // Start metrics server if configured
    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_server::init(&metrics_cfg.bind_addr)?;
    }

    let pool = PgPoolOptions::new()
        .max_connections(cfg.database.max_connections)
        .connect(&cfg.database.uri)
        .await?;

    let store = Arc::new(PgWeightStore::new(
        pool,
        cfg.store.max_retries,
        cfg.store.retry_backoff(),
    ));
    let engine = Arc::new(SarfiEngine::new(store.clone(), store));

    let addr: SocketAddr = cfg
        .http
        .bind_addr
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid http.bind_addr: {e}"))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "sarfi service listening");

    axum::serve(listener, api::router(engine, cfg.http.max_import_bytes).into_make_service()).await?;

    Ok(())
}
