use anyhow::{bail, Context, Result};
use sarfi_service::{config::AppConfig, engine::SarfiEngine, observability, store::PgWeightStore};
use sqlx::postgres::PgPoolOptions;
use std::{env, sync::Arc};

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing("recalculate_weights");

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        bail!("usage: recalculate_weights <profile_id>");
    }
    let profile_id: i64 = args[1].parse().with_context(|| format!("invalid profile id '{}'", args[1]))?;

    let cfg = AppConfig::load()?;
    let pool = PgPoolOptions::new()
        .max_connections(cfg.database.max_connections)
        .connect(&cfg.database.uri)
        .await?;
    let store = Arc::new(PgWeightStore::new(pool, cfg.store.max_retries, cfg.store.retry_backoff()));
    let engine = SarfiEngine::new(store.clone(), store);

    let report = engine.recalculate(profile_id).await?;
    for f in &report.failures {
        tracing::error!(weight_id = f.weight_id, "{}", f.message);
    }
    if !report.is_complete() {
        bail!("{} of {} weight factors could not be written", report.failures.len(), report.entries.len());
    }

    tracing::info!(
        profile_id,
        entries = report.entries.len(),
        total_customers = report.total_customers,
        weight_factor_sum = report.weight_factor_sum(),
        "recalculation complete"
    );

    Ok(())
}
