use anyhow::{bail, Context, Result};
use sarfi_service::{config::AppConfig, engine::SarfiEngine, observability, store::PgWeightStore};
use sqlx::postgres::PgPoolOptions;
use std::{env, sync::Arc};

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing("import_profile_weights");

    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        bail!("usage: import_profile_weights <profile_id> <csv_file_path>");
    }
    let profile_id: i64 = args[1].parse().with_context(|| format!("invalid profile id '{}'", args[1]))?;
    let file_path = &args[2];

    let text = tokio::fs::read_to_string(file_path)
        .await
        .with_context(|| format!("failed to read {file_path}"))?;

    let cfg = AppConfig::load()?;
    let pool = PgPoolOptions::new()
        .max_connections(cfg.database.max_connections)
        .connect(&cfg.database.uri)
        .await?;
    let store = Arc::new(PgWeightStore::new(pool, cfg.store.max_retries, cfg.store.retry_backoff()));
    let engine = SarfiEngine::new(store.clone(), store);

    let report = engine.import_weights(profile_id, &text).await?;

    for e in &report.errors {
        tracing::warn!(row = e.row_number, meter_code = %e.meter_code, "{}", e.message);
    }
    tracing::info!(
        profile_id,
        succeeded = report.success_count,
        failed = report.failed_count,
        "import complete"
    );
    if let Some(recalc) = &report.recalculation {
        if !recalc.is_complete() {
            bail!("{} weight factors could not be written", recalc.failures.len());
        }
    }

    Ok(())
}
