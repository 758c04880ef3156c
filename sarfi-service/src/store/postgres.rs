use std::{collections::HashSet, time::Duration};

use pq_client::{
    db::{dip_event_queries, meter_queries, profile_queries, weight_queries},
    domain::{DipEvent, Meter, MeterId, Profile, ProfileId, WeightEntry, WeightId},
};
use sqlx::postgres::PgPool;

use super::{EventFilter, EventSource, StoreError, WeightFactorUpdate, WeightStore, WeightWriteOutcome};

fn backend(e: anyhow::Error) -> StoreError {
    StoreError::Backend(format!("{e:#}"))
}

/// Postgres-backed store over the `pq-client` query layer.
///
/// Weight factor batches are written in one transaction and retried with a
/// linear backoff before the error is surfaced.
pub struct PgWeightStore {
    pool: PgPool,
    max_retries: u32,
    retry_backoff: Duration,
}

impl PgWeightStore {
    pub fn new(pool: PgPool, max_retries: u32, retry_backoff: Duration) -> Self {
        Self {
            pool,
            max_retries,
            retry_backoff,
        }
    }

    async fn write_factors(&self, profile_id: ProfileId, rows: &[(WeightId, f64)]) -> Result<Vec<WeightId>, StoreError> {
        let mut attempt: u32 = 0;
        loop {
            match weight_queries::set_weight_factors(&self.pool, profile_id, rows).await {
                Ok(ids) => return Ok(ids),
                Err(e) if attempt < self.max_retries => {
                    attempt += 1;
                    let sleep_for = self.retry_backoff * attempt;
                    tracing::warn!(
                        error = %e,
                        attempt,
                        profile_id,
                        "weight factor batch failed, retrying with backoff"
                    );
                    metrics::counter!("sarfi_store_retry_total").increment(1);
                    tokio::time::sleep(sleep_for).await;
                }
                Err(e) => {
                    tracing::error!(error = %e, profile_id, "weight factor batch failed, giving up");
                    return Err(backend(e));
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl WeightStore for PgWeightStore {
    async fn get_profile(&self, id: ProfileId) -> Result<Option<Profile>, StoreError> {
        profile_queries::get_profile(&self.pool, id).await.map_err(backend)
    }

    async fn list_weights(&self, profile_id: ProfileId) -> Result<Vec<WeightEntry>, StoreError> {
        weight_queries::list_weights(&self.pool, profile_id)
            .await
            .map_err(backend)
    }

    async fn upsert_weight(
        &self,
        profile_id: ProfileId,
        meter_id: MeterId,
        customer_count: i64,
        note: Option<&str>,
    ) -> Result<WeightEntry, StoreError> {
        weight_queries::upsert_weight(&self.pool, profile_id, meter_id, customer_count, note)
            .await
            .map_err(backend)
    }

    async fn batch_set_weight_factors(
        &self,
        profile_id: ProfileId,
        updates: &[WeightFactorUpdate],
    ) -> Result<Vec<WeightWriteOutcome>, StoreError> {
        let rows: Vec<(WeightId, f64)> = updates.iter().map(|u| (u.id, u.weight_factor)).collect();
        let written: HashSet<WeightId> = self.write_factors(profile_id, &rows).await?.into_iter().collect();

        Ok(updates
            .iter()
            .map(|u| {
                if written.contains(&u.id) {
                    WeightWriteOutcome::ok(u.id)
                } else {
                    WeightWriteOutcome::failed(u.id, format!("weight entry not found in profile {profile_id}"))
                }
            })
            .collect())
    }

    async fn delete_weight(&self, id: WeightId) -> Result<(), StoreError> {
        match weight_queries::delete_weight(&self.pool, id).await.map_err(backend)? {
            true => Ok(()),
            false => Err(StoreError::NotFound(format!("weight entry {id}"))),
        }
    }

    async fn resolve_meter_code(&self, code: &str) -> Result<Option<MeterId>, StoreError> {
        meter_queries::resolve_meter_code(&self.pool, code)
            .await
            .map_err(backend)
    }

    async fn list_meters(&self, ids: &[MeterId]) -> Result<Vec<Meter>, StoreError> {
        meter_queries::meters_by_ids(&self.pool, ids).await.map_err(backend)
    }
}

#[async_trait::async_trait]
impl EventSource for PgWeightStore {
    async fn query_dip_events(
        &self,
        meter_ids: &[MeterId],
        filter: &EventFilter,
    ) -> Result<Vec<DipEvent>, StoreError> {
        let q = dip_event_queries::DipEventQuery {
            meter_ids,
            voltage_level: filter.voltage_level.as_deref(),
            exclude_special: filter.exclude_special,
            from: filter.from,
            to: filter.to,
        };
        dip_event_queries::dip_events(&self.pool, &q).await.map_err(backend)
    }
}
