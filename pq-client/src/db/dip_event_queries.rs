use anyhow::Result;
use sqlx::PgPool;
use time::OffsetDateTime;

use crate::domain::{DipEvent, MeterId};

/// Filters applied server-side when fetching dip events.
#[derive(Debug, Clone, Default)]
pub struct DipEventQuery<'a> {
    pub meter_ids: &'a [MeterId],
    pub voltage_level: Option<&'a str>,
    pub exclude_special: bool,
    pub from: Option<OffsetDateTime>,
    pub to: Option<OffsetDateTime>,
}

pub async fn dip_events(pool: &PgPool, q: &DipEventQuery<'_>) -> Result<Vec<DipEvent>> {
    let rows = sqlx::query_as::<_, DipEvent>(
        r#"
        SELECT
            id,
            meter_id,
            ts,
            remaining_voltage,
            magnitude,
            voltage_level,
            is_special_event
        FROM pq_dip_events
        WHERE meter_id = ANY($1)
          AND ($2::text IS NULL OR voltage_level = $2)
          AND (NOT $3 OR NOT is_special_event)
          AND ($4::timestamptz IS NULL OR ts >= $4)
          AND ($5::timestamptz IS NULL OR ts <  $5)
        ORDER BY ts
        "#,
    )
    .bind(q.meter_ids)
    .bind(q.voltage_level)
    .bind(q.exclude_special)
    .bind(q.from)
    .bind(q.to)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
