use anyhow::Result;
use sqlx::PgPool;

use crate::domain::{Meter, MeterId};

/// Resolve an operator-facing meter code to the internal meter id.
pub async fn resolve_meter_code(pool: &PgPool, code: &str) -> Result<Option<MeterId>> {
    let id = sqlx::query_scalar::<_, MeterId>("SELECT id FROM meters WHERE code = $1")
        .bind(code)
        .fetch_optional(pool)
        .await?;

    Ok(id)
}

pub async fn meters_by_ids(pool: &PgPool, ids: &[MeterId]) -> Result<Vec<Meter>> {
    let rows = sqlx::query_as::<_, Meter>(
        r#"
        SELECT id, code, location
        FROM meters
        WHERE id = ANY($1)
        ORDER BY code
        "#,
    )
    .bind(ids)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
