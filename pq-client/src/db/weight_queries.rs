use anyhow::Result;
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::domain::{MeterId, ProfileId, WeightEntry, WeightId};

// Stays well below the Postgres limit of 65535 bind parameters per statement.
const FACTOR_UPDATE_CHUNK: usize = 10_000;

pub async fn list_weights(pool: &PgPool, profile_id: ProfileId) -> Result<Vec<WeightEntry>> {
    let rows = sqlx::query_as::<_, WeightEntry>(
        r#"
        SELECT id, profile_id, meter_id, customer_count, weight_factor, note
        FROM sarfi_profile_weights
        WHERE profile_id = $1
        ORDER BY id
        "#,
    )
    .bind(profile_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Insert or update the customer count for `(profile_id, meter_id)`.
///
/// A `None` note leaves an existing note untouched.
pub async fn upsert_weight(
    pool: &PgPool,
    profile_id: ProfileId,
    meter_id: MeterId,
    customer_count: i64,
    note: Option<&str>,
) -> Result<WeightEntry> {
    let row = sqlx::query_as::<_, WeightEntry>(
        r#"
        INSERT INTO sarfi_profile_weights (profile_id, meter_id, customer_count, weight_factor, note)
        VALUES ($1, $2, $3, 0, $4)
        ON CONFLICT (profile_id, meter_id) DO UPDATE
        SET customer_count = EXCLUDED.customer_count,
            note = COALESCE(EXCLUDED.note, sarfi_profile_weights.note),
            updated_at = now()
        RETURNING id, profile_id, meter_id, customer_count, weight_factor, note
        "#,
    )
    .bind(profile_id)
    .bind(meter_id)
    .bind(customer_count)
    .bind(note)
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Write a profile's weight factors in a single transaction.
///
/// Returns the ids that were actually updated; ids that do not belong to
/// `profile_id` are absent from the result.
pub async fn set_weight_factors(
    pool: &PgPool,
    profile_id: ProfileId,
    updates: &[(WeightId, f64)],
) -> Result<Vec<WeightId>> {
    if updates.is_empty() {
        return Ok(Vec::new());
    }

    let mut tx = pool.begin().await?;
    let mut updated = Vec::with_capacity(updates.len());

    for chunk in updates.chunks(FACTOR_UPDATE_CHUNK) {
        let mut builder = QueryBuilder::<Postgres>::new(
            "UPDATE sarfi_profile_weights AS w SET weight_factor = v.weight_factor, updated_at = now() FROM (",
        );
        builder.push_values(chunk, |mut b, (id, factor)| {
            b.push_bind(*id).push_bind(*factor);
        });
        builder.push(") AS v(id, weight_factor) WHERE w.id = v.id AND w.profile_id = ");
        builder.push_bind(profile_id);
        builder.push(" RETURNING w.id");

        let ids: Vec<WeightId> = builder.build_query_scalar().fetch_all(&mut *tx).await?;
        updated.extend(ids);
    }

    tx.commit().await?;
    Ok(updated)
}

/// Returns `false` when no row matched.
pub async fn delete_weight(pool: &PgPool, id: WeightId) -> Result<bool> {
    let result = sqlx::query("DELETE FROM sarfi_profile_weights WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}
