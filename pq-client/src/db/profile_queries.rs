use anyhow::Result;
use sqlx::PgPool;

use crate::domain::{Profile, ProfileId};

pub async fn get_profile(pool: &PgPool, id: ProfileId) -> Result<Option<Profile>> {
    let row = sqlx::query_as::<_, Profile>(
        r#"
        SELECT id, name, year, is_active
        FROM sarfi_profiles
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}
