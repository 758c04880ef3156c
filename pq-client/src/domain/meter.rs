pub type MeterId = i64;

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Meter {
    pub id: MeterId,
    /// Human-readable code used to match import rows.
    pub code: String,
    pub location: Option<String>,
}
