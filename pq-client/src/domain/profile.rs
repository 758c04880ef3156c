pub type ProfileId = i64;

/// A year-scoped SARFI reporting profile.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Profile {
    pub id: ProfileId,
    pub name: String,
    pub year: i32,
    pub is_active: bool,
}
