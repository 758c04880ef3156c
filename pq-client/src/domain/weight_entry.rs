use super::{MeterId, ProfileId};

pub type WeightId = i64;

/// Customer count and derived weight factor of one meter within one profile.
///
/// `weight_factor` is owned by the recalculation step and is only ever
/// written as part of a profile-wide batch.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WeightEntry {
    pub id: WeightId,
    pub profile_id: ProfileId,
    pub meter_id: MeterId,
    pub customer_count: i64,
    pub weight_factor: f64,
    pub note: Option<String>,
}
