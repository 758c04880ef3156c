use time::OffsetDateTime;

use super::MeterId;

/// Remaining voltage assumed when an event carries neither reading.
pub const NO_DIP_VOLTAGE_PCT: f64 = 100.0;

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct DipEvent {
    pub id: i64,
    pub meter_id: MeterId,
    pub ts: OffsetDateTime,
    /// Percent of nominal voltage during the dip.
    pub remaining_voltage: Option<f64>,
    pub magnitude: Option<f64>,
    pub voltage_level: Option<String>,
    pub is_special_event: bool,
}

impl DipEvent {
    /// Remaining voltage used for classification, falling back to
    /// `magnitude` and then to [`NO_DIP_VOLTAGE_PCT`].
    pub fn effective_remaining_voltage(&self) -> f64 {
        self.remaining_voltage
            .or(self.magnitude)
            .unwrap_or(NO_DIP_VOLTAGE_PCT)
    }
}
