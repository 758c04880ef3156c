use pq_client::domain::{DipEvent, Meter, MeterId, Profile, ProfileId, WeightEntry, WeightId};
use time::{Date, Month, OffsetDateTime};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgWeightStore;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("store backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightFactorUpdate {
    pub id: WeightId,
    pub weight_factor: f64,
}

/// Result of writing one weight factor within a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightWriteOutcome {
    pub id: WeightId,
    pub result: Result<(), String>,
}

impl WeightWriteOutcome {
    pub fn ok(id: WeightId) -> Self {
        Self { id, result: Ok(()) }
    }

    pub fn failed(id: WeightId, message: impl Into<String>) -> Self {
        Self {
            id,
            result: Err(message.into()),
        }
    }
}

/// Selection applied to dip events before classification.
///
/// `from` is inclusive, `to` exclusive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventFilter {
    pub voltage_level: Option<String>,
    pub exclude_special: bool,
    pub from: Option<OffsetDateTime>,
    pub to: Option<OffsetDateTime>,
}

impl EventFilter {
    /// Restrict the filter to events inside calendar year `year` (UTC).
    pub fn within_year(mut self, year: i32) -> Result<Self, time::error::ComponentRange> {
        let start = Date::from_calendar_date(year, Month::January, 1)?;
        let end = Date::from_calendar_date(year + 1, Month::January, 1)?;
        self.from = Some(start.midnight().assume_utc());
        self.to = Some(end.midnight().assume_utc());
        Ok(self)
    }

    pub fn matches(&self, event: &DipEvent) -> bool {
        if self.exclude_special && event.is_special_event {
            return false;
        }
        if let Some(level) = &self.voltage_level {
            if event.voltage_level.as_deref() != Some(level.as_str()) {
                return false;
            }
        }
        if self.from.is_some_and(|from| event.ts < from) {
            return false;
        }
        if self.to.is_some_and(|to| event.ts >= to) {
            return false;
        }
        true
    }
}

/// Persistence collaborator owning profiles, meters and the weight table.
#[async_trait::async_trait]
pub trait WeightStore: Send + Sync {
    async fn get_profile(&self, id: ProfileId) -> Result<Option<Profile>, StoreError>;

    async fn list_weights(&self, profile_id: ProfileId) -> Result<Vec<WeightEntry>, StoreError>;

    async fn upsert_weight(
        &self,
        profile_id: ProfileId,
        meter_id: MeterId,
        customer_count: i64,
        note: Option<&str>,
    ) -> Result<WeightEntry, StoreError>;

    /// Write all factors of one recalculation as a single batch.
    ///
    /// Stores with multi-row atomicity either apply every update or return
    /// `Err`. Stores without it report failed rows in the returned outcomes
    /// and keep the rows that succeeded.
    async fn batch_set_weight_factors(
        &self,
        profile_id: ProfileId,
        updates: &[WeightFactorUpdate],
    ) -> Result<Vec<WeightWriteOutcome>, StoreError>;

    async fn delete_weight(&self, id: WeightId) -> Result<(), StoreError>;

    async fn resolve_meter_code(&self, code: &str) -> Result<Option<MeterId>, StoreError>;

    async fn list_meters(&self, ids: &[MeterId]) -> Result<Vec<Meter>, StoreError>;
}

/// Read-only source of voltage-dip events.
#[async_trait::async_trait]
pub trait EventSource: Send + Sync {
    async fn query_dip_events(
        &self,
        meter_ids: &[MeterId],
        filter: &EventFilter,
    ) -> Result<Vec<DipEvent>, StoreError>;
}
