//! Profile-scoped weighting and SARFI aggregation.
//!
//! Every operation that reads or rewrites a profile's weight table runs
//! inside that profile's lane, so readers never observe a half-written set of
//! weight factors and two recalculations never interleave.

use std::sync::Arc;

use pq_client::domain::{MeterId, Profile, ProfileId, WeightId};

use crate::{
    export::{self, ExportRow},
    import::{self, ImportFormatError, ImportReport, ProfileImporter},
    store::{EventFilter, EventSource, StoreError, WeightStore},
};

pub mod lanes;
pub mod sarfi;
pub mod weights;

pub use lanes::ProfileLanes;
pub use sarfi::{SarfiCounts, SarfiDataPoint, SarfiReport, WeightedSarfiSummary};
pub use weights::{RecalculationReport, WeightWriteFailure};

#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("profile {0} not found")]
    ProfileNotFound(ProfileId),
    #[error("weight entry {weight_id} not found in profile {profile_id}")]
    WeightNotFound { profile_id: ProfileId, weight_id: WeightId },
    #[error("invalid customer count {0}: must be an integer between 0 and {max}", max = weights::MAX_CUSTOMER_COUNT)]
    InvalidCustomerCount(i64),
    #[error("invalid import: {0}")]
    InvalidImport(#[from] ImportFormatError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct SarfiEngine {
    weights: Arc<dyn WeightStore>,
    events: Arc<dyn EventSource>,
    lanes: ProfileLanes,
}

impl SarfiEngine {
    pub fn new(weights: Arc<dyn WeightStore>, events: Arc<dyn EventSource>) -> Self {
        Self {
            weights,
            events,
            lanes: ProfileLanes::new(),
        }
    }

    async fn require_profile(&self, profile_id: ProfileId) -> Result<Profile, EngineError> {
        self.weights
            .get_profile(profile_id)
            .await?
            .ok_or(EngineError::ProfileNotFound(profile_id))
    }

    /// Fetch, compute and persist. Callers must hold the profile lane.
    async fn recalculate_locked(&self, profile_id: ProfileId) -> Result<RecalculationReport, EngineError> {
        let entries = self.weights.list_weights(profile_id).await?;
        let computation = weights::compute_weight_factors(&entries);

        if computation.is_zero_total() {
            tracing::warn!(
                profile_id,
                entries = entries.len(),
                "profile has zero total customers, all weight factors set to 0"
            );
            metrics::counter!("sarfi_zero_total_profiles_total").increment(1);
        }

        let outcomes = self
            .weights
            .batch_set_weight_factors(profile_id, &computation.updates)
            .await?;
        let report = RecalculationReport::from_outcomes(profile_id, entries, &computation, outcomes);

        metrics::counter!("sarfi_weight_recalculations_total").increment(1);
        if report.is_complete() {
            tracing::info!(
                profile_id,
                entries = report.entries.len(),
                total_customers = report.total_customers,
                "weight factors recalculated"
            );
        } else {
            metrics::counter!("sarfi_weight_write_failures_total").increment(report.failures.len() as u64);
            tracing::error!(
                profile_id,
                failed = report.failures.len(),
                entries = report.entries.len(),
                "weight factors partially written"
            );
        }

        Ok(report)
    }

    /// Recompute every weight factor of a profile from its customer counts.
    pub async fn recalculate(&self, profile_id: ProfileId) -> Result<RecalculationReport, EngineError> {
        let _lane = self.lanes.acquire(profile_id).await;
        self.require_profile(profile_id).await?;
        self.recalculate_locked(profile_id).await
    }

    /// Manual edit of one meter's customer count, followed by a full
    /// recalculation of the profile.
    pub async fn set_customer_count(
        &self,
        profile_id: ProfileId,
        meter_id: MeterId,
        customer_count: i64,
        note: Option<&str>,
    ) -> Result<RecalculationReport, EngineError> {
        if !(0..=weights::MAX_CUSTOMER_COUNT).contains(&customer_count) {
            return Err(EngineError::InvalidCustomerCount(customer_count));
        }

        let _lane = self.lanes.acquire(profile_id).await;
        self.require_profile(profile_id).await?;
        if self.weights.list_meters(&[meter_id]).await?.is_empty() {
            return Err(StoreError::NotFound(format!("meter {meter_id}")).into());
        }
        self.weights
            .upsert_weight(profile_id, meter_id, customer_count, note)
            .await?;
        self.recalculate_locked(profile_id).await
    }

    /// Drop a meter from the profile and renormalize the rest.
    pub async fn remove_weight(
        &self,
        profile_id: ProfileId,
        weight_id: WeightId,
    ) -> Result<RecalculationReport, EngineError> {
        let _lane = self.lanes.acquire(profile_id).await;
        self.require_profile(profile_id).await?;

        let belongs = self
            .weights
            .list_weights(profile_id)
            .await?
            .iter()
            .any(|w| w.id == weight_id);
        if !belongs {
            return Err(EngineError::WeightNotFound { profile_id, weight_id });
        }

        self.weights.delete_weight(weight_id).await?;
        self.recalculate_locked(profile_id).await
    }

    /// Import customer counts from delimited text.
    ///
    /// A missing profile or a bad header fails the whole import before any
    /// row is touched. Row problems are reported in the result.
    pub async fn import_weights(&self, profile_id: ProfileId, text: &str) -> Result<ImportReport, EngineError> {
        let digest = import::import_digest(text);
        let _lane = self.lanes.acquire(profile_id).await;
        self.require_profile(profile_id).await?;

        let rows = import::parse_import(text)?;
        let mut report = ProfileImporter::new(self.weights.as_ref())
            .apply(profile_id, &rows)
            .await;

        if report.success_count > 0 {
            report.recalculation = Some(self.recalculate_locked(profile_id).await?);
        }

        tracing::info!(
            profile_id,
            import_digest = %digest,
            rows = rows.len(),
            succeeded = report.success_count,
            failed = report.failed_count,
            "profile weight import finished"
        );

        Ok(report)
    }

    /// Classify dip events for the profile's meters and weight them.
    pub async fn sarfi_report(&self, profile_id: ProfileId, filter: &EventFilter) -> Result<SarfiReport, EngineError> {
        let _lane = self.lanes.acquire(profile_id).await;
        self.require_profile(profile_id).await?;

        let entries = self.weights.list_weights(profile_id).await?;
        let meter_ids: Vec<MeterId> = entries.iter().map(|e| e.meter_id).collect();
        let events = self.events.query_dip_events(&meter_ids, filter).await?;

        let report = sarfi::aggregate(profile_id, &entries, &events);
        metrics::counter!("sarfi_reports_total").increment(1);
        tracing::debug!(
            profile_id,
            meters = report.datapoints.len(),
            events = report.events_considered,
            skipped = report.events_skipped,
            "sarfi report computed"
        );

        Ok(report)
    }

    /// Weight table rows shaped for spreadsheet export, with a totals row.
    pub async fn export_rows(&self, profile_id: ProfileId) -> Result<Vec<ExportRow>, EngineError> {
        let _lane = self.lanes.acquire(profile_id).await;
        self.require_profile(profile_id).await?;

        let entries = self.weights.list_weights(profile_id).await?;
        let meter_ids: Vec<MeterId> = entries.iter().map(|e| e.meter_id).collect();
        let meters = self.weights.list_meters(&meter_ids).await?;

        Ok(export::build_rows(&entries, &meters))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use pq_client::domain::DipEvent;
    use time::macros::datetime;

    struct Fixture {
        store: Arc<MemoryStore>,
        engine: SarfiEngine,
        profile: Profile,
    }

    fn fixture(meters: &[&str]) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let profile = store.insert_profile("System 2024", 2024, true).unwrap();
        for code in meters {
            store.insert_meter(code, Some("substation")).unwrap();
        }
        let engine = SarfiEngine::new(store.clone(), store.clone());
        Fixture { store, engine, profile }
    }

    async fn meter_id(store: &MemoryStore, code: &str) -> MeterId {
        store.resolve_meter_code(code).await.unwrap().unwrap()
    }

    fn dip(meter_id: MeterId, remaining_voltage: f64, special: bool) -> DipEvent {
        DipEvent {
            id: 0,
            meter_id,
            ts: datetime!(2024-07-15 14:00:00 UTC),
            remaining_voltage: Some(remaining_voltage),
            magnitude: None,
            voltage_level: Some("11kV".to_string()),
            is_special_event: special,
        }
    }

    #[tokio::test]
    async fn recalculation_normalizes_customer_counts() {
        let f = fixture(&["SS-01", "SS-02"]);
        let a = meter_id(&f.store, "SS-01").await;
        let b = meter_id(&f.store, "SS-02").await;
        f.store.upsert_weight(f.profile.id, a, 3000, None).await.unwrap();
        f.store.upsert_weight(f.profile.id, b, 1000, None).await.unwrap();

        let report = f.engine.recalculate(f.profile.id).await.unwrap();

        assert!(report.is_complete());
        let factors: Vec<f64> = report.entries.iter().map(|e| e.weight_factor).collect();
        assert_eq!(factors, vec![0.75, 0.25]);
        let stored: Vec<f64> = f
            .store
            .list_weights(f.profile.id)
            .await
            .unwrap()
            .iter()
            .map(|e| e.weight_factor)
            .collect();
        assert_eq!(stored, factors);
    }

    #[tokio::test]
    async fn recalculating_twice_changes_nothing() {
        let f = fixture(&["SS-01", "SS-02", "SS-03"]);
        for (code, n) in [("SS-01", 1), ("SS-02", 2), ("SS-03", 4)] {
            let id = meter_id(&f.store, code).await;
            f.store.upsert_weight(f.profile.id, id, n, None).await.unwrap();
        }

        let first = f.engine.recalculate(f.profile.id).await.unwrap();
        let second = f.engine.recalculate(f.profile.id).await.unwrap();

        assert_eq!(first.entries, second.entries);
        assert!((second.weight_factor_sum() - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn zero_total_profile_is_valid() {
        let f = fixture(&["SS-01"]);
        let id = meter_id(&f.store, "SS-01").await;
        f.engine.set_customer_count(f.profile.id, id, 0, None).await.unwrap();

        let report = f.engine.recalculate(f.profile.id).await.unwrap();
        assert_eq!(report.total_customers, 0);
        assert!(report.entries.iter().all(|e| e.weight_factor == 0.0));
    }

    #[tokio::test]
    async fn missing_profile_is_an_error() {
        let f = fixture(&[]);
        let err = f.engine.recalculate(f.profile.id + 1000).await.unwrap_err();
        assert!(matches!(err, EngineError::ProfileNotFound(_)));
    }

    #[tokio::test]
    async fn lookups_of_missing_profiles_leave_no_lanes_behind() {
        let f = fixture(&[]);
        for offset in 1..=500 {
            let err = f.engine.recalculate(f.profile.id + offset).await.unwrap_err();
            assert!(matches!(err, EngineError::ProfileNotFound(_)));
        }
        f.engine.recalculate(f.profile.id).await.unwrap();
        assert!(f.engine.lanes.is_empty());
    }

    #[tokio::test]
    async fn manual_edit_renormalizes_whole_profile() {
        let f = fixture(&["SS-01", "SS-02"]);
        let a = meter_id(&f.store, "SS-01").await;
        let b = meter_id(&f.store, "SS-02").await;
        f.engine.set_customer_count(f.profile.id, a, 100, None).await.unwrap();
        let report = f.engine.set_customer_count(f.profile.id, b, 300, Some("feeder split")).await.unwrap();

        let by_meter = |m: MeterId| report.entries.iter().find(|e| e.meter_id == m).unwrap().clone();
        assert_eq!(by_meter(a).weight_factor, 0.25);
        assert_eq!(by_meter(b).weight_factor, 0.75);
        assert_eq!(by_meter(b).note.as_deref(), Some("feeder split"));
    }

    #[tokio::test]
    async fn negative_manual_count_is_rejected() {
        let f = fixture(&["SS-01"]);
        let id = meter_id(&f.store, "SS-01").await;
        let err = f.engine.set_customer_count(f.profile.id, id, -5, None).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidCustomerCount(-5)));
        assert!(f.store.list_weights(f.profile.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn manual_edit_of_unknown_meter_is_not_found() {
        let f = fixture(&["SS-01"]);
        let err = f.engine.set_customer_count(f.profile.id, 9999, 5, None).await.unwrap_err();
        assert!(matches!(err, EngineError::Store(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn manual_count_above_ceiling_is_rejected() {
        let f = fixture(&["SS-01"]);
        let id = meter_id(&f.store, "SS-01").await;
        let err = f
            .engine
            .set_customer_count(f.profile.id, id, weights::MAX_CUSTOMER_COUNT + 1, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidCustomerCount(_)));
        assert!(f.store.list_weights(f.profile.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn removing_an_entry_renormalizes_the_rest() {
        let f = fixture(&["SS-01", "SS-02"]);
        let a = meter_id(&f.store, "SS-01").await;
        let b = meter_id(&f.store, "SS-02").await;
        f.engine.set_customer_count(f.profile.id, a, 100, None).await.unwrap();
        let report = f.engine.set_customer_count(f.profile.id, b, 100, None).await.unwrap();
        let doomed = report.entries.iter().find(|e| e.meter_id == a).unwrap().id;

        let report = f.engine.remove_weight(f.profile.id, doomed).await.unwrap();

        assert_eq!(report.entries.len(), 1);
        assert_eq!(report.entries[0].weight_factor, 1.0);
    }

    #[tokio::test]
    async fn removing_an_entry_of_another_profile_fails() {
        let f = fixture(&["SS-01"]);
        let other = f.store.insert_profile("Other", 2024, false).unwrap();
        let id = meter_id(&f.store, "SS-01").await;
        let report = f.engine.set_customer_count(other.id, id, 10, None).await.unwrap();

        let err = f
            .engine
            .remove_weight(f.profile.id, report.entries[0].id)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::WeightNotFound { .. }));
        assert_eq!(f.store.list_weights(other.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn partial_write_failure_is_reported_not_fatal() {
        let f = fixture(&["SS-01", "SS-02"]);
        let a = meter_id(&f.store, "SS-01").await;
        let b = meter_id(&f.store, "SS-02").await;
        f.store.upsert_weight(f.profile.id, a, 3000, None).await.unwrap();
        let stuck = f.store.upsert_weight(f.profile.id, b, 1000, None).await.unwrap();
        f.store.fail_weight_writes(stuck.id).unwrap();

        let report = f.engine.recalculate(f.profile.id).await.unwrap();

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].weight_id, stuck.id);
        assert_eq!(report.failures[0].meter_id, Some(b));
        let stored = f.store.list_weights(f.profile.id).await.unwrap();
        assert_eq!(stored.iter().find(|e| e.meter_id == a).unwrap().weight_factor, 0.75);
    }

    #[tokio::test]
    async fn import_for_missing_profile_processes_nothing() {
        let f = fixture(&["SS-01"]);
        let err = f
            .engine
            .import_weights(f.profile.id + 1000, "meter_id,customer_count\nSS-01,10\n")
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::ProfileNotFound(_)));
        assert!(f.store.list_weights(f.profile.id + 1000).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn import_with_bad_header_is_rejected() {
        let f = fixture(&["SS-01"]);
        let err = f
            .engine
            .import_weights(f.profile.id, "meter,customers\nSS-01,10\n")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidImport(ImportFormatError::MissingColumn(_))));
    }

    #[tokio::test]
    async fn import_recalculates_once_rows_succeed() {
        let f = fixture(&["SS-01", "SS-02"]);
        let text = "# customer counts, Q1\nmeter_id,customer_count\nSS-01,3000\nSS-02,1000\nSS-99,5\nSS-02,-1\n";

        let report = f.engine.import_weights(f.profile.id, text).await.unwrap();

        assert_eq!(report.success_count, 2);
        assert_eq!(report.failed_count, 2);
        assert_eq!(report.errors[0].row_number, 3);
        assert_eq!(report.errors[0].message, import::MSG_METER_NOT_FOUND);
        assert_eq!(report.errors[1].row_number, 4);
        let recalculation = report.recalculation.expect("recalculation after successful rows");
        assert_eq!(recalculation.total_customers, 4000);
        assert!((recalculation.weight_factor_sum() - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn import_rejects_counts_that_would_overflow_the_total() {
        let f = fixture(&["SS-01", "SS-02"]);
        let text = "meter_id,customer_count\nSS-01,9223372036854775807\nSS-02,1\n";

        let report = f.engine.import_weights(f.profile.id, text).await.unwrap();

        assert_eq!(report.success_count, 1);
        assert_eq!(report.failed_count, 1);
        assert_eq!(report.errors[0].row_number, 1);
        assert_eq!(report.errors[0].message, import::MSG_CUSTOMER_COUNT_TOO_LARGE);
        let recalculation = report.recalculation.unwrap();
        assert_eq!(recalculation.total_customers, 1);
        assert_eq!(recalculation.weight_factor_sum(), 1.0);
    }

    #[tokio::test]
    async fn import_without_valid_rows_skips_recalculation() {
        let f = fixture(&["SS-01"]);
        let report = f
            .engine
            .import_weights(f.profile.id, "meter_id,customer_count\nSS-99,10\n")
            .await
            .unwrap();
        assert_eq!(report.failed_count, 1);
        assert!(report.recalculation.is_none());
    }

    #[tokio::test]
    async fn import_duplicate_meter_last_row_wins() {
        let f = fixture(&["SS-01", "SS-02"]);
        let text = "meter_id,customer_count\nSS-01,500\nSS-02,100\nSS-01,300\n";

        let report = f.engine.import_weights(f.profile.id, text).await.unwrap();

        assert_eq!(report.success_count, 3);
        let a = meter_id(&f.store, "SS-01").await;
        let entries = report.recalculation.unwrap().entries;
        let entry = entries.iter().find(|e| e.meter_id == a).unwrap();
        assert_eq!(entry.customer_count, 300);
        assert_eq!(entry.weight_factor, 0.75);
    }

    #[tokio::test]
    async fn concurrent_imports_leave_a_consistent_profile() {
        let f = fixture(&["SS-01", "SS-02", "SS-03"]);
        let engine = Arc::new(f.engine);

        let batches = [
            "meter_id,customer_count\nSS-01,10\nSS-02,20\n",
            "meter_id,customer_count\nSS-02,5\nSS-03,7\n",
            "meter_id,customer_count\nSS-01,1\nSS-03,1000\n",
        ];
        let tasks = batches.map(|text| {
            let engine = engine.clone();
            let profile_id = f.profile.id;
            tokio::spawn(async move { engine.import_weights(profile_id, text).await })
        });
        for result in futures::future::join_all(tasks).await {
            result.unwrap().unwrap();
        }

        let stored = f.store.list_weights(f.profile.id).await.unwrap();
        let sum: f64 = stored.iter().map(|e| e.weight_factor).sum();
        assert_eq!(stored.len(), 3);
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn sarfi_report_classifies_and_weights_events() {
        let f = fixture(&["SS-01", "SS-02", "SS-03"]);
        f.engine
            .import_weights(f.profile.id, "meter_id,customer_count\nSS-01,3000\nSS-02,1000\n")
            .await
            .unwrap();
        let a = meter_id(&f.store, "SS-01").await;
        let b = meter_id(&f.store, "SS-02").await;
        let outside = meter_id(&f.store, "SS-03").await;

        for v in [85.0, 65.0, 45.0, 25.0, 15.0, 5.0] {
            f.store.insert_dip_event(dip(a, v, false)).unwrap();
        }
        f.store.insert_dip_event(dip(b, 80.0, false)).unwrap();
        f.store.insert_dip_event(dip(b, 60.0, false)).unwrap();
        f.store.insert_dip_event(dip(b, 5.0, true)).unwrap();
        f.store.insert_dip_event(dip(outside, 5.0, false)).unwrap();

        let filter = EventFilter {
            exclude_special: true,
            ..Default::default()
        };
        let report = f.engine.sarfi_report(f.profile.id, &filter).await.unwrap();

        assert_eq!(report.datapoints.len(), 2);
        let dp_a = report.datapoints.iter().find(|d| d.meter_id == a).unwrap();
        let dp_b = report.datapoints.iter().find(|d| d.meter_id == b).unwrap();
        assert_eq!(dp_a.counts.as_array(), [6, 5, 4, 3, 2, 1]);
        assert_eq!(dp_b.counts.as_array(), [2, 1, 0, 0, 0, 0]);
        assert!(report.datapoints.iter().all(|d| d.counts.is_nested()));
        assert!((report.summary.sarfi_10 - 5.0).abs() < 1e-12);
        assert!((report.summary.sarfi_30 - 4.0).abs() < 1e-12);
        assert!((report.summary.sarfi_90 - 0.75).abs() < 1e-12);
    }

    #[tokio::test]
    async fn sarfi_report_honours_voltage_level() {
        let f = fixture(&["SS-01"]);
        f.engine
            .import_weights(f.profile.id, "meter_id,customer_count\nSS-01,10\n")
            .await
            .unwrap();
        let a = meter_id(&f.store, "SS-01").await;
        f.store.insert_dip_event(dip(a, 40.0, false)).unwrap();

        let filter = EventFilter {
            voltage_level: Some("33kV".to_string()),
            ..Default::default()
        };
        let report = f.engine.sarfi_report(f.profile.id, &filter).await.unwrap();
        assert_eq!(report.datapoints[0].counts, SarfiCounts::default());
        assert_eq!(report.events_considered, 0);
    }

    #[tokio::test]
    async fn export_totals_row_reaches_one_hundred_percent() {
        let f = fixture(&["SS-01", "SS-02", "SS-03"]);
        f.engine
            .import_weights(f.profile.id, "meter_id,customer_count\nSS-02,1\nSS-01,1\nSS-03,1\n")
            .await
            .unwrap();

        let rows = f.engine.export_rows(f.profile.id).await.unwrap();

        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].meter_code, "SS-01");
        let totals = rows.last().unwrap();
        assert_eq!(totals.customer_count, 3);
        assert_eq!(totals.weight_factor_percent, "100.0000%");
    }
}
