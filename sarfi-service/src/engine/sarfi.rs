//! Voltage-dip classification into SARFI buckets and customer-weighted
//! aggregation.

use std::collections::HashMap;

use pq_client::domain::{DipEvent, MeterId, ProfileId, WeightEntry};
use serde::Serialize;

/// Remaining-voltage thresholds (percent of nominal) for SARFI-10 through
/// SARFI-90, in bucket order. An event is counted in every bucket whose
/// threshold its remaining voltage is strictly below.
pub const SARFI_THRESHOLDS: [f64; 6] = [90.0, 70.0, 50.0, 30.0, 20.0, 10.0];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SarfiCounts {
    pub sarfi_10: u32,
    pub sarfi_30: u32,
    pub sarfi_50: u32,
    pub sarfi_70: u32,
    pub sarfi_80: u32,
    pub sarfi_90: u32,
}

impl SarfiCounts {
    pub fn record(&mut self, remaining_voltage: f64) {
        let buckets = [
            &mut self.sarfi_10,
            &mut self.sarfi_30,
            &mut self.sarfi_50,
            &mut self.sarfi_70,
            &mut self.sarfi_80,
            &mut self.sarfi_90,
        ];
        for (bucket, threshold) in buckets.into_iter().zip(SARFI_THRESHOLDS) {
            if remaining_voltage < threshold {
                *bucket += 1;
            }
        }
    }

    pub fn as_array(&self) -> [u32; 6] {
        [
            self.sarfi_10,
            self.sarfi_30,
            self.sarfi_50,
            self.sarfi_70,
            self.sarfi_80,
            self.sarfi_90,
        ]
    }

    /// Whether every bucket is at least as large as the next, stricter one.
    pub fn is_nested(&self) -> bool {
        self.as_array().windows(2).all(|w| w[0] >= w[1])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SarfiDataPoint {
    pub meter_id: MeterId,
    pub customer_count: i64,
    pub weight_factor: f64,
    #[serde(flatten)]
    pub counts: SarfiCounts,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct WeightedSarfiSummary {
    pub sarfi_10: f64,
    pub sarfi_30: f64,
    pub sarfi_50: f64,
    pub sarfi_70: f64,
    pub sarfi_80: f64,
    pub sarfi_90: f64,
}

impl From<[f64; 6]> for WeightedSarfiSummary {
    fn from(v: [f64; 6]) -> Self {
        Self {
            sarfi_10: v[0],
            sarfi_30: v[1],
            sarfi_50: v[2],
            sarfi_70: v[3],
            sarfi_80: v[4],
            sarfi_90: v[5],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SarfiReport {
    pub profile_id: ProfileId,
    pub datapoints: Vec<SarfiDataPoint>,
    pub summary: WeightedSarfiSummary,
    pub events_considered: usize,
    /// Events whose meter is not part of the profile.
    pub events_skipped: usize,
}

/// Count events per meter. Events for meters outside `entries` are skipped.
///
/// Returns one datapoint per entry, in entry order, and the number of
/// skipped events.
pub fn classify_events(entries: &[WeightEntry], events: &[DipEvent]) -> (Vec<SarfiDataPoint>, usize) {
    let mut datapoints: Vec<SarfiDataPoint> = entries
        .iter()
        .map(|e| SarfiDataPoint {
            meter_id: e.meter_id,
            customer_count: e.customer_count,
            weight_factor: e.weight_factor,
            counts: SarfiCounts::default(),
        })
        .collect();
    let index: HashMap<MeterId, usize> = datapoints
        .iter()
        .enumerate()
        .map(|(i, dp)| (dp.meter_id, i))
        .collect();

    let mut skipped = 0;
    for event in events {
        match index.get(&event.meter_id) {
            Some(&i) => datapoints[i].counts.record(event.effective_remaining_voltage()),
            None => {
                tracing::debug!(meter_id = event.meter_id, event_id = event.id, "dip event outside profile skipped");
                skipped += 1;
            }
        }
    }

    (datapoints, skipped)
}

/// Customer-weighted average of each bucket across `datapoints`.
///
/// Datapoints with a non-finite weight are left out. A zero weight sum gives
/// an all-zero summary.
pub fn weighted_summary(datapoints: &[SarfiDataPoint]) -> WeightedSarfiSummary {
    let mut weighted = [0.0_f64; 6];
    let mut weight_sum = 0.0_f64;

    for dp in datapoints.iter().filter(|dp| dp.weight_factor.is_finite()) {
        weight_sum += dp.weight_factor;
        for (acc, count) in weighted.iter_mut().zip(dp.counts.as_array()) {
            *acc += f64::from(count) * dp.weight_factor;
        }
    }

    if weight_sum == 0.0 {
        return WeightedSarfiSummary::default();
    }

    weighted.map(|v| v / weight_sum).into()
}

pub fn aggregate(profile_id: ProfileId, entries: &[WeightEntry], events: &[DipEvent]) -> SarfiReport {
    let (datapoints, events_skipped) = classify_events(entries, events);
    let summary = weighted_summary(&datapoints);

    SarfiReport {
        profile_id,
        datapoints,
        summary,
        events_considered: events.len() - events_skipped,
        events_skipped,
    }
}
