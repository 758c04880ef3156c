use pq_client::domain::{MeterId, ProfileId, WeightEntry, WeightId};
use serde::Serialize;

use crate::store::{WeightFactorUpdate, WeightWriteOutcome};

/// Largest customer count accepted for a single meter.
///
/// Keeps profile totals far away from `i64` overflow.
pub const MAX_CUSTOMER_COUNT: i64 = 1_000_000_000;

/// Sum of customer counts, saturating at `i64::MAX`.
///
/// Rows written before [`MAX_CUSTOMER_COUNT`] was enforced can still be
/// arbitrarily large, so the sum is taken in `i128`.
pub fn total_customers(entries: &[WeightEntry]) -> i64 {
    saturate(exact_total(entries))
}

fn exact_total(entries: &[WeightEntry]) -> i128 {
    entries.iter().map(|e| i128::from(e.customer_count)).sum()
}

fn saturate(total: i128) -> i64 {
    i64::try_from(total).unwrap_or(if total < 0 { i64::MIN } else { i64::MAX })
}

/// Weight factors computed in memory for one profile, ready to be written as
/// one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightComputation {
    pub total_customers: i64,
    pub updates: Vec<WeightFactorUpdate>,
}

impl WeightComputation {
    pub fn is_zero_total(&self) -> bool {
        self.total_customers == 0
    }
}

/// Normalize customer counts into weight factors.
///
/// Every factor is `customer_count / Σ customer_count` over `entries`, which
/// must hold the whole profile. A zero total yields all-zero factors.
/// Counts are expected to be non-negative; callers validate them before they
/// reach the weight table.
pub fn compute_weight_factors(entries: &[WeightEntry]) -> WeightComputation {
    let total = exact_total(entries);

    let updates = entries
        .iter()
        .map(|e| WeightFactorUpdate {
            id: e.id,
            weight_factor: if total == 0 {
                0.0
            } else {
                e.customer_count as f64 / total as f64
            },
        })
        .collect();

    WeightComputation {
        total_customers: saturate(total),
        updates,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeightWriteFailure {
    pub weight_id: WeightId,
    pub meter_id: Option<MeterId>,
    pub message: String,
}

/// Outcome of a profile-wide recalculation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecalculationReport {
    pub profile_id: ProfileId,
    pub total_customers: i64,
    /// Entries as they stand after the write; failed rows keep their old factor.
    pub entries: Vec<WeightEntry>,
    pub failures: Vec<WeightWriteFailure>,
}

impl RecalculationReport {
    pub(crate) fn from_outcomes(
        profile_id: ProfileId,
        mut entries: Vec<WeightEntry>,
        computation: &WeightComputation,
        outcomes: Vec<WeightWriteOutcome>,
    ) -> Self {
        let mut failures = Vec::new();

        for outcome in outcomes {
            let entry = entries.iter_mut().find(|e| e.id == outcome.id);
            match outcome.result {
                Ok(()) => {
                    let factor = computation
                        .updates
                        .iter()
                        .find(|u| u.id == outcome.id)
                        .map(|u| u.weight_factor);
                    if let (Some(entry), Some(factor)) = (entry, factor) {
                        entry.weight_factor = factor;
                    }
                }
                Err(message) => failures.push(WeightWriteFailure {
                    weight_id: outcome.id,
                    meter_id: entry.map(|e| e.meter_id),
                    message,
                }),
            }
        }

        Self {
            profile_id,
            total_customers: computation.total_customers,
            entries,
            failures,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn weight_factor_sum(&self) -> f64 {
        self.entries.iter().map(|e| e.weight_factor).sum()
    }
}
