//! Bulk customer-count import for a profile's weight table.
//!
//! Expected text layout:
//! - lines starting with `#` and blank lines are ignored
//! - the first remaining line is a header naming `meter_id` and
//!   `customer_count` (any order, extra columns allowed)
//! - every following line is a comma-delimited data row; quote characters
//!   carry no meaning and stay part of the cell
//!
//! `meter_id` holds the meter *code*, which is resolved to the internal meter
//! identity through the store.

use csv::StringRecord;
use pq_client::domain::{MeterId, ProfileId};
use serde::Serialize;

use crate::{
    engine::weights::{RecalculationReport, MAX_CUSTOMER_COUNT},
    store::WeightStore,
};

pub const METER_COLUMN: &str = "meter_id";
pub const CUSTOMER_COUNT_COLUMN: &str = "customer_count";

pub const MSG_METER_NOT_FOUND: &str = "meter not found";
pub const MSG_METER_REQUIRED: &str = "meter_id is required";
pub const MSG_INVALID_CUSTOMER_COUNT: &str = "customer_count must be a non-negative integer";
pub const MSG_CUSTOMER_COUNT_TOO_LARGE: &str = "customer_count exceeds the per-meter limit";

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ImportFormatError {
    #[error("import contains no header row")]
    MissingHeader,
    #[error("header is missing required column '{0}'")]
    MissingColumn(&'static str),
}

/// One data row, with the customer count already checked.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportRow {
    /// 1-based over data rows; header, comment and blank lines excluded.
    pub row_number: usize,
    pub meter_code: String,
    pub customer_count: Result<i64, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportRowError {
    pub row_number: usize,
    pub meter_code: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportReport {
    pub success_count: usize,
    pub failed_count: usize,
    pub errors: Vec<ImportRowError>,
    /// Present when at least one row was applied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recalculation: Option<RecalculationReport>,
}

impl ImportReport {
    fn fail(&mut self, row_number: usize, meter_code: &str, message: impl Into<String>) {
        self.failed_count += 1;
        self.errors.push(ImportRowError {
            row_number,
            meter_code: meter_code.to_string(),
            message: message.into(),
        });
    }

    pub fn total_rows(&self) -> usize {
        self.success_count + self.failed_count
    }
}

pub fn parse_customer_count(raw: &str) -> Result<i64, String> {
    match raw.trim().parse::<i64>() {
        Ok(n) if n > MAX_CUSTOMER_COUNT => Err(MSG_CUSTOMER_COUNT_TOO_LARGE.to_string()),
        Ok(n) if n >= 0 => Ok(n),
        _ => Err(MSG_INVALID_CUSTOMER_COUNT.to_string()),
    }
}

fn is_blank(record: &StringRecord) -> bool {
    record.iter().all(|f| f.trim().is_empty())
}

fn column_index(header: &StringRecord, name: &'static str) -> Result<usize, ImportFormatError> {
    header
        .iter()
        .position(|h| h.trim_start_matches('\u{feff}').trim().eq_ignore_ascii_case(name))
        .ok_or(ImportFormatError::MissingColumn(name))
}

/// Split import text into data rows.
///
/// Only a missing or incomplete header is fatal; every problem inside a data
/// row is carried on that row.
pub fn parse_import(text: &str) -> Result<Vec<ImportRow>, ImportFormatError> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .comment(Some(b'#'))
        .quoting(false)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let mut records = rdr.records();
    let header = loop {
        match records.next() {
            Some(Ok(record)) if is_blank(&record) => continue,
            Some(Ok(record)) => break record,
            Some(Err(_)) | None => return Err(ImportFormatError::MissingHeader),
        }
    };
    let meter_idx = column_index(&header, METER_COLUMN)?;
    let count_idx = column_index(&header, CUSTOMER_COUNT_COLUMN)?;

    let mut rows = Vec::new();
    for result in records {
        let row_number = rows.len() + 1;
        let record = match result {
            Ok(record) if is_blank(&record) => continue,
            Ok(record) => record,
            Err(e) => {
                rows.push(ImportRow {
                    row_number,
                    meter_code: String::new(),
                    customer_count: Err(format!("malformed row: {e}")),
                });
                continue;
            }
        };

        rows.push(ImportRow {
            row_number,
            meter_code: record.get(meter_idx).unwrap_or("").to_string(),
            customer_count: parse_customer_count(record.get(count_idx).unwrap_or("")),
        });
    }

    Ok(rows)
}

/// Applies parsed rows to one profile's weight table.
///
/// Rows are upserted in order, so a meter listed twice keeps the later
/// count. Recalculation is left to the caller.
pub struct ProfileImporter<'a> {
    store: &'a dyn WeightStore,
}

impl<'a> ProfileImporter<'a> {
    pub fn new(store: &'a dyn WeightStore) -> Self {
        Self { store }
    }

    async fn resolve(&self, code: &str) -> Result<MeterId, String> {
        if code.is_empty() {
            return Err(MSG_METER_REQUIRED.to_string());
        }
        match self.store.resolve_meter_code(code).await {
            Ok(Some(id)) => Ok(id),
            Ok(None) => Err(MSG_METER_NOT_FOUND.to_string()),
            Err(e) => Err(e.to_string()),
        }
    }

    pub async fn apply(&self, profile_id: ProfileId, rows: &[ImportRow]) -> ImportReport {
        let mut report = ImportReport::default();

        for row in rows {
            let customer_count = match &row.customer_count {
                Ok(n) => *n,
                Err(message) => {
                    report.fail(row.row_number, &row.meter_code, message.as_str());
                    continue;
                }
            };
            let meter_id = match self.resolve(&row.meter_code).await {
                Ok(id) => id,
                Err(message) => {
                    report.fail(row.row_number, &row.meter_code, message);
                    continue;
                }
            };

            match self
                .store
                .upsert_weight(profile_id, meter_id, customer_count, None)
                .await
            {
                Ok(_) => report.success_count += 1,
                Err(e) => {
                    tracing::warn!(error = %e, row = row.row_number, profile_id, "weight upsert failed");
                    report.fail(row.row_number, &row.meter_code, e.to_string());
                }
            }
        }

        metrics::counter!("sarfi_import_rows_total", "outcome" => "ok").increment(report.success_count as u64);
        metrics::counter!("sarfi_import_rows_total", "outcome" => "failed").increment(report.failed_count as u64);

        report
    }
}

/// Short content digest used to correlate repeated submissions in logs.
pub fn import_digest(text: &str) -> String {
    let hex = blake3::hash(text.as_bytes()).to_hex();
    hex.as_str()[..16].to_string()
}
