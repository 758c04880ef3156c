use std::{collections::HashMap, io::Write};

use pq_client::domain::{Meter, MeterId, WeightEntry};
use serde::Serialize;

use crate::engine::weights;

pub const TOTAL_ROW_LABEL: &str = "TOTAL";

const HEADER: [&str; 4] = ["meter_code", "location", "customer_count", "weight_factor_percent"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportRow {
    pub meter_code: String,
    pub location: String,
    pub customer_count: i64,
    pub weight_factor_percent: String,
}

fn percent(factor: f64) -> String {
    format!("{:.4}%", factor * 100.0)
}

/// One row per weight entry ordered by meter code, then a totals row.
///
/// Entries whose meter is unknown to the store are listed under their
/// numeric meter id.
pub fn build_rows(entries: &[WeightEntry], meters: &[Meter]) -> Vec<ExportRow> {
    let by_id: HashMap<MeterId, &Meter> = meters.iter().map(|m| (m.id, m)).collect();

    let mut rows: Vec<ExportRow> = entries
        .iter()
        .map(|e| {
            let meter = by_id.get(&e.meter_id);
            ExportRow {
                meter_code: meter.map_or_else(|| e.meter_id.to_string(), |m| m.code.clone()),
                location: meter.and_then(|m| m.location.clone()).unwrap_or_default(),
                customer_count: e.customer_count,
                weight_factor_percent: percent(e.weight_factor),
            }
        })
        .collect();
    rows.sort_by(|a, b| a.meter_code.cmp(&b.meter_code));

    rows.push(ExportRow {
        meter_code: TOTAL_ROW_LABEL.to_string(),
        location: String::new(),
        customer_count: weights::total_customers(entries),
        weight_factor_percent: percent(entries.iter().map(|e| e.weight_factor).sum()),
    });

    rows
}

pub fn write_csv(rows: &[ExportRow], writer: impl Write) -> csv::Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(HEADER)?;
    for r in rows {
        let customer_count = r.customer_count.to_string();
        wtr.write_record([
            r.meter_code.as_str(),
            r.location.as_str(),
            customer_count.as_str(),
            r.weight_factor_percent.as_str(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}
