use crate::models::TransactionSnapshot;
use crate::synthetic::{self, SyntheticConfig};
use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use log::info;
use serde::Serialize;
use std::path::Path;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExportSampleSummary {
    rows: usize,
    customers: usize,
    history_days: i64,
    seed: u64,
}

/// Writes a seeded synthetic snapshot for demos and smoke tests.
pub fn run(output: &Path, customers: usize, history_days: i64, seed: u64) -> Result<()> {
    let start = Utc::now() - Duration::days(history_days);
    let rows = synthetic::generate(SyntheticConfig::new(customers, history_days, start), seed);
    let snapshot = TransactionSnapshot::new(rows, Utc::now());
    snapshot.save(output)?;
    info!(
        "Exported {} synthetic rows for {} customers to {}",
        snapshot.rows.len(),
        customers,
        output.display()
    );
    println!("Exported sample snapshot to {}", output.display());

    let summary = ExportSampleSummary {
        rows: snapshot.rows.len(),
        customers,
        history_days,
        seed,
    };
    let payload =
        serde_json::to_string(&summary).context("Failed to serialize export summary")?;
    println!("PROPENSITY_EXPORT_SAMPLE_SUMMARY={payload}");
    Ok(())
}
