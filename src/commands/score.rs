use crate::artifact::TrainedArtifact;
use crate::features;
use crate::models::{clean_transactions, TransactionSnapshot};
use crate::scorer::{self, FeatureContribution, ScoreInput};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CustomerScore {
    customer_id: u32,
    probability: f64,
    top_contributing_features: Vec<FeatureContribution>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ScoreSummary {
    artifact_id: String,
    cutoff: String,
    scored: usize,
    skipped: usize,
    mean_probability: f64,
}

/// Scores every eligible customer in a snapshot against an artifact. The
/// cutoff defaults to the latest timestamp in the data, i.e. "score with
/// everything we know today".
pub fn run(
    data_file: &Path,
    model_file: &Path,
    output: Option<&Path>,
    cutoff_override: Option<DateTime<Utc>>,
    top_n: usize,
) -> Result<()> {
    let artifact = TrainedArtifact::load(model_file)?;
    let snapshot = TransactionSnapshot::load(data_file)?;
    let transactions = clean_transactions(&snapshot.rows)?;
    let cutoff = cutoff_override
        .or_else(|| transactions.iter().map(|tx| tx.timestamp).max())
        .context("snapshot has no transactions to infer a cutoff from")?;
    info!(
        "Scoring snapshot {} with artifact {} at cutoff {}",
        data_file.display(),
        artifact.id,
        cutoff
    );

    let report = features::compute(&transactions, cutoff, &artifact.vocabulary)?;
    let mut scores = Vec::with_capacity(report.table.rows.len());
    for row in &report.table.rows {
        let mapping: HashMap<String, f64> = report
            .table
            .feature_names
            .iter()
            .cloned()
            .zip(row.values.iter().copied())
            .collect();
        let scored = scorer::score(ScoreInput::Features(&mapping), &artifact, top_n)?;
        scores.push(CustomerScore {
            customer_id: row.customer_id,
            probability: scored.probability,
            top_contributing_features: scored.top_contributing_features,
        });
    }
    if !report.skipped.is_empty() {
        warn!(
            "{} customer(s) had no history at the cutoff and were not scored",
            report.skipped.len()
        );
    }

    let payload = serde_json::to_string_pretty(&scores).context("Failed to serialize scores")?;
    match output {
        Some(path) => {
            fs::write(path, &payload)
                .with_context(|| format!("Failed to write scores to {}", path.display()))?;
            println!("Wrote {} customer scores to {}", scores.len(), path.display());
        }
        None => println!("{payload}"),
    }

    let mean_probability = if scores.is_empty() {
        0.0
    } else {
        scores.iter().map(|s| s.probability).sum::<f64>() / scores.len() as f64
    };
    let summary = ScoreSummary {
        artifact_id: artifact.id.to_string(),
        cutoff: cutoff.to_rfc3339(),
        scored: scores.len(),
        skipped: report.skipped.len(),
        mean_probability,
    };
    let payload = serde_json::to_string(&summary).context("Failed to serialize score summary")?;
    println!("PROPENSITY_SCORE_SUMMARY={payload}");
    Ok(())
}
