use crate::artifact::TrainedArtifact;
use crate::evaluation::{self, EvaluationConfig, EvaluationReport};
use crate::features;
use crate::models::{clean_transactions, TransactionSnapshot};
use crate::windowing::{self, LabelWindow};
use anyhow::{anyhow, Context, Result};
use log::info;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EvaluateSummary {
    artifact_id: String,
    cutoff: String,
    horizon_days: i64,
    customers: usize,
    skipped_customers: usize,
    metrics: EvaluationReport,
}

/// Scores a labeled snapshot with an existing artifact and reports the full
/// metric set. The artifact's frozen vocabulary is reused, so countries the
/// training run never saw land in the unknown bucket instead of failing.
pub fn run(
    data_file: &Path,
    model_file: &Path,
    horizon_days: i64,
    config: &EvaluationConfig,
) -> Result<()> {
    let artifact = TrainedArtifact::load(model_file)?;
    info!(
        "Evaluating artifact {} ({} strategy)",
        artifact.id,
        artifact.model.strategy_tag()
    );

    let snapshot = TransactionSnapshot::load(data_file)?;
    let transactions = clean_transactions(&snapshot.rows)?;
    let cutoff = windowing::choose_cutoff(&transactions, horizon_days)?;
    let window = LabelWindow::new(cutoff, horizon_days);
    let labels = windowing::build_labels(&transactions, window);
    let label_by_customer: HashMap<u32, u8> = labels
        .iter()
        .filter(|l| l.eligible)
        .map(|l| (l.customer_id, l.label))
        .collect();

    let report = features::compute(&transactions, cutoff, &artifact.vocabulary)?;
    if report.table.feature_names != artifact.feature_names {
        return Err(anyhow!(
            "snapshot features do not line up with artifact {}; was it trained with another vocabulary?",
            artifact.id
        ));
    }

    let mut predictions = Vec::with_capacity(report.table.rows.len());
    let mut observed = Vec::with_capacity(report.table.rows.len());
    for row in &report.table.rows {
        predictions.push(artifact.model.predict_proba(&row.values));
        observed.push(
            label_by_customer
                .get(&row.customer_id)
                .copied()
                .unwrap_or(0),
        );
    }

    let metrics = evaluation::evaluate(&predictions, &observed, config);
    print_human_readable(&metrics);

    let summary = EvaluateSummary {
        artifact_id: artifact.id.to_string(),
        cutoff: cutoff.to_rfc3339(),
        horizon_days,
        customers: report.table.rows.len(),
        skipped_customers: report.skipped.len(),
        metrics,
    };
    let payload =
        serde_json::to_string(&summary).context("Failed to serialize evaluate summary")?;
    println!("PROPENSITY_EVALUATE_SUMMARY={payload}");
    Ok(())
}

fn print_human_readable(metrics: &EvaluationReport) {
    match metrics.roc_auc.value() {
        Some(value) => println!("ROC-AUC: {value:.4}"),
        None => println!("ROC-AUC: undefined (single label class)"),
    }
    match metrics.pr_auc.value() {
        Some(value) => println!("PR-AUC: {value:.4}"),
        None => println!("PR-AUC: undefined (single label class)"),
    }
    println!(
        "Accuracy: {:.4}  Precision: {:.4}  Recall: {:.4}  F1: {:.4} (threshold {:.2})",
        metrics.accuracy, metrics.precision, metrics.recall, metrics.f1, metrics.threshold
    );
    for rank in &metrics.rank_metrics {
        match rank.recall_at_k.value() {
            Some(recall) => println!(
                "Precision@{}: {:.4}  Recall@{}: {:.4}",
                rank.k, rank.precision_at_k, rank.k, recall
            ),
            None => println!("Precision@{}: {:.4}  Recall@{}: n/a", rank.k, rank.precision_at_k, rank.k),
        }
    }
    println!(
        "Expected net profit over {} targeted: {:.2}",
        metrics.total, metrics.expected_net_profit
    );
}
