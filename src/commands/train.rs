use crate::artifact::{ScoringModel, TrainedArtifact, TrainingMetadata};
use crate::config::PipelineConfig;
use crate::ensemble::{self, CombinationStrategy};
use crate::evaluation::{self, EvaluationReport};
use crate::features::{self, CountryVocabulary};
use crate::models::{clean_transactions, Transaction, TransactionSnapshot};
use crate::windowing::{self, LabelWindow};
use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TrainSummary {
    artifact_id: String,
    strategy: &'static str,
    base_models: Vec<String>,
    cutoff: String,
    horizon_days: i64,
    customers: usize,
    skipped_customers: usize,
    training_rows: usize,
    holdout_rows: usize,
    positive_rate: f64,
    metrics: EvaluationReport,
}

pub fn run(data_file: &Path, output: &Path, config: &PipelineConfig) -> Result<()> {
    config.validate()?;
    info!(
        "Starting training run ({}, balance {})",
        config.strategy.as_str(),
        config.balance.as_str()
    );

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner} {msg}").expect("static template"));
    spinner.enable_steady_tick(Duration::from_millis(120));

    spinner.set_message("loading snapshot");
    let snapshot = TransactionSnapshot::load(data_file)?;
    let transactions = clean_transactions(&snapshot.rows)?;
    info!(
        "Loaded {} usable transactions from {}",
        transactions.len(),
        data_file.display()
    );

    spinner.set_message("building labels");
    let cutoff = windowing::choose_cutoff(&transactions, config.horizon_days)?;
    let window = LabelWindow::new(cutoff, config.horizon_days);
    let labels = windowing::build_labels(&transactions, window);
    let label_by_customer: HashMap<u32, u8> = labels
        .iter()
        .filter(|l| l.eligible)
        .map(|l| (l.customer_id, l.label))
        .collect();

    spinner.set_message("computing features");
    let feature_inputs: Vec<Transaction> = transactions
        .iter()
        .filter(|tx| tx.timestamp <= cutoff)
        .cloned()
        .collect();
    let vocabulary = CountryVocabulary::fit(&feature_inputs, cutoff);
    let report = features::compute(&feature_inputs, cutoff, &vocabulary)?;
    let table = report.table;

    let row_labels: Vec<u8> = table
        .rows
        .iter()
        .map(|row| label_by_customer.get(&row.customer_id).copied().unwrap_or(0))
        .collect();
    let positives = row_labels.iter().filter(|&&l| l == 1).count();
    if positives == 0 || positives == row_labels.len() {
        return Err(anyhow!(
            "training data carries a single label class ({} of {} positive); widen the horizon or the history",
            positives,
            row_labels.len()
        ));
    }

    spinner.set_message("fitting ensemble");
    let (train_indices, test_indices) =
        stratified_customer_split(&row_labels, config.test_fraction, config.seed);
    let matrix = table.to_matrix();
    let train_matrix = matrix.select(&train_indices);
    let train_labels: Vec<u8> = train_indices.iter().map(|&i| row_labels[i]).collect();
    let model = ensemble::fit(
        &config.learner_pool(),
        &train_matrix,
        &train_labels,
        config.ensemble(),
    )?;

    spinner.set_message("evaluating holdout");
    let test_matrix = matrix.select(&test_indices);
    let test_labels: Vec<u8> = test_indices.iter().map(|&i| row_labels[i]).collect();
    let predictions: Vec<f64> = test_matrix
        .iter_rows()
        .map(|row| model.predict_proba(row))
        .collect();
    let metrics = evaluation::evaluate(&predictions, &test_labels, &config.evaluation);
    if metrics.roc_auc.value().is_none() {
        warn!("Holdout fold carries a single label class; ranking metrics are undefined");
    }

    let scoring_model = match config.strategy {
        CombinationStrategy::Stacking => ScoringModel::Stacked(model),
        CombinationStrategy::Blending => ScoringModel::Blended(model),
    };
    let artifact = TrainedArtifact::new(
        table.feature_names.clone(),
        vocabulary,
        scoring_model,
        TrainingMetadata {
            trained_at: Utc::now(),
            training_rows: train_indices.len(),
            holdout_rows: test_indices.len(),
            seed: config.seed,
            balance: config.balance,
            metrics: Some(metrics.clone()),
        },
    );
    artifact.save(output)?;
    spinner.finish_and_clear();

    info!("Saved artifact {} to {}", artifact.id, output.display());
    println!("Saved trained artifact to {}", output.display());

    let summary = TrainSummary {
        artifact_id: artifact.id.to_string(),
        strategy: artifact.model.strategy_tag(),
        base_models: artifact.model.base_names(),
        cutoff: cutoff.to_rfc3339(),
        horizon_days: config.horizon_days,
        customers: table.rows.len(),
        skipped_customers: report.skipped.len(),
        training_rows: train_indices.len(),
        holdout_rows: test_indices.len(),
        positive_rate: positives as f64 / row_labels.len() as f64,
        metrics,
    };
    let payload = serde_json::to_string(&summary).context("Failed to serialize train summary")?;
    println!("PROPENSITY_TRAIN_SUMMARY={payload}");

    Ok(())
}

/// Splits row indices into (train, test) per class, so the holdout keeps both
/// classes whenever each class has at least two members.
fn stratified_customer_split(
    labels: &[u8],
    test_fraction: f64,
    seed: u64,
) -> (Vec<usize>, Vec<usize>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = Vec::new();
    let mut test = Vec::new();
    for class in [0u8, 1u8] {
        let mut class_indices: Vec<usize> = (0..labels.len())
            .filter(|&i| labels[i] == class)
            .collect();
        class_indices.shuffle(&mut rng);
        let take = ((class_indices.len() as f64) * test_fraction).round() as usize;
        let take = take.clamp(
            usize::from(class_indices.len() >= 2),
            class_indices.len().saturating_sub(1),
        );
        test.extend(class_indices.drain(..take));
        train.extend(class_indices);
    }
    train.sort_unstable();
    test.sort_unstable();
    (train, test)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_respects_the_fraction_and_classes() {
        let labels: Vec<u8> = (0..50).map(|i| u8::from(i % 5 == 0)).collect();
        let (train, test) = stratified_customer_split(&labels, 0.2, 3);
        assert_eq!(train.len() + test.len(), labels.len());
        assert!(test.iter().any(|&i| labels[i] == 1));
        assert!(test.iter().any(|&i| labels[i] == 0));
        assert!(train.len() > test.len());
    }

    #[test]
    fn split_is_deterministic() {
        let labels: Vec<u8> = (0..30).map(|i| u8::from(i % 3 == 0)).collect();
        assert_eq!(
            stratified_customer_split(&labels, 0.25, 9),
            stratified_customer_split(&labels, 0.25, 9)
        );
    }
}
