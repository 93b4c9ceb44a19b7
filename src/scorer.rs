use crate::artifact::TrainedArtifact;
use crate::error::ScoreError;
use crate::features;
use crate::models::Transaction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Scoring input: either a precomputed feature mapping, or one customer's raw
/// transactions routed through the feature engine with the artifact's frozen
/// vocabulary.
pub enum ScoreInput<'a> {
    Features(&'a HashMap<String, f64>),
    Transactions {
        customer_id: u32,
        transactions: &'a [Transaction],
        cutoff: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureContribution {
    pub feature: String,
    pub contribution: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreReport {
    pub probability: f64,
    pub top_contributing_features: Vec<FeatureContribution>,
}

/// Scores one input against a trained artifact.
///
/// The input feature set must match the artifact's bound feature list
/// exactly; a mismatch is the consistency failure this boundary exists to
/// catch and fails just this call.
pub fn score(
    input: ScoreInput<'_>,
    artifact: &TrainedArtifact,
    top_n: usize,
) -> Result<ScoreReport, ScoreError> {
    let values = match input {
        ScoreInput::Features(mapping) => feature_row(mapping, artifact)?,
        ScoreInput::Transactions {
            customer_id,
            transactions,
            cutoff,
        } => {
            let refs: Vec<&Transaction> = transactions
                .iter()
                .filter(|tx| tx.customer_id == customer_id)
                .collect();
            features::compute_customer(customer_id, &refs, cutoff, &artifact.vocabulary)?
        }
    };

    let probability = artifact.model.predict_proba(&values);
    let contributions = artifact.model.contributions(&values);
    let top_contributing_features = rank_contributions(
        &artifact.feature_names,
        &contributions,
        top_n,
    );

    Ok(ScoreReport {
        probability,
        top_contributing_features,
    })
}

/// Validates a feature mapping against the artifact and lays the values out
/// in the artifact's bound order.
fn feature_row(
    mapping: &HashMap<String, f64>,
    artifact: &TrainedArtifact,
) -> Result<Vec<f64>, ScoreError> {
    let mut missing: Vec<String> = artifact
        .feature_names
        .iter()
        .filter(|name| !mapping.contains_key(*name))
        .cloned()
        .collect();
    let mut unexpected: Vec<String> = mapping
        .keys()
        .filter(|key| !artifact.feature_names.iter().any(|name| name == *key))
        .cloned()
        .collect();
    if !missing.is_empty() || !unexpected.is_empty() {
        missing.sort();
        unexpected.sort();
        return Err(ScoreError::FeatureMismatch {
            missing,
            unexpected,
        });
    }

    let mut values = Vec::with_capacity(artifact.feature_names.len());
    for name in &artifact.feature_names {
        let value = mapping[name];
        if !value.is_finite() {
            return Err(ScoreError::NonFiniteInput {
                feature: name.clone(),
            });
        }
        values.push(value);
    }
    Ok(values)
}

/// Deterministic contribution ranking: absolute contribution descending, then
/// feature name ascending.
fn rank_contributions(
    names: &[String],
    contributions: &[f64],
    top_n: usize,
) -> Vec<FeatureContribution> {
    let mut ranked: Vec<FeatureContribution> = names
        .iter()
        .zip(contributions)
        .map(|(name, &contribution)| FeatureContribution {
            feature: name.clone(),
            contribution,
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.contribution
            .abs()
            .partial_cmp(&a.contribution.abs())
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.feature.cmp(&b.feature))
    });
    ranked.truncate(top_n);
    ranked
}
