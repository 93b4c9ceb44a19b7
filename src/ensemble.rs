use crate::balance::{self, ClassBalance};
use crate::error::TrainingError;
use crate::learner::{BaseModel, LearnerSpec, LogisticConfig, LogisticModel};
use crate::models::Matrix;
use log::{info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CombinationStrategy {
    /// K-fold cross-validated base models; out-of-fold predictions train the
    /// meta-learner, bases are refit on the full data for inference.
    Stacking,
    /// One holdout split; bases fit on the base fold only and their holdout
    /// predictions train the meta-learner. Cheaper than stacking and higher
    /// variance, since the meta-learner sees a single split.
    Blending,
}

impl CombinationStrategy {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "stacking" => Some(Self::Stacking),
            "blending" => Some(Self::Blending),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stacking => "stacking",
            Self::Blending => "blending",
        }
    }
}

/// What to do when a base learner diverges mid-training.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DivergencePolicy {
    /// Drop the learner and continue while at least one base survives.
    DropLearner,
    /// Fail the whole training run on the first divergence.
    Abort,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EnsembleConfig {
    pub strategy: CombinationStrategy,
    pub folds: usize,
    pub holdout_fraction: f64,
    pub balance: ClassBalance,
    pub on_divergence: DivergencePolicy,
    pub seed: u64,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            strategy: CombinationStrategy::Stacking,
            folds: 5,
            holdout_fraction: 0.25,
            balance: ClassBalance::InverseFrequency,
            on_divergence: DivergencePolicy::DropLearner,
            seed: 42,
        }
    }
}

/// A fitted combiner: surviving base models plus the logistic meta-learner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleModel {
    pub strategy: CombinationStrategy,
    base_names: Vec<String>,
    base_models: Vec<BaseModel>,
    meta: LogisticModel,
    importances: Vec<f64>,
}

impl EnsembleModel {
    pub fn predict_proba(&self, row: &[f64]) -> f64 {
        let meta_row: Vec<f64> = self
            .base_models
            .iter()
            .map(|model| model.predict_proba(row))
            .collect();
        self.meta.predict_proba(&meta_row)
    }

    pub fn base_names(&self) -> &[String] {
        &self.base_names
    }

    pub fn base_models(&self) -> &[BaseModel] {
        &self.base_models
    }

    /// Meta-coefficient-weighted blend of the base importances.
    pub fn feature_importances(&self) -> &[f64] {
        &self.importances
    }

    pub fn contributions(&self, row: &[f64]) -> Vec<f64> {
        let weights = meta_weights(&self.meta, self.base_models.len());
        let cols = self.importances.len();
        let mut combined = vec![0.0; cols];
        for (model, weight) in self.base_models.iter().zip(&weights) {
            for (total, value) in combined.iter_mut().zip(model.contributions(row)) {
                *total += weight * value;
            }
        }
        combined
    }
}

/// Deterministic k-fold assignment: a seeded shuffle chunked into folds whose
/// sizes differ by at most one. Every row lands in exactly one fold.
pub fn fold_plan(rows: usize, folds: usize, seed: u64) -> Vec<Vec<usize>> {
    let mut indices: Vec<usize> = (0..rows).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let base_size = rows / folds;
    let remainder = rows % folds;
    let mut plan = Vec::with_capacity(folds);
    let mut offset = 0;
    for fold in 0..folds {
        let size = base_size + usize::from(fold < remainder);
        plan.push(indices[offset..offset + size].to_vec());
        offset += size;
    }
    plan
}

/// Fits an ensemble with the configured strategy over the given base pool.
pub fn fit(
    specs: &[LearnerSpec],
    matrix: &Matrix,
    labels: &[u8],
    config: EnsembleConfig,
) -> Result<EnsembleModel, TrainingError> {
    match config.strategy {
        CombinationStrategy::Stacking => fit_stacking(specs, matrix, labels, config),
        CombinationStrategy::Blending => fit_blending(specs, matrix, labels, config),
    }
}

fn fit_stacking(
    specs: &[LearnerSpec],
    matrix: &Matrix,
    labels: &[u8],
    config: EnsembleConfig,
) -> Result<EnsembleModel, TrainingError> {
    let rows = matrix.rows;
    if rows < 2 * config.folds {
        return Err(TrainingError::TooFewRowsForFolds {
            rows,
            folds: config.folds,
            required: 2 * config.folds,
        });
    }

    let plan = fold_plan(rows, config.folds, config.seed);
    let mut alive = vec![true; specs.len()];
    let mut oof = vec![vec![f64::NAN; rows]; specs.len()];

    for (fold_idx, fold) in plan.iter().enumerate() {
        let train_indices: Vec<usize> = plan
            .iter()
            .enumerate()
            .filter(|(other, _)| *other != fold_idx)
            .flat_map(|(_, indices)| indices.iter().copied())
            .collect();
        let train_matrix = matrix.select(&train_indices);
        let train_labels: Vec<u8> = train_indices.iter().map(|&i| labels[i]).collect();
        // Imbalance correction touches the training side of the fold only;
        // the held-out fold stays untouched.
        let fold_seed = config.seed.wrapping_add(fold_idx as u64);
        let (balanced_matrix, balanced_labels, weights) =
            balance::apply_to_training_fold(&train_matrix, &train_labels, config.balance, fold_seed);

        for (spec_idx, spec) in specs.iter().enumerate() {
            if !alive[spec_idx] {
                continue;
            }
            match spec.fit(&balanced_matrix, &balanced_labels, &weights, fold_seed) {
                Ok(model) => {
                    for &row_idx in fold {
                        oof[spec_idx][row_idx] = model.predict_proba(matrix.row(row_idx));
                    }
                }
                Err(TrainingError::Divergence { learner, reason }) => {
                    handle_divergence(config.on_divergence, learner, &reason, &mut alive[spec_idx])?;
                }
                Err(other) => return Err(other),
            }
        }
    }

    // Bases used at inference see the full training data.
    let full_seed = config.seed.wrapping_add(config.folds as u64);
    let (full_matrix, full_labels, full_weights) =
        balance::apply_to_training_fold(matrix, labels, config.balance, full_seed);
    let mut base_models = Vec::new();
    let mut base_names = Vec::new();
    let mut columns = Vec::new();
    for (spec_idx, spec) in specs.iter().enumerate() {
        if !alive[spec_idx] {
            continue;
        }
        match spec.fit(&full_matrix, &full_labels, &full_weights, full_seed) {
            Ok(model) => {
                base_names.push(spec.name().to_string());
                base_models.push(model);
                columns.push(spec_idx);
            }
            Err(TrainingError::Divergence { learner, reason }) => {
                let mut keep = true;
                handle_divergence(config.on_divergence, learner, &reason, &mut keep)?;
            }
            Err(other) => return Err(other),
        }
    }
    if base_models.is_empty() {
        return Err(TrainingError::NoSurvivingLearners);
    }

    let meta_matrix = meta_matrix_from_columns(&oof, &columns, rows);
    let meta_sample_weights = balance::sample_weights(labels, config.balance);
    let meta = LogisticModel::fit(
        &meta_matrix,
        labels,
        &meta_sample_weights,
        LogisticConfig::default(),
    )?;

    info!(
        "Stacked {} base model(s) over {} folds ({} rows)",
        base_models.len(),
        config.folds,
        rows
    );
    Ok(finish(CombinationStrategy::Stacking, base_names, base_models, meta))
}

fn fit_blending(
    specs: &[LearnerSpec],
    matrix: &Matrix,
    labels: &[u8],
    config: EnsembleConfig,
) -> Result<EnsembleModel, TrainingError> {
    let (base_indices, holdout_indices) =
        stratified_split(labels, config.holdout_fraction, config.seed);
    if base_indices.is_empty() || holdout_indices.is_empty() {
        return Err(TrainingError::EmptyTrainingSet);
    }

    let base_matrix = matrix.select(&base_indices);
    let base_labels: Vec<u8> = base_indices.iter().map(|&i| labels[i]).collect();
    let (balanced_matrix, balanced_labels, weights) =
        balance::apply_to_training_fold(&base_matrix, &base_labels, config.balance, config.seed);

    let mut base_models = Vec::new();
    let mut base_names = Vec::new();
    for spec in specs {
        match spec.fit(&balanced_matrix, &balanced_labels, &weights, config.seed) {
            Ok(model) => {
                base_names.push(spec.name().to_string());
                base_models.push(model);
            }
            Err(TrainingError::Divergence { learner, reason }) => {
                let mut keep = true;
                handle_divergence(config.on_divergence, learner, &reason, &mut keep)?;
            }
            Err(other) => return Err(other),
        }
    }
    if base_models.is_empty() {
        return Err(TrainingError::NoSurvivingLearners);
    }

    let holdout_labels: Vec<u8> = holdout_indices.iter().map(|&i| labels[i]).collect();
    let mut meta_matrix = Matrix::with_cols(base_models.len());
    for &row_idx in &holdout_indices {
        let meta_row: Vec<f64> = base_models
            .iter()
            .map(|model| model.predict_proba(matrix.row(row_idx)))
            .collect();
        meta_matrix.push_row(&meta_row);
    }
    let meta_sample_weights = balance::sample_weights(&holdout_labels, config.balance);
    let meta = LogisticModel::fit(
        &meta_matrix,
        &holdout_labels,
        &meta_sample_weights,
        LogisticConfig::default(),
    )?;

    info!(
        "Blended {} base model(s) with a {}/{} base/holdout split",
        base_models.len(),
        base_indices.len(),
        holdout_indices.len()
    );
    Ok(finish(CombinationStrategy::Blending, base_names, base_models, meta))
}

fn finish(
    strategy: CombinationStrategy,
    base_names: Vec<String>,
    base_models: Vec<BaseModel>,
    meta: LogisticModel,
) -> EnsembleModel {
    let weights = meta_weights(&meta, base_models.len());
    let cols = base_models
        .first()
        .map(|m| m.feature_importances().len())
        .unwrap_or(0);
    let mut importances = vec![0.0; cols];
    for (model, weight) in base_models.iter().zip(&weights) {
        for (total, &value) in importances.iter_mut().zip(model.feature_importances()) {
            *total += weight * value;
        }
    }
    EnsembleModel {
        strategy,
        base_names,
        base_models,
        meta,
        importances,
    }
}

fn handle_divergence(
    policy: DivergencePolicy,
    learner: &'static str,
    reason: &str,
    alive: &mut bool,
) -> Result<(), TrainingError> {
    match policy {
        DivergencePolicy::Abort => Err(TrainingError::Divergence {
            learner,
            reason: reason.to_string(),
        }),
        DivergencePolicy::DropLearner => {
            warn!("Dropping base learner {learner} after divergence: {reason}");
            *alive = false;
            Ok(())
        }
    }
}

fn meta_matrix_from_columns(oof: &[Vec<f64>], columns: &[usize], rows: usize) -> Matrix {
    let mut meta = Matrix::with_cols(columns.len());
    for row_idx in 0..rows {
        let meta_row: Vec<f64> = columns.iter().map(|&c| oof[c][row_idx]).collect();
        meta.push_row(&meta_row);
    }
    meta
}

/// Normalized absolute meta-learner coefficients, one per base model.
fn meta_weights(meta: &LogisticModel, bases: usize) -> Vec<f64> {
    let coefs = meta.coefficients();
    let total: f64 = coefs.iter().map(|c| c.abs()).sum();
    if total > 0.0 {
        coefs.iter().map(|c| c.abs() / total).collect()
    } else {
        vec![1.0 / bases.max(1) as f64; bases]
    }
}

/// Splits row indices into (rest, holdout), sampling each class separately so
/// both sides keep both classes whenever possible.
fn stratified_split(labels: &[u8], holdout_fraction: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut rest = Vec::new();
    let mut holdout = Vec::new();
    for class in [0u8, 1u8] {
        let mut class_indices: Vec<usize> = (0..labels.len())
            .filter(|&i| labels[i] == class)
            .collect();
        class_indices.shuffle(&mut rng);
        let take = ((class_indices.len() as f64) * holdout_fraction).round() as usize;
        let take = take.clamp(
            usize::from(class_indices.len() >= 2),
            class_indices.len().saturating_sub(1),
        );
        holdout.extend(class_indices.drain(..take));
        rest.extend(class_indices);
    }
    rest.sort_unstable();
    holdout.sort_unstable();
    (rest, holdout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    /// Rows whose first column monotonically drives the label, with noise.
    fn signal_dataset(rows: usize, seed: u64) -> (Matrix, Vec<u8>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut data = Vec::with_capacity(rows);
        let mut labels = Vec::with_capacity(rows);
        for _ in 0..rows {
            let signal: f64 = rng.gen_range(0.0..1.0);
            let noise: f64 = rng.gen_range(0.0..1.0);
            let label = u8::from(signal + 0.3 * (noise - 0.5) > 0.5);
            data.push(vec![signal, noise]);
            labels.push(label);
        }
        (Matrix::from_rows(data), labels)
    }

    #[test]
    fn fold_plan_partitions_every_row_exactly_once() {
        let plan = fold_plan(23, 5, 7);
        assert_eq!(plan.len(), 5);
        let mut seen = vec![false; 23];
        for fold in &plan {
            for &idx in fold {
                assert!(!seen[idx], "row {idx} appears twice");
                seen[idx] = true;
            }
        }
        assert!(seen.iter().all(|&s| s));
        let sizes: Vec<usize> = plan.iter().map(|f| f.len()).collect();
        assert!(sizes.iter().all(|&s| s == 4 || s == 5));
    }

    #[test]
    fn fold_plan_is_stable_for_a_seed() {
        assert_eq!(fold_plan(50, 5, 9), fold_plan(50, 5, 9));
        assert_ne!(fold_plan(50, 5, 9), fold_plan(50, 5, 10));
    }

    #[test]
    fn stacking_probabilities_are_in_range() {
        let (matrix, labels) = signal_dataset(120, 3);
        let model = fit(
            &LearnerSpec::default_pool(),
            &matrix,
            &labels,
            EnsembleConfig::default(),
        )
        .unwrap();
        assert_eq!(model.strategy, CombinationStrategy::Stacking);
        for row in matrix.iter_rows() {
            let p = model.predict_proba(row);
            assert!((0.0..=1.0).contains(&p));
        }
    }

    #[test]
    fn blending_probabilities_are_in_range() {
        let (matrix, labels) = signal_dataset(120, 3);
        let config = EnsembleConfig {
            strategy: CombinationStrategy::Blending,
            ..EnsembleConfig::default()
        };
        let model = fit(&LearnerSpec::default_pool(), &matrix, &labels, config).unwrap();
        assert_eq!(model.strategy, CombinationStrategy::Blending);
        for row in matrix.iter_rows() {
            let p = model.predict_proba(row);
            assert!((0.0..=1.0).contains(&p));
        }
    }

    #[test]
    fn stacking_rejects_tiny_datasets() {
        let (matrix, labels) = signal_dataset(6, 3);
        let err = fit(
            &LearnerSpec::default_pool(),
            &matrix,
            &labels,
            EnsembleConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, TrainingError::TooFewRowsForFolds { .. }));
    }

    #[test]
    fn stratified_split_keeps_both_classes_on_both_sides() {
        let labels: Vec<u8> = (0..40).map(|i| u8::from(i % 4 == 0)).collect();
        let (rest, holdout) = stratified_split(&labels, 0.25, 11);
        assert_eq!(rest.len() + holdout.len(), labels.len());
        for side in [&rest, &holdout] {
            assert!(side.iter().any(|&i| labels[i] == 1));
            assert!(side.iter().any(|&i| labels[i] == 0));
        }
    }

    #[test]
    fn ensemble_importances_cover_every_feature() {
        let (matrix, labels) = signal_dataset(100, 5);
        let model = fit(
            &LearnerSpec::default_pool(),
            &matrix,
            &labels,
            EnsembleConfig::default(),
        )
        .unwrap();
        assert_eq!(model.feature_importances().len(), matrix.cols);
        assert_eq!(model.contributions(matrix.row(0)).len(), matrix.cols);
    }
}
