use crate::error::TrainingError;
use crate::learner::tree::{RegressionTree, TreeConfig};
use crate::models::Matrix;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

pub const BOOSTED_NAME: &str = "gradient_boosting";

const HESSIAN_FLOOR: f64 = 1e-6;

/// Gradient-boosted trees with logistic loss. Each round fits a regression
/// tree to the Newton direction (target -g/h, weight h) and adds it with
/// shrinkage on top of the prior log-odds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BoostConfig {
    pub n_rounds: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
}

impl Default for BoostConfig {
    fn default() -> Self {
        Self {
            n_rounds: 120,
            learning_rate: 0.1,
            max_depth: 3,
            min_samples_leaf: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoostedModel {
    prior: f64,
    learning_rate: f64,
    trees: Vec<RegressionTree>,
    importances: Vec<f64>,
}

impl BoostedModel {
    pub fn fit(
        matrix: &Matrix,
        labels: &[u8],
        weights: &[f64],
        config: BoostConfig,
        seed: u64,
    ) -> Result<Self, TrainingError> {
        if matrix.rows == 0 {
            return Err(TrainingError::EmptyTrainingSet);
        }

        let weight_total: f64 = weights.iter().sum();
        let positive_mass: f64 = weights
            .iter()
            .zip(labels)
            .filter(|(_, &l)| l == 1)
            .map(|(w, _)| w)
            .sum();
        let base_rate = (positive_mass / weight_total).clamp(1e-6, 1.0 - 1e-6);
        let prior = (base_rate / (1.0 - base_rate)).ln();

        let tree_config = TreeConfig {
            max_depth: config.max_depth,
            min_samples_leaf: config.min_samples_leaf,
            min_gain: 1e-9,
            feature_subsample: None,
        };

        let mut rng = StdRng::seed_from_u64(seed);
        let mut scores = vec![prior; matrix.rows];
        let mut trees = Vec::with_capacity(config.n_rounds);
        let mut importances = vec![0.0; matrix.cols];

        for round in 0..config.n_rounds {
            let mut targets = Vec::with_capacity(matrix.rows);
            let mut hessians = Vec::with_capacity(matrix.rows);
            for ((&score, &label), &weight) in scores.iter().zip(labels).zip(weights) {
                let p = sigmoid(score);
                let grad = weight * (p - label as f64);
                let hess = (weight * p * (1.0 - p)).max(HESSIAN_FLOOR);
                targets.push(-grad / hess);
                hessians.push(hess);
            }

            let (tree, gains) =
                RegressionTree::fit(matrix, &targets, &hessians, tree_config, &mut rng);
            for (idx, row) in matrix.iter_rows().enumerate() {
                scores[idx] += config.learning_rate * tree.predict(row);
            }
            if scores.iter().any(|s| !s.is_finite()) {
                return Err(TrainingError::Divergence {
                    learner: BOOSTED_NAME,
                    reason: format!("non-finite margin at round {round}"),
                });
            }
            for (total, gain) in importances.iter_mut().zip(&gains) {
                *total += gain;
            }
            trees.push(tree);
        }

        let gain_total: f64 = importances.iter().sum();
        if gain_total > 0.0 {
            for value in importances.iter_mut() {
                *value /= gain_total;
            }
        }

        Ok(Self {
            prior,
            learning_rate: config.learning_rate,
            trees,
            importances,
        })
    }

    pub fn predict_proba(&self, row: &[f64]) -> f64 {
        let mut margin = self.prior;
        for tree in &self.trees {
            margin += self.learning_rate * tree.predict(row);
        }
        sigmoid(margin)
    }

    pub fn feature_importances(&self) -> &[f64] {
        &self.importances
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn xor_free_signal() -> (Matrix, Vec<u8>) {
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for i in 0..30 {
            rows.push(vec![i as f64, (i % 3) as f64]);
            labels.push(if i >= 15 { 1 } else { 0 });
        }
        (Matrix::from_rows(rows), labels)
    }

    #[test]
    fn boosting_fits_a_threshold_signal() {
        let (matrix, labels) = xor_free_signal();
        let weights = vec![1.0; labels.len()];
        let model =
            BoostedModel::fit(&matrix, &labels, &weights, BoostConfig::default(), 11).unwrap();
        assert!(model.predict_proba(&[28.0, 1.0]) > 0.85);
        assert!(model.predict_proba(&[1.0, 1.0]) < 0.15);
    }

    #[test]
    fn prior_matches_the_weighted_base_rate() {
        let matrix = Matrix::from_rows(vec![vec![0.0], vec![1.0], vec![2.0], vec![3.0]]);
        let labels = vec![1, 0, 0, 0];
        let weights = vec![1.0; 4];
        let model = BoostedModel::fit(
            &matrix,
            &labels,
            &weights,
            BoostConfig {
                n_rounds: 0,
                ..BoostConfig::default()
            },
            5,
        )
        .unwrap();
        // With no trees the probability is the base rate everywhere.
        assert!((model.predict_proba(&[0.0]) - 0.25).abs() < 1e-9);
    }

    #[test]
    fn importances_concentrate_on_the_informative_column() {
        let (matrix, labels) = xor_free_signal();
        let weights = vec![1.0; labels.len()];
        let model =
            BoostedModel::fit(&matrix, &labels, &weights, BoostConfig::default(), 11).unwrap();
        let importances = model.feature_importances();
        assert!(importances[0] > importances[1]);
        assert!((importances.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }
}
