use crate::error::TrainingError;
use crate::learner::tree::{RegressionTree, TreeConfig};
use crate::models::Matrix;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

pub const FOREST_NAME: &str = "random_forest";

/// Bagged ensemble of regression trees over 0/1 targets. Each tree sees a
/// bootstrap resample and a sqrt-sized feature subset per split; the forest
/// probability is the mean of the leaf values.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ForestConfig {
    pub n_trees: usize,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: 8,
            min_samples_leaf: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForestModel {
    trees: Vec<RegressionTree>,
    importances: Vec<f64>,
}

impl ForestModel {
    pub fn fit(
        matrix: &Matrix,
        labels: &[u8],
        weights: &[f64],
        config: ForestConfig,
        seed: u64,
    ) -> Result<Self, TrainingError> {
        if matrix.rows == 0 {
            return Err(TrainingError::EmptyTrainingSet);
        }

        let targets: Vec<f64> = labels.iter().map(|&l| l as f64).collect();
        let feature_subsample = ((matrix.cols as f64).sqrt().ceil() as usize).max(1);
        let tree_config = TreeConfig {
            max_depth: config.max_depth,
            min_samples_leaf: config.min_samples_leaf,
            min_gain: 1e-9,
            feature_subsample: Some(feature_subsample),
        };

        let fitted: Vec<(RegressionTree, Vec<f64>)> = (0..config.n_trees)
            .into_par_iter()
            .map(|tree_idx| {
                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(tree_idx as u64));
                let bootstrap: Vec<usize> = (0..matrix.rows)
                    .map(|_| rng.gen_range(0..matrix.rows))
                    .collect();
                let sample = matrix.select(&bootstrap);
                let sample_targets: Vec<f64> = bootstrap.iter().map(|&i| targets[i]).collect();
                let sample_weights: Vec<f64> = bootstrap.iter().map(|&i| weights[i]).collect();
                RegressionTree::fit(&sample, &sample_targets, &sample_weights, tree_config, &mut rng)
            })
            .collect();

        let mut importances = vec![0.0; matrix.cols];
        let mut trees = Vec::with_capacity(fitted.len());
        for (tree, gains) in fitted {
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

        let model = Self { trees, importances };
        for row in matrix.iter_rows().take(1) {
            if !model.predict_proba(row).is_finite() {
                return Err(TrainingError::Divergence {
                    learner: FOREST_NAME,
                    reason: "non-finite forest output".to_string(),
                });
            }
        }
        Ok(model)
    }

    pub fn predict_proba(&self, row: &[f64]) -> f64 {
        if self.trees.is_empty() {
            return 0.5;
        }
        let sum: f64 = self.trees.iter().map(|t| t.predict(row)).sum();
        (sum / self.trees.len() as f64).clamp(0.0, 1.0)
    }

    pub fn feature_importances(&self) -> &[f64] {
        &self.importances
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal_data() -> (Matrix, Vec<u8>) {
        // Column 0 carries the signal, column 1 is noise-free constant.
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for i in 0..40 {
            rows.push(vec![i as f64, 7.0]);
            labels.push(if i >= 20 { 1 } else { 0 });
        }
        (Matrix::from_rows(rows), labels)
    }

    #[test]
    fn forest_separates_a_threshold_signal() {
        let (matrix, labels) = signal_data();
        let weights = vec![1.0; labels.len()];
        let model =
            ForestModel::fit(&matrix, &labels, &weights, ForestConfig::default(), 42).unwrap();
        assert!(model.predict_proba(&[35.0, 7.0]) > 0.8);
        assert!(model.predict_proba(&[3.0, 7.0]) < 0.2);
    }

    #[test]
    fn importances_are_normalized_and_signal_heavy() {
        let (matrix, labels) = signal_data();
        let weights = vec![1.0; labels.len()];
        let model =
            ForestModel::fit(&matrix, &labels, &weights, ForestConfig::default(), 42).unwrap();
        let importances = model.feature_importances();
        assert!((importances.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(importances[0] > importances[1]);
    }

    #[test]
    fn same_seed_gives_identical_forests() {
        let (matrix, labels) = signal_data();
        let weights = vec![1.0; labels.len()];
        let a = ForestModel::fit(&matrix, &labels, &weights, ForestConfig::default(), 9).unwrap();
        let b = ForestModel::fit(&matrix, &labels, &weights, ForestConfig::default(), 9).unwrap();
        for i in 0..matrix.rows {
            let row = matrix.row(i);
            assert!((a.predict_proba(row) - b.predict_proba(row)).abs() < 1e-12);
        }
    }
}
