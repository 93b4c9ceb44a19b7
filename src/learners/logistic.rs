use crate::error::TrainingError;
use crate::models::Matrix;
use serde::{Deserialize, Serialize};

pub const LOGISTIC_NAME: &str = "logistic";

/// L2-regularized logistic regression trained by full-batch gradient descent.
/// Features are standardized internally; the scaler travels with the model so
/// training and inference always see the same transform.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LogisticConfig {
    pub epochs: usize,
    pub learning_rate: f64,
    pub l2: f64,
}

impl Default for LogisticConfig {
    fn default() -> Self {
        Self {
            epochs: 400,
            learning_rate: 0.5,
            l2: 1e-3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticModel {
    means: Vec<f64>,
    stds: Vec<f64>,
    coefficients: Vec<f64>,
    bias: f64,
    importances: Vec<f64>,
}

impl LogisticModel {
    pub fn fit(
        matrix: &Matrix,
        labels: &[u8],
        weights: &[f64],
        config: LogisticConfig,
    ) -> Result<Self, TrainingError> {
        if matrix.rows == 0 {
            return Err(TrainingError::EmptyTrainingSet);
        }

        let (means, stds) = column_scaler(matrix);
        let standardized: Vec<Vec<f64>> = matrix
            .iter_rows()
            .map(|row| standardize(row, &means, &stds))
            .collect();

        let cols = matrix.cols;
        let weight_total: f64 = weights.iter().sum();
        let mut coefficients = vec![0.0; cols];
        let mut bias = 0.0;

        for epoch in 0..config.epochs {
            let mut grad = vec![0.0; cols];
            let mut grad_bias = 0.0;
            for (row, (&label, &weight)) in standardized.iter().zip(labels.iter().zip(weights)) {
                let p = sigmoid(bias + dot(&coefficients, row));
                let residual = weight * (p - label as f64);
                grad_bias += residual;
                for (g, &x) in grad.iter_mut().zip(row.iter()) {
                    *g += residual * x;
                }
            }
            let step = config.learning_rate / (1.0 + 0.01 * epoch as f64);
            for (coef, g) in coefficients.iter_mut().zip(&grad) {
                *coef -= step * (g / weight_total + config.l2 * *coef);
            }
            bias -= step * grad_bias / weight_total;

            if !bias.is_finite() || coefficients.iter().any(|c| !c.is_finite()) {
                return Err(TrainingError::Divergence {
                    learner: LOGISTIC_NAME,
                    reason: format!("non-finite coefficients at epoch {epoch}"),
                });
            }
        }

        let importances = coefficients.iter().map(|c| c.abs()).collect();
        Ok(Self {
            means,
            stds,
            coefficients,
            bias,
            importances,
        })
    }

    pub fn predict_proba(&self, row: &[f64]) -> f64 {
        let standardized = standardize(row, &self.means, &self.stds);
        sigmoid(self.bias + dot(&self.coefficients, &standardized))
    }

    pub fn feature_importances(&self) -> &[f64] {
        &self.importances
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    /// Signed per-feature contributions for one row: coefficient times the
    /// standardized value.
    pub fn contributions(&self, row: &[f64]) -> Vec<f64> {
        standardize(row, &self.means, &self.stds)
            .iter()
            .zip(&self.coefficients)
            .map(|(x, c)| c * x)
            .collect()
    }
}

fn column_scaler(matrix: &Matrix) -> (Vec<f64>, Vec<f64>) {
    let rows = matrix.rows as f64;
    let mut means = vec![0.0; matrix.cols];
    for row in matrix.iter_rows() {
        for (m, &x) in means.iter_mut().zip(row.iter()) {
            *m += x;
        }
    }
    for m in means.iter_mut() {
        *m /= rows;
    }

    let mut stds = vec![0.0; matrix.cols];
    for row in matrix.iter_rows() {
        for ((s, &x), m) in stds.iter_mut().zip(row.iter()).zip(&means) {
            *s += (x - m).powi(2);
        }
    }
    for s in stds.iter_mut() {
        *s = (*s / rows).sqrt();
        // Constant columns pass through unscaled.
        if *s == 0.0 {
            *s = 1.0;
        }
    }
    (means, stds)
}

fn standardize(row: &[f64], means: &[f64], stds: &[f64]) -> Vec<f64> {
    row.iter()
        .zip(means.iter().zip(stds))
        .map(|(&x, (&m, &s))| (x - m) / s)
        .collect()
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn separable() -> (Matrix, Vec<u8>) {
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for i in 0..20 {
            rows.push(vec![i as f64, 1.0]);
            labels.push(if i >= 10 { 1 } else { 0 });
        }
        (Matrix::from_rows(rows), labels)
    }

    #[test]
    fn learns_a_separable_direction() {
        let (matrix, labels) = separable();
        let weights = vec![1.0; labels.len()];
        let model =
            LogisticModel::fit(&matrix, &labels, &weights, LogisticConfig::default()).unwrap();
        assert!(model.predict_proba(&[19.0, 1.0]) > 0.8);
        assert!(model.predict_proba(&[0.0, 1.0]) < 0.2);
        // The informative column dominates the constant one.
        assert!(model.feature_importances()[0] > model.feature_importances()[1]);
    }

    #[test]
    fn probabilities_stay_in_range() {
        let (matrix, labels) = separable();
        let weights = vec![1.0; labels.len()];
        let model =
            LogisticModel::fit(&matrix, &labels, &weights, LogisticConfig::default()).unwrap();
        for value in [-1e6, -1.0, 0.0, 1.0, 1e6] {
            let p = model.predict_proba(&[value, 1.0]);
            assert!((0.0..=1.0).contains(&p));
        }
    }

    #[test]
    fn contributions_are_signed_and_aligned() {
        let (matrix, labels) = separable();
        let weights = vec![1.0; labels.len()];
        let model =
            LogisticModel::fit(&matrix, &labels, &weights, LogisticConfig::default()).unwrap();
        let high = model.contributions(&[19.0, 1.0]);
        let low = model.contributions(&[0.0, 1.0]);
        assert!(high[0] > 0.0);
        assert!(low[0] < 0.0);
        assert_eq!(high.len(), 2);
    }

    #[test]
    fn empty_input_is_rejected() {
        let matrix = Matrix::with_cols(3);
        let err = LogisticModel::fit(&matrix, &[], &[], LogisticConfig::default()).unwrap_err();
        assert!(matches!(err, TrainingError::EmptyTrainingSet));
    }
}
