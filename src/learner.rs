use crate::error::TrainingError;
use crate::models::Matrix;
use serde::{Deserialize, Serialize};

#[path = "learners/tree.rs"]
pub mod tree;

#[path = "learners/logistic.rs"]
pub mod logistic;

#[path = "learners/random_forest.rs"]
pub mod random_forest;

#[path = "learners/gradient_boosting.rs"]
pub mod gradient_boosting;

pub use gradient_boosting::{BoostConfig, BoostedModel, BOOSTED_NAME};
pub use logistic::{LogisticConfig, LogisticModel, LOGISTIC_NAME};
pub use random_forest::{ForestConfig, ForestModel, FOREST_NAME};

/// A base learner specification: which algorithm plus its hyperparameters.
/// All three share one contract — fit on (matrix, labels, weights) and hand
/// back a serializable model with `predict_proba` and feature importances.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum LearnerSpec {
    Logistic(LogisticConfig),
    Forest(ForestConfig),
    Boosted(BoostConfig),
}

impl LearnerSpec {
    pub fn name(&self) -> &'static str {
        match self {
            LearnerSpec::Logistic(_) => LOGISTIC_NAME,
            LearnerSpec::Forest(_) => FOREST_NAME,
            LearnerSpec::Boosted(_) => BOOSTED_NAME,
        }
    }

    /// The default base learner pool: one linear, one bagged-tree, one
    /// boosted-tree model.
    pub fn default_pool() -> Vec<LearnerSpec> {
        vec![
            LearnerSpec::Logistic(LogisticConfig::default()),
            LearnerSpec::Forest(ForestConfig::default()),
            LearnerSpec::Boosted(BoostConfig::default()),
        ]
    }

    pub fn fit(
        &self,
        matrix: &Matrix,
        labels: &[u8],
        weights: &[f64],
        seed: u64,
    ) -> Result<BaseModel, TrainingError> {
        if matrix.rows == 0 {
            return Err(TrainingError::EmptyTrainingSet);
        }
        if let Some(&class) = single_class(labels) {
            return Err(TrainingError::SingleClass { class });
        }
        match self {
            LearnerSpec::Logistic(config) => {
                LogisticModel::fit(matrix, labels, weights, *config).map(BaseModel::Logistic)
            }
            LearnerSpec::Forest(config) => {
                ForestModel::fit(matrix, labels, weights, *config, seed).map(BaseModel::Forest)
            }
            LearnerSpec::Boosted(config) => {
                BoostedModel::fit(matrix, labels, weights, *config, seed).map(BaseModel::Boosted)
            }
        }
    }
}

fn single_class(labels: &[u8]) -> Option<&u8> {
    let first = labels.first()?;
    if labels.iter().all(|l| l == first) {
        Some(first)
    } else {
        None
    }
}

/// A fitted base model. A closed enum rather than a trait object so the whole
/// bundle serializes and the scoring dispatch stays exhaustive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BaseModel {
    Logistic(LogisticModel),
    Forest(ForestModel),
    Boosted(BoostedModel),
}

impl BaseModel {
    pub fn name(&self) -> &'static str {
        match self {
            BaseModel::Logistic(_) => LOGISTIC_NAME,
            BaseModel::Forest(_) => FOREST_NAME,
            BaseModel::Boosted(_) => BOOSTED_NAME,
        }
    }

    pub fn predict_proba(&self, row: &[f64]) -> f64 {
        match self {
            BaseModel::Logistic(model) => model.predict_proba(row),
            BaseModel::Forest(model) => model.predict_proba(row),
            BaseModel::Boosted(model) => model.predict_proba(row),
        }
    }

    pub fn predict_proba_batch(&self, matrix: &Matrix) -> Vec<f64> {
        matrix.iter_rows().map(|row| self.predict_proba(row)).collect()
    }

    pub fn feature_importances(&self) -> &[f64] {
        match self {
            BaseModel::Logistic(model) => model.feature_importances(),
            BaseModel::Forest(model) => model.feature_importances(),
            BaseModel::Boosted(model) => model.feature_importances(),
        }
    }

    /// Per-row contribution scores used by the scorer: signed
    /// coefficient-times-value terms for the linear model, stored importances
    /// for the tree models.
    pub fn contributions(&self, row: &[f64]) -> Vec<f64> {
        match self {
            BaseModel::Logistic(model) => model.contributions(row),
            BaseModel::Forest(model) => model.feature_importances().to_vec(),
            BaseModel::Boosted(model) => model.feature_importances().to_vec(),
        }
    }
}
