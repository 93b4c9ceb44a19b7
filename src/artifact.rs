use crate::balance::ClassBalance;
use crate::ensemble::EnsembleModel;
use crate::evaluation::EvaluationReport;
use crate::features::CountryVocabulary;
use crate::learner::BaseModel;
use anyhow::{Context, Result as AnyResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use uuid::Uuid;

/// The closed set of deployable model shapes behind one scoring interface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScoringModel {
    Base(BaseModel),
    Stacked(EnsembleModel),
    Blended(EnsembleModel),
}

impl ScoringModel {
    pub fn predict_proba(&self, row: &[f64]) -> f64 {
        let p = match self {
            ScoringModel::Base(model) => model.predict_proba(row),
            ScoringModel::Stacked(model) | ScoringModel::Blended(model) => {
                model.predict_proba(row)
            }
        };
        p.clamp(0.0, 1.0)
    }

    pub fn feature_importances(&self) -> Vec<f64> {
        match self {
            ScoringModel::Base(model) => model.feature_importances().to_vec(),
            ScoringModel::Stacked(model) | ScoringModel::Blended(model) => {
                model.feature_importances().to_vec()
            }
        }
    }

    pub fn contributions(&self, row: &[f64]) -> Vec<f64> {
        match self {
            ScoringModel::Base(model) => model.contributions(row),
            ScoringModel::Stacked(model) | ScoringModel::Blended(model) => model.contributions(row),
        }
    }

    pub fn strategy_tag(&self) -> &'static str {
        match self {
            ScoringModel::Base(_) => "single",
            ScoringModel::Stacked(_) => "stacking",
            ScoringModel::Blended(_) => "blending",
        }
    }

    pub fn base_names(&self) -> Vec<String> {
        match self {
            ScoringModel::Base(model) => vec![model.name().to_string()],
            ScoringModel::Stacked(model) | ScoringModel::Blended(model) => {
                model.base_names().to_vec()
            }
        }
    }
}

/// Training-run metadata carried alongside the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingMetadata {
    pub trained_at: DateTime<Utc>,
    pub training_rows: usize,
    pub holdout_rows: usize,
    pub seed: u64,
    pub balance: ClassBalance,
    pub metrics: Option<EvaluationReport>,
}

/// An immutable trained bundle. A retrain produces a new artifact with a new
/// id; existing artifacts are superseded, never edited, so concurrent scoring
/// against different versions is safe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainedArtifact {
    pub id: Uuid,
    pub feature_names: Vec<String>,
    pub vocabulary: CountryVocabulary,
    pub model: ScoringModel,
    pub metadata: TrainingMetadata,
}

impl TrainedArtifact {
    pub fn new(
        feature_names: Vec<String>,
        vocabulary: CountryVocabulary,
        model: ScoringModel,
        metadata: TrainingMetadata,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            feature_names,
            vocabulary,
            model,
            metadata,
        }
    }

    pub fn save(&self, path: &Path) -> AnyResult<()> {
        let encoded = bincode::serialize(self)
            .with_context(|| format!("Failed to encode artifact {}", self.id))?;
        fs::write(path, encoded)
            .with_context(|| format!("Failed to write artifact to {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: &Path) -> AnyResult<Self> {
        let bytes = fs::read(path)
            .with_context(|| format!("Failed to read artifact from {}", path.display()))?;
        bincode::deserialize(&bytes)
            .with_context(|| format!("Failed to decode artifact at {}", path.display()))
    }
}
