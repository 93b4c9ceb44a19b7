use crate::balance::ClassBalance;
use crate::ensemble::{CombinationStrategy, DivergencePolicy, EnsembleConfig};
use crate::evaluation::EvaluationConfig;
use crate::learner::{BoostConfig, ForestConfig, LearnerSpec, LogisticConfig};
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// End-to-end pipeline configuration with the defaults a training run uses
/// when no config file is given.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineConfig {
    /// Label window length in days.
    pub horizon_days: i64,
    /// Fraction of customers held out for the final evaluation.
    pub test_fraction: f64,
    pub folds: usize,
    pub holdout_fraction: f64,
    pub seed: u64,
    pub balance: ClassBalance,
    pub strategy: CombinationStrategy,
    pub abort_on_divergence: bool,
    pub logistic: LogisticConfig,
    pub forest: ForestConfig,
    pub boost: BoostConfig,
    pub evaluation: EvaluationConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            horizon_days: 30,
            test_fraction: 0.2,
            folds: 5,
            holdout_fraction: 0.25,
            seed: 42,
            balance: ClassBalance::InverseFrequency,
            strategy: CombinationStrategy::Stacking,
            abort_on_divergence: false,
            logistic: LogisticConfig::default(),
            forest: ForestConfig::default(),
            boost: BoostConfig::default(),
            evaluation: EvaluationConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config at {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.horizon_days <= 0 {
            return Err(anyhow!("horizonDays must be positive"));
        }
        if !(0.0..1.0).contains(&self.test_fraction) {
            return Err(anyhow!("testFraction must be in [0, 1)"));
        }
        if self.folds < 2 {
            return Err(anyhow!("folds must be at least 2"));
        }
        if !(0.0..1.0).contains(&self.holdout_fraction) || self.holdout_fraction == 0.0 {
            return Err(anyhow!("holdoutFraction must be in (0, 1)"));
        }
        Ok(())
    }

    pub fn learner_pool(&self) -> Vec<LearnerSpec> {
        vec![
            LearnerSpec::Logistic(self.logistic),
            LearnerSpec::Forest(self.forest),
            LearnerSpec::Boosted(self.boost),
        ]
    }

    pub fn ensemble(&self) -> EnsembleConfig {
        EnsembleConfig {
            strategy: self.strategy,
            folds: self.folds,
            holdout_fraction: self.holdout_fraction,
            balance: self.balance,
            on_divergence: if self.abort_on_divergence {
                DivergencePolicy::Abort
            } else {
                DivergencePolicy::DropLearner
            },
            seed: self.seed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        PipelineConfig::default().validate().unwrap();
    }

    #[test]
    fn bad_horizon_is_rejected() {
        let config = PipelineConfig {
            horizon_days: 0,
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = PipelineConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: PipelineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.horizon_days, config.horizon_days);
        assert_eq!(parsed.strategy, config.strategy);
        assert_eq!(parsed.balance, config.balance);
    }
}
