use log::info;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::cmp::Ordering;

/// A metric that may be undefined for a degenerate fold. Undefined outcomes
/// are reported as such instead of masquerading as 0 or NaN.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum MetricOutcome {
    Value(f64),
    Undefined { reason: String },
}

impl MetricOutcome {
    pub fn value(&self) -> Option<f64> {
        match self {
            MetricOutcome::Value(value) => Some(*value),
            MetricOutcome::Undefined { .. } => None,
        }
    }

    fn undefined(reason: &str) -> Self {
        MetricOutcome::Undefined {
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationConfig {
    /// Decision threshold for the point metrics; never inferred.
    pub threshold: f64,
    pub k_ranks: Vec<usize>,
    pub calibration_bins: usize,
    pub deciles: usize,
    /// Revenue booked per converted customer.
    pub conversion_value: f64,
    /// Cost of contacting one targeted customer.
    pub outreach_cost: f64,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            k_ranks: vec![10, 20, 50, 100],
            calibration_bins: 10,
            deciles: 10,
            conversion_value: 100.0,
            outreach_cost: 10.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankMetrics {
    pub k: usize,
    pub precision_at_k: f64,
    pub recall_at_k: MetricOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationBin {
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
    pub mean_predicted: f64,
    pub observed_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecileLift {
    pub decile: usize,
    pub count: usize,
    pub positives: usize,
    pub response_rate: f64,
    pub lift: MetricOutcome,
    pub cumulative_lift: MetricOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationReport {
    pub total: usize,
    pub positives: usize,
    pub base_rate: f64,
    pub threshold: f64,
    pub roc_auc: MetricOutcome,
    pub pr_auc: MetricOutcome,
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub rank_metrics: Vec<RankMetrics>,
    pub calibration: Vec<CalibrationBin>,
    pub lift: Vec<DecileLift>,
    pub expected_net_profit: f64,
}

/// Evaluates held-out predictions. Degenerate single-class folds make the
/// ranking AUCs undefined; everything else is still reported.
pub fn evaluate(
    probabilities: &[f64],
    labels: &[u8],
    config: &EvaluationConfig,
) -> EvaluationReport {
    debug_assert_eq!(probabilities.len(), labels.len());
    let total = labels.len();
    let positives = labels.iter().filter(|&&l| l == 1).count();
    let negatives = total - positives;
    let base_rate = if total > 0 {
        positives as f64 / total as f64
    } else {
        0.0
    };

    let order = descending_order(probabilities);

    let (roc_auc, pr_auc) = if positives == 0 || negatives == 0 {
        let reason = if positives == 0 {
            "no positive labels in fold"
        } else {
            "no negative labels in fold"
        };
        (
            MetricOutcome::undefined(reason),
            MetricOutcome::undefined(reason),
        )
    } else {
        (
            MetricOutcome::Value(roc_auc(probabilities, labels, positives, negatives)),
            MetricOutcome::Value(average_precision(&order, labels, positives)),
        )
    };

    // Point metrics at the configured threshold; empty denominators fall back
    // to 0 rather than poisoning the report.
    let mut true_pos = 0usize;
    let mut false_pos = 0usize;
    let mut correct = 0usize;
    for (&p, &label) in probabilities.iter().zip(labels) {
        let predicted = u8::from(p >= config.threshold);
        if predicted == label {
            correct += 1;
        }
        if predicted == 1 {
            if label == 1 {
                true_pos += 1;
            } else {
                false_pos += 1;
            }
        }
    }
    let accuracy = ratio_or_zero(correct as f64, total as f64);
    let precision = ratio_or_zero(true_pos as f64, (true_pos + false_pos) as f64);
    let recall = ratio_or_zero(true_pos as f64, positives as f64);
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };

    let rank_metrics = config
        .k_ranks
        .iter()
        .map(|&k| rank_metrics_at(&order, labels, positives, k))
        .collect();
    let calibration = calibration_bins(probabilities, labels, config.calibration_bins);
    let lift = decile_lift(&order, labels, base_rate, config.deciles);

    let expected_net_profit = probabilities
        .iter()
        .filter(|&&p| p >= config.threshold)
        .map(|&p| config.conversion_value * p - config.outreach_cost)
        .sum();

    info!(
        "Evaluated {} predictions ({} positive, base rate {:.4})",
        total, positives, base_rate
    );

    EvaluationReport {
        total,
        positives,
        base_rate,
        threshold: config.threshold,
        roc_auc,
        pr_auc,
        accuracy,
        precision,
        recall,
        f1,
        rank_metrics,
        calibration,
        lift,
        expected_net_profit,
    }
}

/// Indices sorted by probability descending; ties break on the original index
/// so the ranking is deterministic.
fn descending_order(probabilities: &[f64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..probabilities.len()).collect();
    order.sort_by(|&a, &b| {
        probabilities[b]
            .partial_cmp(&probabilities[a])
            .unwrap_or(Ordering::Equal)
            .then(a.cmp(&b))
    });
    order
}

/// Mann-Whitney ROC-AUC with midranks for tied scores.
fn roc_auc(probabilities: &[f64], labels: &[u8], positives: usize, negatives: usize) -> f64 {
    let mut order: Vec<usize> = (0..probabilities.len()).collect();
    order.sort_by(|&a, &b| {
        probabilities[a]
            .partial_cmp(&probabilities[b])
            .unwrap_or(Ordering::Equal)
    });

    let mut positive_rank_sum = 0.0;
    let mut idx = 0;
    while idx < order.len() {
        let mut end = idx + 1;
        while end < order.len()
            && probabilities[order[end]] == probabilities[order[idx]]
        {
            end += 1;
        }
        // Ranks are 1-based; a tie group shares its average rank.
        let midrank = (idx + 1 + end) as f64 / 2.0;
        for &row in &order[idx..end] {
            if labels[row] == 1 {
                positive_rank_sum += midrank;
            }
        }
        idx = end;
    }

    let n_pos = positives as f64;
    let n_neg = negatives as f64;
    (positive_rank_sum - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg)
}

/// Average precision: precision accumulated at each positive hit in rank
/// order.
fn average_precision(order: &[usize], labels: &[u8], positives: usize) -> f64 {
    let mut hits = 0usize;
    let mut sum = 0.0;
    for (rank, &row) in order.iter().enumerate() {
        if labels[row] == 1 {
            hits += 1;
            sum += hits as f64 / (rank + 1) as f64;
        }
    }
    sum / positives as f64
}

fn rank_metrics_at(order: &[usize], labels: &[u8], positives: usize, k: usize) -> RankMetrics {
    let take = k.min(order.len());
    let hits = order[..take].iter().filter(|&&row| labels[row] == 1).count();
    let precision_at_k = ratio_or_zero(hits as f64, take as f64);
    let recall_at_k = if positives == 0 {
        MetricOutcome::undefined("no positive labels in fold")
    } else {
        MetricOutcome::Value(hits as f64 / positives as f64)
    };
    RankMetrics {
        k,
        precision_at_k,
        recall_at_k,
    }
}

fn calibration_bins(probabilities: &[f64], labels: &[u8], bins: usize) -> Vec<CalibrationBin> {
    let mut grouped: Vec<(Vec<f64>, usize)> = vec![(Vec::new(), 0); bins];
    for (&p, &label) in probabilities.iter().zip(labels) {
        let bin = ((p * bins as f64) as usize).min(bins - 1);
        grouped[bin].0.push(p);
        grouped[bin].1 += label as usize;
    }

    grouped
        .into_iter()
        .enumerate()
        .map(|(idx, (predicted, positive_count))| {
            let count = predicted.len();
            let mean_predicted = if count > 0 { predicted.mean() } else { 0.0 };
            CalibrationBin {
                lower: idx as f64 / bins as f64,
                upper: (idx + 1) as f64 / bins as f64,
                count,
                mean_predicted,
                observed_rate: ratio_or_zero(positive_count as f64, count as f64),
            }
        })
        .collect()
}

fn decile_lift(order: &[usize], labels: &[u8], base_rate: f64, deciles: usize) -> Vec<DecileLift> {
    let total = order.len();
    if total == 0 || deciles == 0 {
        return Vec::new();
    }

    let base_size = total / deciles;
    let remainder = total % deciles;
    let mut results = Vec::with_capacity(deciles);
    let mut offset = 0usize;
    let mut cumulative_count = 0usize;
    let mut cumulative_positives = 0usize;
    for decile in 0..deciles {
        let size = base_size + usize::from(decile < remainder);
        let slice = &order[offset..offset + size];
        let positives = slice.iter().filter(|&&row| labels[row] == 1).count();
        offset += size;
        cumulative_count += size;
        cumulative_positives += positives;

        let response_rate = ratio_or_zero(positives as f64, size as f64);
        let (lift, cumulative_lift) = if base_rate == 0.0 {
            (
                MetricOutcome::undefined("base positive rate is zero"),
                MetricOutcome::undefined("base positive rate is zero"),
            )
        } else {
            (
                MetricOutcome::Value(response_rate / base_rate),
                MetricOutcome::Value(
                    ratio_or_zero(cumulative_positives as f64, cumulative_count as f64)
                        / base_rate,
                ),
            )
        };
        results.push(DecileLift {
            decile: decile + 1,
            count: size,
            positives,
            response_rate,
            lift,
            cumulative_lift,
        });
    }
    results
}

fn ratio_or_zero(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EvaluationConfig {
        EvaluationConfig {
            k_ranks: vec![2, 4],
            calibration_bins: 4,
            deciles: 2,
            ..EvaluationConfig::default()
        }
    }

    #[test]
    fn perfect_ranking_scores_full_auc() {
        let probs = vec![0.9, 0.8, 0.2, 0.1];
        let labels = vec![1, 1, 0, 0];
        let report = evaluate(&probs, &labels, &config());
        assert_eq!(report.roc_auc.value(), Some(1.0));
        assert_eq!(report.pr_auc.value(), Some(1.0));
        assert_eq!(report.accuracy, 1.0);
        assert_eq!(report.f1, 1.0);
    }

    #[test]
    fn reversed_ranking_scores_zero_auc() {
        let probs = vec![0.1, 0.2, 0.8, 0.9];
        let labels = vec![1, 1, 0, 0];
        let report = evaluate(&probs, &labels, &config());
        assert_eq!(report.roc_auc.value(), Some(0.0));
    }

    #[test]
    fn tied_scores_use_midranks() {
        // One positive and one negative share the same score: AUC 0.5.
        let probs = vec![0.5, 0.5];
        let labels = vec![1, 0];
        let report = evaluate(&probs, &labels, &config());
        assert_eq!(report.roc_auc.value(), Some(0.5));
    }

    #[test]
    fn single_class_fold_is_reported_undefined() {
        let probs = vec![0.4, 0.6, 0.7];
        let labels = vec![1, 1, 1];
        let report = evaluate(&probs, &labels, &config());
        assert!(matches!(report.roc_auc, MetricOutcome::Undefined { .. }));
        assert!(matches!(report.pr_auc, MetricOutcome::Undefined { .. }));
        // The rest of the report still carries values.
        assert_eq!(report.recall, 1.0);
        assert_eq!(report.base_rate, 1.0);
    }

    #[test]
    fn precision_and_recall_at_k() {
        let probs = vec![0.9, 0.8, 0.7, 0.1];
        let labels = vec![1, 0, 1, 0];
        let report = evaluate(&probs, &labels, &config());
        let at_2 = &report.rank_metrics[0];
        assert_eq!(at_2.k, 2);
        assert_eq!(at_2.precision_at_k, 0.5);
        assert_eq!(at_2.recall_at_k.value(), Some(0.5));
        let at_4 = &report.rank_metrics[1];
        assert_eq!(at_4.precision_at_k, 0.5);
        assert_eq!(at_4.recall_at_k.value(), Some(1.0));
    }

    #[test]
    fn lift_ranks_the_dense_decile_first() {
        let probs = vec![0.9, 0.85, 0.8, 0.75, 0.2, 0.15, 0.1, 0.05];
        let labels = vec![1, 1, 1, 1, 0, 0, 0, 0];
        let report = evaluate(&probs, &labels, &config());
        assert_eq!(report.lift.len(), 2);
        assert_eq!(report.lift[0].lift.value(), Some(2.0));
        assert_eq!(report.lift[1].lift.value(), Some(0.0));
        assert_eq!(report.lift[1].cumulative_lift.value(), Some(1.0));
    }

    #[test]
    fn expected_profit_only_counts_targeted_customers() {
        let probs = vec![0.9, 0.6, 0.4];
        let labels = vec![1, 0, 0];
        let cfg = EvaluationConfig {
            threshold: 0.5,
            conversion_value: 100.0,
            outreach_cost: 10.0,
            ..config()
        };
        let report = evaluate(&probs, &labels, &cfg);
        // (0.9 * 100 - 10) + (0.6 * 100 - 10) = 130
        assert!((report.expected_net_profit - 130.0).abs() < 1e-9);
    }

    #[test]
    fn calibration_bins_cover_the_unit_interval() {
        let probs = vec![0.05, 0.3, 0.55, 0.95, 0.99];
        let labels = vec![0, 0, 1, 1, 1];
        let report = evaluate(&probs, &labels, &config());
        assert_eq!(report.calibration.len(), 4);
        let counted: usize = report.calibration.iter().map(|b| b.count).sum();
        assert_eq!(counted, probs.len());
        let last = report.calibration.last().unwrap();
        assert_eq!(last.count, 2);
        assert_eq!(last.observed_rate, 1.0);
    }
}
