use crate::models::Matrix;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Class-imbalance correction applied uniformly across learners.
///
/// `InverseFrequency` feeds per-sample weights into each learner's loss.
/// `SyntheticOversample` synthesizes minority rows by interpolating between
/// existing minority rows; callers apply it to training folds only, never to
/// validation or holdout folds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ClassBalance {
    None,
    InverseFrequency,
    SyntheticOversample,
}

impl ClassBalance {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "none" => Some(Self::None),
            "weight" | "inverse-frequency" => Some(Self::InverseFrequency),
            "oversample" | "synthetic-oversample" => Some(Self::SyntheticOversample),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::InverseFrequency => "inverse-frequency",
            Self::SyntheticOversample => "synthetic-oversample",
        }
    }
}

/// Per-sample weights. Inverse-frequency weighting scales each class so both
/// contribute equally to the loss; other strategies leave weights at 1.
pub fn sample_weights(labels: &[u8], balance: ClassBalance) -> Vec<f64> {
    if balance != ClassBalance::InverseFrequency || labels.is_empty() {
        return vec![1.0; labels.len()];
    }
    let total = labels.len() as f64;
    let positives = labels.iter().filter(|&&l| l == 1).count() as f64;
    let negatives = total - positives;
    if positives == 0.0 || negatives == 0.0 {
        return vec![1.0; labels.len()];
    }
    let pos_weight = total / (2.0 * positives);
    let neg_weight = total / (2.0 * negatives);
    labels
        .iter()
        .map(|&l| if l == 1 { pos_weight } else { neg_weight })
        .collect()
}

/// Applies the chosen strategy to a training fold, returning the matrix,
/// labels and weights the learner should see.
pub fn apply_to_training_fold(
    matrix: &Matrix,
    labels: &[u8],
    balance: ClassBalance,
    seed: u64,
) -> (Matrix, Vec<u8>, Vec<f64>) {
    match balance {
        ClassBalance::SyntheticOversample => {
            let (matrix, labels) = oversample_minority(matrix, labels, seed);
            let weights = vec![1.0; labels.len()];
            (matrix, labels, weights)
        }
        _ => (
            matrix.clone(),
            labels.to_vec(),
            sample_weights(labels, balance),
        ),
    }
}

/// Synthetic minority oversampling: new minority rows are interpolated
/// between a random minority row and another random minority row until the
/// classes are balanced. Single-member minorities fall back to jittered
/// duplicates of that row.
pub fn oversample_minority(matrix: &Matrix, labels: &[u8], seed: u64) -> (Matrix, Vec<u8>) {
    let positives: Vec<usize> = (0..labels.len()).filter(|&i| labels[i] == 1).collect();
    let negatives: Vec<usize> = (0..labels.len()).filter(|&i| labels[i] == 0).collect();
    if positives.is_empty() || negatives.is_empty() || positives.len() == negatives.len() {
        return (matrix.clone(), labels.to_vec());
    }

    let (minority, minority_label) = if positives.len() < negatives.len() {
        (&positives, 1u8)
    } else {
        (&negatives, 0u8)
    };
    let deficit = labels.len() - 2 * minority.len();

    let mut rng = StdRng::seed_from_u64(seed);
    let mut out = matrix.clone();
    let mut out_labels = labels.to_vec();
    for _ in 0..deficit {
        let a = minority[rng.gen_range(0..minority.len())];
        let b = minority[rng.gen_range(0..minority.len())];
        let t: f64 = rng.gen_range(0.0..1.0);
        let row: Vec<f64> = matrix
            .row(a)
            .iter()
            .zip(matrix.row(b).iter())
            .map(|(x, y)| x + t * (y - x))
            .collect();
        out.push_row(&row);
        out_labels.push(minority_label);
    }
    (out, out_labels)
}
