use crate::models::Matrix;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

/// Weighted regression tree shared by the bagged and boosted learners.
///
/// Splits maximize weighted squared-error reduction; leaves hold the weighted
/// mean of their targets. With gradient/hessian inputs (target = -g/h,
/// weight = h) the leaf value becomes the Newton step -sum(g)/sum(h).
#[derive(Debug, Clone, Copy)]
pub struct TreeConfig {
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    pub min_gain: f64,
    /// Number of features examined per split; None tries all of them.
    pub feature_subsample: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    gain: f64,
    left: Vec<usize>,
    right: Vec<usize>,
}

struct TreeBuilder<'a> {
    matrix: &'a Matrix,
    targets: &'a [f64],
    weights: &'a [f64],
    config: TreeConfig,
    nodes: Vec<Node>,
    gains: Vec<f64>,
}

impl RegressionTree {
    /// Fits a tree and returns it with the per-feature split gains it used.
    pub fn fit(
        matrix: &Matrix,
        targets: &[f64],
        weights: &[f64],
        config: TreeConfig,
        rng: &mut StdRng,
    ) -> (Self, Vec<f64>) {
        let mut builder = TreeBuilder {
            matrix,
            targets,
            weights,
            config,
            nodes: Vec::new(),
            gains: vec![0.0; matrix.cols],
        };
        let indices: Vec<usize> = (0..matrix.rows).collect();
        builder.build(&indices, 0, rng);
        (
            Self {
                nodes: builder.nodes,
            },
            builder.gains,
        )
    }

    pub fn predict(&self, row: &[f64]) -> f64 {
        let mut idx = 0usize;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if row[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }
}

impl<'a> TreeBuilder<'a> {
    /// Appends the subtree for `indices` and returns its root node index.
    fn build(&mut self, indices: &[usize], depth: usize, rng: &mut StdRng) -> usize {
        if depth >= self.config.max_depth || indices.len() < 2 * self.config.min_samples_leaf {
            return self.push_leaf(indices);
        }

        let split = match self.best_split(indices, rng) {
            Some(split) if split.gain > self.config.min_gain => split,
            _ => return self.push_leaf(indices),
        };

        self.gains[split.feature] += split.gain;
        let node_idx = self.nodes.len();
        // Placeholder gets patched once both children exist.
        self.nodes.push(Node::Leaf { value: 0.0 });
        let left = self.build(&split.left, depth + 1, rng);
        let right = self.build(&split.right, depth + 1, rng);
        self.nodes[node_idx] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        node_idx
    }

    fn push_leaf(&mut self, indices: &[usize]) -> usize {
        let mut weight_sum = 0.0;
        let mut target_sum = 0.0;
        for &idx in indices {
            weight_sum += self.weights[idx];
            target_sum += self.weights[idx] * self.targets[idx];
        }
        let value = if weight_sum > 0.0 {
            target_sum / weight_sum
        } else {
            0.0
        };
        self.nodes.push(Node::Leaf { value });
        self.nodes.len() - 1
    }

    fn best_split(&self, indices: &[usize], rng: &mut StdRng) -> Option<SplitCandidate> {
        let mut features: Vec<usize> = (0..self.matrix.cols).collect();
        if let Some(k) = self.config.feature_subsample {
            if k < features.len() {
                features.shuffle(rng);
                features.truncate(k);
                features.sort_unstable();
            }
        }

        let parent_sse = weighted_sse(indices, self.targets, self.weights);
        let mut best: Option<SplitCandidate> = None;

        for &feature in &features {
            let mut ordered: Vec<usize> = indices.to_vec();
            ordered.sort_by(|&a, &b| {
                self.matrix.row(a)[feature]
                    .partial_cmp(&self.matrix.row(b)[feature])
                    .unwrap_or(std::cmp::Ordering::Equal)
            });

            let mut left_w = 0.0;
            let mut left_wt = 0.0;
            let mut left_wt2 = 0.0;
            let mut total_w = 0.0;
            let mut total_wt = 0.0;
            let mut total_wt2 = 0.0;
            for &idx in &ordered {
                let w = self.weights[idx];
                let t = self.targets[idx];
                total_w += w;
                total_wt += w * t;
                total_wt2 += w * t * t;
            }

            for pos in 0..ordered.len() - 1 {
                let idx = ordered[pos];
                let w = self.weights[idx];
                let t = self.targets[idx];
                left_w += w;
                left_wt += w * t;
                left_wt2 += w * t * t;

                let here = self.matrix.row(idx)[feature];
                let next = self.matrix.row(ordered[pos + 1])[feature];
                if here == next {
                    continue;
                }
                let left_count = pos + 1;
                let right_count = ordered.len() - left_count;
                if left_count < self.config.min_samples_leaf
                    || right_count < self.config.min_samples_leaf
                {
                    continue;
                }

                let right_w = total_w - left_w;
                if left_w <= 0.0 || right_w <= 0.0 {
                    continue;
                }
                let left_sse = (left_wt2 - left_wt * left_wt / left_w).max(0.0);
                let right_wt = total_wt - left_wt;
                let right_wt2 = total_wt2 - left_wt2;
                let right_sse = (right_wt2 - right_wt * right_wt / right_w).max(0.0);
                let gain = parent_sse - left_sse - right_sse;
                if !gain.is_finite() {
                    continue;
                }

                let improves = match &best {
                    Some(current) => gain > current.gain,
                    None => true,
                };
                if improves {
                    let threshold = here + (next - here) / 2.0;
                    best = Some(SplitCandidate {
                        feature,
                        threshold,
                        gain,
                        left: ordered[..left_count].to_vec(),
                        right: ordered[left_count..].to_vec(),
                    });
                }
            }
        }

        best
    }
}

fn weighted_sse(indices: &[usize], targets: &[f64], weights: &[f64]) -> f64 {
    let mut w_sum = 0.0;
    let mut wt_sum = 0.0;
    let mut wt2_sum = 0.0;
    for &idx in indices {
        let w = weights[idx];
        let t = targets[idx];
        w_sum += w;
        wt_sum += w * t;
        wt2_sum += w * t * t;
    }
    if w_sum <= 0.0 {
        return 0.0;
    }
    (wt2_sum - wt_sum * wt_sum / w_sum).max(0.0)
}
