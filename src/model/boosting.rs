//! Gradient-boosted regression trees on log-loss.
//!
//! Starts from the training log-odds and fits each round's tree to the
//! residuals `y - p`, with Newton leaf values `sum(r) / sum(p(1-p))`.

use super::tree::{midpoint, normalize, partition};
use crate::transform::FeatureVector;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoostingParams {
    pub rounds: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
}

impl Default for BoostingParams {
    fn default() -> Self {
        Self {
            rounds: 50,
            learning_rate: 0.1,
            max_depth: 3,
            min_samples_leaf: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
enum RegressionNode {
    Split {
        feature: usize,
        threshold: f64,
        gain: f64,
        left: Box<RegressionNode>,
        right: Box<RegressionNode>,
    },
    Leaf {
        value: f64,
    },
}

impl RegressionNode {
    fn predict(&self, x: &[f64]) -> f64 {
        match self {
            Self::Leaf { value } => *value,
            Self::Split {
                feature,
                threshold,
                left,
                right,
                ..
            } => {
                if x.get(*feature).copied().unwrap_or(f64::NAN) <= *threshold {
                    left.predict(x)
                } else {
                    right.predict(x)
                }
            }
        }
    }

    fn accumulate(&self, scores: &mut [f64]) {
        if let Self::Split {
            feature,
            gain,
            left,
            right,
            ..
        } = self
        {
            if let Some(s) = scores.get_mut(*feature) {
                *s += gain;
            }
            left.accumulate(scores);
            right.accumulate(scores);
        }
    }
}

pub(crate) fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoosted {
    init: f64,
    learning_rate: f64,
    trees: Vec<RegressionNode>,
    n_features: usize,
}

impl GradientBoosted {
    pub fn fit(x: &[FeatureVector], y: &[u8], params: &BoostingParams) -> Self {
        let n = x.len();
        let n_features = x.first().map_or(0, |r| r.len());
        let positives = y.iter().filter(|&&v| v == 1).count();
        let base = (positives as f64 / n.max(1) as f64).clamp(1e-6, 1.0 - 1e-6);
        let init = (base / (1.0 - base)).ln();

        let mut raw = vec![init; n];
        let mut trees = Vec::with_capacity(params.rounds);

        for _ in 0..params.rounds {
            let p: Vec<f64> = raw.iter().map(|&f| sigmoid(f)).collect();
            let residuals: Vec<f64> = y.iter().zip(&p).map(|(&t, &pi)| f64::from(t) - pi).collect();
            let hessians: Vec<f64> = p.iter().map(|&pi| pi * (1.0 - pi)).collect();

            let mut indices: Vec<usize> = (0..n).collect();
            let tree = grow(x, &residuals, &hessians, &mut indices, 0, params, n_features);
            for (f, row) in raw.iter_mut().zip(x) {
                *f += params.learning_rate * tree.predict(row);
            }
            trees.push(tree);
        }

        Self {
            init,
            learning_rate: params.learning_rate,
            trees,
            n_features,
        }
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn decision_function(&self, x: &[f64]) -> f64 {
        self.init
            + self
                .trees
                .iter()
                .map(|t| self.learning_rate * t.predict(x))
                .sum::<f64>()
    }

    pub fn probability(&self, x: &[f64]) -> f64 {
        sigmoid(self.decision_function(x))
    }

    pub fn importances(&self) -> Vec<f64> {
        let mut scores = vec![0.0; self.n_features];
        for tree in &self.trees {
            tree.accumulate(&mut scores);
        }
        normalize(&mut scores);
        scores
    }
}

#[expect(clippy::indexing_slicing)]
fn newton_leaf(residuals: &[f64], hessians: &[f64], indices: &[usize]) -> RegressionNode {
    let r: f64 = indices.iter().map(|&i| residuals[i]).sum();
    let h: f64 = indices.iter().map(|&i| hessians[i]).sum();
    RegressionNode::Leaf {
        value: if h > 1e-12 { r / h } else { 0.0 },
    }
}

#[expect(clippy::indexing_slicing)]
fn grow(
    x: &[FeatureVector],
    residuals: &[f64],
    hessians: &[f64],
    indices: &mut [usize],
    depth: usize,
    params: &BoostingParams,
    n_features: usize,
) -> RegressionNode {
    let n = indices.len();
    let min_leaf = params.min_samples_leaf.max(1);
    if depth >= params.max_depth || n < 2 * min_leaf {
        return newton_leaf(residuals, hessians, indices);
    }

    let total: f64 = indices.iter().map(|&i| residuals[i]).sum();
    let parent_score = total * total / n as f64;
    let mut best: Option<(usize, f64, f64)> = None;
    let mut order = indices.to_vec();

    for feature in 0..n_features {
        order.sort_by(|&a, &b| x[a][feature].total_cmp(&x[b][feature]));
        let mut left_sum = 0.0;
        for pos in 0..n - 1 {
            left_sum += residuals[order[pos]];
            let n_left = pos + 1;
            let n_right = n - n_left;
            let lo = x[order[pos]][feature];
            let hi = x[order[pos + 1]][feature];
            if lo == hi || n_left < min_leaf || n_right < min_leaf {
                continue;
            }
            let right_sum = total - left_sum;
            // Reduction in squared error of the residuals.
            let gain = left_sum * left_sum / n_left as f64 + right_sum * right_sum / n_right as f64
                - parent_score;
            if gain > 1e-12 && best.is_none_or(|(_, _, g)| gain > g) {
                best = Some((feature, midpoint(lo, hi), gain));
            }
        }
    }

    let Some((feature, threshold, gain)) = best else {
        return newton_leaf(residuals, hessians, indices);
    };

    let (left, right) = partition(x, indices, feature, threshold);
    RegressionNode::Split {
        feature,
        threshold,
        gain,
        left: Box::new(grow(x, residuals, hessians, left, depth + 1, params, n_features)),
        right: Box::new(grow(x, residuals, hessians, right, depth + 1, params, n_features)),
    }
}
