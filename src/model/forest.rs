//! Bootstrap-aggregated CART trees.

use super::tree::{DecisionTree, TreeParams, normalize};
use crate::transform::FeatureVector;
use rand::rngs::StdRng;
use rand::{Rng as _, SeedableRng as _};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    trees: Vec<DecisionTree>,
    n_features: usize,
}

impl RandomForest {
    /// Tree `i` is grown from its own `StdRng` seeded with `seed + i`, so a
    /// fixed seed reproduces the same forest.
    pub fn fit(x: &[FeatureVector], y: &[u8], n_trees: usize, params: &TreeParams, seed: u64) -> Self {
        let n = x.len();
        let n_features = x.first().map_or(0, |r| r.len());
        let params = TreeParams {
            max_features: params
                .max_features
                .or_else(|| Some(((n_features as f64).sqrt().ceil() as usize).max(1))),
            ..*params
        };

        let trees = (0..n_trees.max(1))
            .map(|i| {
                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(i as u64));
                let mut sample: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                DecisionTree::fit_indices(x, y, &mut sample, &params, Some(&mut rng))
            })
            .collect();

        Self { trees, n_features }
    }

    pub fn trees(&self) -> &[DecisionTree] {
        &self.trees
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    /// Mean of the per-tree leaf probabilities.
    pub fn probability(&self, x: &[f64]) -> f64 {
        if self.trees.is_empty() {
            return 0.0;
        }
        self.trees.iter().map(|t| t.probability(x)).sum::<f64>() / self.trees.len() as f64
    }

    pub fn importances(&self) -> Vec<f64> {
        let mut scores = vec![0.0; self.n_features];
        for tree in &self.trees {
            for (s, v) in scores.iter_mut().zip(tree.importances()) {
                *s += v;
            }
        }
        normalize(&mut scores);
        scores
    }
}
