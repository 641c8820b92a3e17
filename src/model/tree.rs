//! CART classification tree with Gini impurity.
//!
//! Leaves keep their sample and positive counts so the rule extractor can
//! report supporting samples and the forest can average leaf probabilities.
//! Splits send `x[feature] <= threshold` left and everything else right.

use crate::transform::FeatureVector;
use rand::rngs::StdRng;
use rand::seq::SliceRandom as _;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TreeParams {
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Features considered per split; `None` means all of them.
    pub max_features: Option<usize>,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            max_depth: 5,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Leaf {
    pub class: u8,
    pub n_samples: usize,
    pub n_positive: usize,
}

impl Leaf {
    #[expect(clippy::indexing_slicing)]
    fn from_labels(y: &[u8], indices: &[usize]) -> Self {
        let n_positive = indices.iter().filter(|&&i| y[i] == 1).count();
        Self {
            class: u8::from(n_positive * 2 > indices.len()),
            n_samples: indices.len(),
            n_positive,
        }
    }

    pub fn probability(&self) -> f64 {
        if self.n_samples == 0 {
            0.0
        } else {
            self.n_positive as f64 / self.n_samples as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Split {
    pub feature: usize,
    pub threshold: f64,
    /// Weighted impurity decrease (`n_samples * gain`).
    pub impurity_decrease: f64,
    pub n_samples: usize,
    pub left: Box<TreeNode>,
    pub right: Box<TreeNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum TreeNode {
    Split(Split),
    Leaf(Leaf),
}

impl TreeNode {
    pub fn n_leaves(&self) -> usize {
        match self {
            Self::Split(s) => s.left.n_leaves() + s.right.n_leaves(),
            Self::Leaf(_) => 1,
        }
    }
}

fn gini(n_positive: usize, n: usize) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let p = n_positive as f64 / n as f64;
    1.0 - p * p - (1.0 - p) * (1.0 - p)
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    gain: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    root: TreeNode,
    n_features: usize,
}

impl DecisionTree {
    pub fn fit(x: &[FeatureVector], y: &[u8], params: &TreeParams) -> Self {
        let mut indices: Vec<usize> = (0..x.len()).collect();
        Self::fit_indices(x, y, &mut indices, params, None)
    }

    /// Fit on a subset (possibly with repeats) of the rows. With an rng,
    /// each split samples `max_features` candidate features.
    pub fn fit_indices(
        x: &[FeatureVector],
        y: &[u8],
        indices: &mut [usize],
        params: &TreeParams,
        mut rng: Option<&mut StdRng>,
    ) -> Self {
        let n_features = x.first().map_or(0, |r| r.len());
        let root = build(x, y, indices, 0, params, n_features, rng.as_deref_mut());
        Self { root, n_features }
    }

    pub fn root(&self) -> &TreeNode {
        &self.root
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn leaf(&self, x: &[f64]) -> &Leaf {
        let mut node = &self.root;
        loop {
            match node {
                TreeNode::Leaf(leaf) => return leaf,
                TreeNode::Split(split) => {
                    let value = x.get(split.feature).copied().unwrap_or(f64::NAN);
                    node = if value <= split.threshold {
                        &split.left
                    } else {
                        &split.right
                    };
                }
            }
        }
    }

    pub fn probability(&self, x: &[f64]) -> f64 {
        self.leaf(x).probability()
    }

    /// Impurity-decrease importances normalized to sum to 1 (all zeros for
    /// a single-leaf tree).
    pub fn importances(&self) -> Vec<f64> {
        let mut scores = vec![0.0; self.n_features];
        accumulate(&self.root, &mut scores);
        normalize(&mut scores);
        scores
    }
}

fn accumulate(node: &TreeNode, scores: &mut [f64]) {
    if let TreeNode::Split(split) = node {
        if let Some(s) = scores.get_mut(split.feature) {
            *s += split.impurity_decrease;
        }
        accumulate(&split.left, scores);
        accumulate(&split.right, scores);
    }
}

pub(crate) fn normalize(scores: &mut [f64]) {
    let total: f64 = scores.iter().sum();
    if total > 0.0 {
        for s in scores.iter_mut() {
            *s /= total;
        }
    }
}

#[expect(clippy::indexing_slicing)]
fn build(
    x: &[FeatureVector],
    y: &[u8],
    indices: &mut [usize],
    depth: usize,
    params: &TreeParams,
    n_features: usize,
    mut rng: Option<&mut StdRng>,
) -> TreeNode {
    let n = indices.len();
    let n_positive = indices.iter().filter(|&&i| y[i] == 1).count();

    let pure = n_positive == 0 || n_positive == n;
    if pure || depth >= params.max_depth || n < params.min_samples_split.max(2) {
        return TreeNode::Leaf(Leaf::from_labels(y, indices));
    }

    let mut candidates: Vec<usize> = (0..n_features).collect();
    if let (Some(k), Some(rng)) = (params.max_features, rng.as_deref_mut()) {
        candidates.shuffle(rng);
        candidates.truncate(k.clamp(1, n_features.max(1)));
        candidates.sort_unstable();
    }

    let Some(best) = best_split(x, y, indices, &candidates, params.min_samples_leaf) else {
        return TreeNode::Leaf(Leaf::from_labels(y, indices));
    };

    let (left, right) = partition(x, indices, best.feature, best.threshold);
    let left_node = build(x, y, left, depth + 1, params, n_features, rng.as_deref_mut());
    let right_node = build(x, y, right, depth + 1, params, n_features, rng);

    TreeNode::Split(Split {
        feature: best.feature,
        threshold: best.threshold,
        impurity_decrease: n as f64 * best.gain,
        n_samples: n,
        left: Box::new(left_node),
        right: Box::new(right_node),
    })
}

/// Reorder `indices` so rows going left come first and split the slice.
#[expect(clippy::indexing_slicing)]
pub(crate) fn partition<'a>(
    x: &[FeatureVector],
    indices: &'a mut [usize],
    feature: usize,
    threshold: f64,
) -> (&'a mut [usize], &'a mut [usize]) {
    let mut boundary = 0;
    for i in 0..indices.len() {
        if x[indices[i]][feature] <= threshold {
            indices.swap(i, boundary);
            boundary += 1;
        }
    }
    indices.split_at_mut(boundary)
}

/// Midpoint between two adjacent distinct sorted values, guarded so the
/// lower value always goes left.
pub(crate) fn midpoint(lo: f64, hi: f64) -> f64 {
    let mid = lo + (hi - lo) / 2.0;
    if mid >= hi { lo } else { mid }
}

#[expect(clippy::indexing_slicing)]
fn best_split(
    x: &[FeatureVector],
    y: &[u8],
    indices: &[usize],
    candidates: &[usize],
    min_samples_leaf: usize,
) -> Option<BestSplit> {
    let n = indices.len();
    let total_positive = indices.iter().filter(|&&i| y[i] == 1).count();
    let parent = gini(total_positive, n);
    let min_leaf = min_samples_leaf.max(1);

    let mut best: Option<BestSplit> = None;
    let mut order: Vec<usize> = indices.to_vec();

    for &feature in candidates {
        order.sort_by(|&a, &b| x[a][feature].total_cmp(&x[b][feature]));

        let mut left_positive = 0;
        for pos in 0..n - 1 {
            left_positive += usize::from(y[order[pos]] == 1);
            let n_left = pos + 1;
            let n_right = n - n_left;
            let lo = x[order[pos]][feature];
            let hi = x[order[pos + 1]][feature];
            if lo == hi || n_left < min_leaf || n_right < min_leaf {
                continue;
            }

            let weighted = (n_left as f64 * gini(left_positive, n_left)
                + n_right as f64 * gini(total_positive - left_positive, n_right))
                / n as f64;
            let gain = parent - weighted;
            if gain > 1e-12 && best.as_ref().is_none_or(|b| gain > b.gain) {
                best = Some(BestSplit {
                    feature,
                    threshold: midpoint(lo, hi),
                    gain,
                });
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(values: &[&[f64]]) -> Vec<FeatureVector> {
        values.iter().map(|r| FeatureVector(r.to_vec())).collect()
    }

    #[test]
    fn test_depth_one_split_on_age() {
        let x = rows(&[&[22.0], &[25.0], &[30.0], &[45.0], &[50.0], &[61.0]]);
        let y = [0, 0, 0, 1, 1, 1];
        let params = TreeParams {
            max_depth: 1,
            ..TreeParams::default()
        };
        let tree = DecisionTree::fit(&x, &y, &params);

        let TreeNode::Split(split) = tree.root() else {
            panic!("expected a split at the root");
        };
        assert_eq!(split.feature, 0);
        assert!((split.threshold - 37.5).abs() < 1e-12);
        assert_eq!(tree.root().n_leaves(), 2);
        assert_eq!(split.n_samples, 6);
        assert!((tree.probability(&[30.0]) - 0.0).abs() < 1e-12);
        assert!((tree.probability(&[37.5]) - 0.0).abs() < 1e-12);
        assert!((tree.probability(&[38.0]) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_pure_labels_make_single_leaf() {
        let x = rows(&[&[1.0], &[2.0], &[3.0]]);
        let tree = DecisionTree::fit(&x, &[1, 1, 1], &TreeParams::default());
        assert_eq!(tree.root().n_leaves(), 1);
        assert_eq!(tree.importances(), vec![0.0]);
    }

    #[test]
    fn test_importances_sum_to_one() {
        let x = rows(&[
            &[1.0, 0.0],
            &[2.0, 1.0],
            &[3.0, 0.0],
            &[4.0, 1.0],
            &[5.0, 0.0],
            &[6.0, 1.0],
        ]);
        let y = [0, 1, 0, 1, 1, 1];
        let tree = DecisionTree::fit(&x, &y, &TreeParams::default());
        let importances = tree.importances();
        let total: f64 = importances.iter().sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert!(importances.iter().all(|&v| v >= 0.0));
    }

    #[test]
    fn test_min_samples_leaf_respected() {
        let x = rows(&[&[1.0], &[2.0], &[3.0], &[4.0]]);
        let y = [1, 0, 0, 0];
        let params = TreeParams {
            min_samples_leaf: 2,
            ..TreeParams::default()
        };
        let tree = DecisionTree::fit(&x, &y, &params);
        fn check(node: &TreeNode) {
            match node {
                TreeNode::Leaf(l) => assert!(l.n_samples >= 2),
                TreeNode::Split(s) => {
                    check(&s.left);
                    check(&s.right);
                }
            }
        }
        check(tree.root());
    }

    #[test]
    fn test_midpoint_keeps_lower_value_left() {
        let lo = 1.0_f64;
        let hi = f64::from_bits(lo.to_bits() + 1);
        assert_eq!(midpoint(lo, hi), lo);
        assert_eq!(midpoint(2.0, 4.0), 3.0);
    }
}
