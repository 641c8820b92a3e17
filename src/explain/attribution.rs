//! Additive per-prediction attribution.

use crate::error::Result;
use crate::model::Model;
use crate::transform::FeatureVector;
use rand::SeedableRng as _;
use rand::rngs::StdRng;
use rand::seq::SliceRandom as _;

/// Decomposes each prediction into per-feature contributions.
///
/// For every row the contributions must sum to the model output for that
/// row minus the output at the strategy's baseline.
pub trait AttributionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// One attribution vector per input row, each as wide as the row.
    fn attribute(&self, model: &Model, rows: &[FeatureVector]) -> Result<Vec<Vec<f64>>>;
}

/// Monte-Carlo permutation Shapley values against the sample-mean
/// baseline.
///
/// Each sampled permutation switches features from the baseline to the
/// row's value one at a time and credits each feature with the change in
/// output, so every permutation telescopes to `f(row) - f(baseline)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermutationShapley {
    pub permutations: usize,
    pub seed: u64,
}

impl Default for PermutationShapley {
    fn default() -> Self {
        Self {
            permutations: 32,
            seed: 42,
        }
    }
}

fn column_means(rows: &[FeatureVector]) -> Vec<f64> {
    let width = rows.first().map_or(0, |r| r.len());
    let mut means = vec![0.0; width];
    for row in rows {
        for (m, v) in means.iter_mut().zip(row.iter()) {
            *m += v;
        }
    }
    let n = rows.len().max(1) as f64;
    means.iter_mut().for_each(|m| *m /= n);
    means
}

impl AttributionStrategy for PermutationShapley {
    fn name(&self) -> &'static str {
        "permutation_shapley"
    }

    #[expect(clippy::indexing_slicing)]
    fn attribute(&self, model: &Model, rows: &[FeatureVector]) -> Result<Vec<Vec<f64>>> {
        let baseline = column_means(rows);
        let base_output = model.output(&baseline)?;
        let width = baseline.len();
        let permutations = self.permutations.max(1);
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut order: Vec<usize> = (0..width).collect();

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let mut phi = vec![0.0; width];
            for _ in 0..permutations {
                order.shuffle(&mut rng);
                let mut current = baseline.clone();
                let mut previous = base_output;
                for &j in &order {
                    current[j] = row[j];
                    let value = model.output(&current)?;
                    phi[j] += value - previous;
                    previous = value;
                }
            }
            phi.iter_mut().for_each(|p| *p /= permutations as f64);
            out.push(phi);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LogisticModel;

    #[test]
    fn test_attributions_sum_to_output_gap() -> Result<()> {
        let model = Model::Linear(LogisticModel {
            coefficients: vec![1.5, -0.5, 0.0],
            intercept: 0.2,
        });
        let rows = vec![
            FeatureVector(vec![1.0, 0.0, 3.0]),
            FeatureVector(vec![-1.0, 2.0, 1.0]),
            FeatureVector(vec![0.5, 1.0, 2.0]),
        ];
        let strategy = PermutationShapley::default();
        let attributions = strategy.attribute(&model, &rows)?;
        let baseline = model.output(&column_means(&rows))?;

        for (row, phi) in rows.iter().zip(&attributions) {
            let gap = model.output(row)? - baseline;
            assert!((phi.iter().sum::<f64>() - gap).abs() < 1e-9);
            // A zero-weight feature never moves the output.
            assert!(phi[2].abs() < 1e-12);
        }

        assert_eq!(strategy.attribute(&model, &rows)?, attributions);
        Ok(())
    }
}
