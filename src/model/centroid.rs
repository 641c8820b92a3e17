//! Nearest-centroid classifier. Hard labels only.

use crate::error::{RenewalError, Result};
use crate::transform::FeatureVector;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearestCentroid {
    negative: Vec<f64>,
    positive: Vec<f64>,
}

fn centroid(x: &[FeatureVector], y: &[u8], class: u8) -> Option<Vec<f64>> {
    let members: Vec<&FeatureVector> = x.iter().zip(y).filter(|&(_, &t)| t == class).map(|(r, _)| r).collect();
    let first = members.first()?;
    let mut sum = vec![0.0; first.len()];
    for row in &members {
        for (s, v) in sum.iter_mut().zip(row.iter()) {
            *s += v;
        }
    }
    let n = members.len() as f64;
    Some(sum.into_iter().map(|s| s / n).collect())
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum()
}

impl NearestCentroid {
    /// Centroids of both classes.
    ///
    /// # Errors
    ///
    /// Returns `Training` when either class has no rows.
    pub fn fit(x: &[FeatureVector], y: &[u8]) -> Result<Self> {
        let missing = |class| RenewalError::Training(format!("No training rows of class {class}"));
        Ok(Self {
            negative: centroid(x, y, 0).ok_or_else(|| missing(0))?,
            positive: centroid(x, y, 1).ok_or_else(|| missing(1))?,
        })
    }

    pub fn n_features(&self) -> usize {
        self.positive.len()
    }

    /// Ties go to the negative class.
    pub fn label(&self, x: &[f64]) -> u8 {
        u8::from(squared_distance(x, &self.positive) < squared_distance(x, &self.negative))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nearest_centroid_labels() -> Result<()> {
        let x = vec![
            FeatureVector(vec![0.0, 0.0]),
            FeatureVector(vec![1.0, 0.0]),
            FeatureVector(vec![9.0, 9.0]),
            FeatureVector(vec![10.0, 9.0]),
        ];
        let model = NearestCentroid::fit(&x, &[0, 0, 1, 1])?;
        assert_eq!(model.label(&[8.0, 8.0]), 1);
        assert_eq!(model.label(&[2.0, 1.0]), 0);
        Ok(())
    }

    #[test]
    fn test_single_class_fails() {
        let x = vec![FeatureVector(vec![0.0])];
        assert!(NearestCentroid::fit(&x, &[1]).is_err());
    }
}
