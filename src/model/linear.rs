//! Logistic regression via linfa.

use super::boosting::sigmoid;
use crate::error::{RenewalError, Result};
use crate::transform::FeatureVector;
use linfa::prelude::*;
use linfa_logistic::LogisticRegression;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticModel {
    /// One signed weight per encoded feature; positive promotes renewal.
    pub coefficients: Vec<f64>,
    pub intercept: f64,
}

impl LogisticModel {
    /// Fit through linfa's logistic regression.
    ///
    /// # Errors
    ///
    /// Returns `Training` when the rows are ragged or linfa fails to fit.
    pub fn fit(x: &[FeatureVector], y: &[u8], max_iterations: u64) -> Result<Self> {
        let n_features = x.first().map_or(0, |r| r.len());
        let flat: Vec<f64> = x.iter().flat_map(|r| r.iter().copied()).collect();
        let records = Array2::from_shape_vec((x.len(), n_features), flat)
            .map_err(|e| RenewalError::Training(format!("Failed to build feature matrix: {e}")))?;
        let targets: Array1<usize> = y.iter().map(|&v| usize::from(v)).collect();

        let dataset = Dataset::new(records, targets);
        let fitted = LogisticRegression::default()
            .max_iterations(max_iterations)
            .fit(&dataset)
            .map_err(|e| RenewalError::Training(format!("Logistic Regression training failed: {e}")))?;

        let mut model = Self {
            coefficients: fitted.params().to_vec(),
            intercept: fitted.intercept(),
        };

        // linfa picks its own positive label; flip so class 1 scores high.
        let mean_for = |class: u8| {
            let probs: Vec<f64> = x
                .iter()
                .zip(y)
                .filter(|&(_, &t)| t == class)
                .map(|(row, _)| model.probability(row))
                .collect();
            probs.iter().sum::<f64>() / probs.len().max(1) as f64
        };
        if mean_for(1) < mean_for(0) {
            model.coefficients.iter_mut().for_each(|c| *c = -*c);
            model.intercept = -model.intercept;
        }

        Ok(model)
    }

    pub fn decision_function(&self, x: &[f64]) -> f64 {
        self.intercept
            + self
                .coefficients
                .iter()
                .zip(x)
                .map(|(w, v)| w * v)
                .sum::<f64>()
    }

    pub fn probability(&self, x: &[f64]) -> f64 {
        sigmoid(self.decision_function(x))
    }
}
