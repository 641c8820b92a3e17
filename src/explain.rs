//! Feature importance across model families.
//!
//! [`Explainer::importance`] tries, in order:
//!
//! 1. native impurity-decrease importances (tree families),
//! 2. signed linear coefficients,
//! 3. mean absolute additive attribution over a caller-supplied sample,
//!    computed by the injected [`AttributionStrategy`].
//!
//! When none applies the ranking is empty. Entries are always sorted by
//! descending `|score|`, ties kept in feature declaration order.

pub mod attribution;

pub use attribution::{AttributionStrategy, PermutationShapley};

use crate::model::Model;
use crate::transform::FeatureVector;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportanceMethod {
    Native,
    Coefficients,
    Attribution,
}

impl fmt::Display for ImportanceMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Native => write!(f, "native importance"),
            Self::Coefficients => write!(f, "linear coefficients"),
            Self::Attribution => write!(f, "additive attribution"),
        }
    }
}

/// Direction a feature pushes the renewal probability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    Promotes,
    Inhibits,
    /// Direction not known (impurity importances).
    Neutral,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportanceEntry {
    pub feature: String,
    pub score: f64,
    /// 1-based position in the ranking.
    pub rank: usize,
    pub effect: Effect,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Importance {
    pub method: Option<ImportanceMethod>,
    pub entries: Vec<ImportanceEntry>,
}

impl Importance {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn ranked(method: ImportanceMethod, names: &[String], scored: Vec<(f64, Effect)>) -> Self {
        let mut entries: Vec<ImportanceEntry> = scored
            .into_iter()
            .enumerate()
            .map(|(i, (score, effect))| ImportanceEntry {
                feature: names
                    .get(i)
                    .cloned()
                    .unwrap_or_else(|| format!("feature_{i}")),
                score,
                rank: 0,
                effect,
            })
            .collect();
        entries.sort_by(|a, b| b.score.abs().total_cmp(&a.score.abs()));
        for (i, entry) in entries.iter_mut().enumerate() {
            entry.rank = i + 1;
        }
        Self {
            method: Some(method),
            entries,
        }
    }

    /// Plain-language summary of the top drivers.
    pub fn describe(&self, top: usize) -> Vec<String> {
        let Some(method) = self.method else {
            return vec!["No feature importance is available for this model.".to_owned()];
        };

        let mut lines = Vec::new();
        for entry in self.entries.iter().take(top) {
            let name = &entry.feature;
            let line = match (method, entry.effect) {
                (ImportanceMethod::Coefficients | ImportanceMethod::Attribution, Effect::Promotes) => {
                    format!("Primary Driver: A higher '{name}' usually leads to an increase in renewal likelihood.")
                }
                (ImportanceMethod::Coefficients | ImportanceMethod::Attribution, Effect::Inhibits) => {
                    format!("Primary Driver: A higher '{name}' usually leads to a decrease in renewal likelihood.")
                }
                (ImportanceMethod::Native, _) => {
                    let pct = entry.score * 100.0;
                    format!("'{name}' accounts for {pct:.1}% of the model's splitting decisions.")
                }
                (_, Effect::Neutral) => format!("'{name}' has no consistent effect on renewal."),
            };
            lines.push(line);
        }
        lines
    }
}

fn sign_effect(value: f64) -> Effect {
    if value > 0.0 {
        Effect::Promotes
    } else if value < 0.0 {
        Effect::Inhibits
    } else {
        Effect::Neutral
    }
}

/// Importance extraction with an optional attribution fallback.
pub struct Explainer {
    attribution: Option<Box<dyn AttributionStrategy>>,
    /// Cap on sample rows fed to the attribution strategy.
    max_sample_rows: usize,
}

impl Default for Explainer {
    fn default() -> Self {
        Self::with_attribution(Box::new(PermutationShapley::default()))
    }
}

impl fmt::Debug for Explainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Explainer")
            .field("attribution", &self.attribution.as_ref().map(|a| a.name()))
            .field("max_sample_rows", &self.max_sample_rows)
            .finish()
    }
}

impl Explainer {
    pub fn with_attribution(strategy: Box<dyn AttributionStrategy>) -> Self {
        Self {
            attribution: Some(strategy),
            max_sample_rows: 200,
        }
    }

    pub fn without_attribution() -> Self {
        Self {
            attribution: None,
            max_sample_rows: 0,
        }
    }

    pub fn max_sample_rows(mut self, rows: usize) -> Self {
        self.max_sample_rows = rows;
        self
    }

    pub fn importance(
        &self,
        model: &Model,
        feature_names: &[String],
        sample: Option<&[FeatureVector]>,
    ) -> Importance {
        if let Some(scores) = model.native_importance() {
            let scored = scores.into_iter().map(|s| (s, Effect::Neutral)).collect();
            return Importance::ranked(ImportanceMethod::Native, feature_names, scored);
        }

        if let Some(coefficients) = model.coefficients() {
            let scored = coefficients.iter().map(|&c| (c, sign_effect(c))).collect();
            return Importance::ranked(ImportanceMethod::Coefficients, feature_names, scored);
        }

        let (Some(strategy), Some(sample)) = (&self.attribution, sample) else {
            return Importance::default();
        };
        let sample = sample.get(..sample.len().min(self.max_sample_rows)).unwrap_or_default();
        if sample.is_empty() {
            return Importance::default();
        }

        match strategy.attribute(model, sample) {
            Ok(attributions) => {
                let width = model.n_features();
                let n = attributions.len() as f64;
                let mut mean_abs = vec![0.0; width];
                let mut mean_signed = vec![0.0; width];
                for row in &attributions {
                    for ((abs, signed), &a) in mean_abs.iter_mut().zip(mean_signed.iter_mut()).zip(row) {
                        *abs += a.abs() / n;
                        *signed += a / n;
                    }
                }
                let scored = mean_abs
                    .into_iter()
                    .zip(mean_signed)
                    .map(|(score, signed)| (score, sign_effect(signed)))
                    .collect();
                Importance::ranked(ImportanceMethod::Attribution, feature_names, scored)
            }
            Err(e) => {
                tracing::warn!(strategy = strategy.name(), error = %e, "Attribution failed");
                Importance::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{RenewalError, Result};
    use crate::model::{DecisionTree, LogisticModel, NearestCentroid, TreeParams};

    fn names(n: &[&str]) -> Vec<String> {
        n.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn test_coefficients_keep_sign_and_sort_by_magnitude() {
        let model = Model::Linear(LogisticModel {
            coefficients: vec![0.5, -2.0, 0.5, 1.0],
            intercept: 0.0,
        });
        let imp = Explainer::default().importance(&model, &names(&["a", "b", "c", "d"]), None);

        assert_eq!(imp.method, Some(ImportanceMethod::Coefficients));
        let order: Vec<&str> = imp.entries.iter().map(|e| e.feature.as_str()).collect();
        assert_eq!(order, ["b", "d", "a", "c"]);
        assert_eq!(imp.entries[0].score, -2.0);
        assert_eq!(imp.entries[0].effect, Effect::Inhibits);
        assert_eq!(imp.entries[3].rank, 4);
        assert!(imp.describe(1)[0].contains("decrease"));
    }

    #[test]
    fn test_native_importance_preferred() {
        let x = vec![
            FeatureVector(vec![1.0, 5.0]),
            FeatureVector(vec![2.0, 5.0]),
            FeatureVector(vec![3.0, 5.0]),
            FeatureVector(vec![4.0, 5.0]),
        ];
        let model = Model::DecisionTree(DecisionTree::fit(&x, &[0, 0, 1, 1], &TreeParams::default()));
        let explainer = Explainer::default();
        let imp = explainer.importance(&model, &names(&["age"]), Some(x.as_slice()));

        assert_eq!(imp.method, Some(ImportanceMethod::Native));
        assert_eq!(imp.entries[0].feature, "age");
        assert_eq!(imp.entries[1].feature, "feature_1");
        assert!((imp.entries[0].score - 1.0).abs() < 1e-12);
        assert_eq!(imp, explainer.importance(&model, &names(&["age"]), Some(x.as_slice())));
    }

    #[test]
    fn test_label_only_model_needs_sample() -> Result<()> {
        let x = vec![
            FeatureVector(vec![0.0, 1.0]),
            FeatureVector(vec![10.0, 1.0]),
            FeatureVector(vec![9.0, 1.0]),
        ];
        let model = Model::NearestCentroid(NearestCentroid::fit(&x, &[0, 1, 1])?);
        let explainer = Explainer::default();
        let feature_names = names(&["tenure", "constant"]);
        let empty: Vec<FeatureVector> = Vec::new();

        assert!(explainer.importance(&model, &feature_names, None).is_empty());
        assert!(explainer.importance(&model, &feature_names, Some(empty.as_slice())).is_empty());
        assert!(
            Explainer::without_attribution()
                .importance(&model, &feature_names, Some(x.as_slice()))
                .is_empty()
        );

        let imp = explainer.importance(&model, &feature_names, Some(x.as_slice()));
        assert_eq!(imp.method, Some(ImportanceMethod::Attribution));
        assert_eq!(imp.entries[0].feature, "tenure");
        assert_eq!(imp.entries[1].score, 0.0);
        Ok(())
    }

    struct Failing;

    impl AttributionStrategy for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn attribute(&self, _model: &Model, _rows: &[FeatureVector]) -> Result<Vec<Vec<f64>>> {
            Err(RenewalError::PredictionFailure("boom".to_owned()))
        }
    }

    #[test]
    fn test_attribution_failure_yields_empty_ranking() -> Result<()> {
        let x = vec![FeatureVector(vec![0.0]), FeatureVector(vec![1.0])];
        let model = Model::NearestCentroid(NearestCentroid::fit(&x, &[0, 1])?);
        let imp = Explainer::with_attribution(Box::new(Failing)).importance(&model, &names(&["x"]), Some(x.as_slice()));
        assert!(imp.is_empty());
        assert_eq!(imp.describe(3).len(), 1);
        Ok(())
    }
}
