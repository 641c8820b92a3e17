//! Model families and the capability-checked predict contract.
//!
//! [`Model`] is a closed set of families. Each variant declares fixed
//! [`Capabilities`]; everything downstream (inference, importance
//! extraction, rule extraction) dispatches on those with a `match` instead
//! of probing at runtime.
//!
//! | Family | probability | native importance | coefficients | single tree |
//! |--------|:-:|:-:|:-:|:-:|
//! | `linear` | yes | | yes | |
//! | `tree` | yes | yes | | yes |
//! | `forest` | yes | yes | | |
//! | `boosted` | yes | yes | | |
//! | `centroid` | | | | |

pub mod boosting;
pub mod centroid;
pub mod forest;
pub mod linear;
pub mod tree;

pub use boosting::{BoostingParams, GradientBoosted};
pub use centroid::NearestCentroid;
pub use forest::RandomForest;
pub use linear::LogisticModel;
pub use tree::{DecisionTree, TreeNode, TreeParams};

use crate::error::{RenewalError, Result};
use crate::metrics::QualityMetrics;
use crate::transform::FeatureTransformer;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    Linear,
    DecisionTree,
    RandomForest,
    GradientBoosted,
    NearestCentroid,
}

impl ModelFamily {
    pub const ALL: [Self; 5] = [
        Self::Linear,
        Self::DecisionTree,
        Self::RandomForest,
        Self::GradientBoosted,
        Self::NearestCentroid,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Linear => "linear",
            Self::DecisionTree => "tree",
            Self::RandomForest => "forest",
            Self::GradientBoosted => "boosted",
            Self::NearestCentroid => "centroid",
        }
    }

    /// Tree families consume raw numeric features; the rest expect
    /// standardized input.
    pub fn wants_scaling(self) -> bool {
        matches!(self, Self::Linear | Self::NearestCentroid)
    }

    pub fn capabilities(self) -> Capabilities {
        match self {
            Self::Linear => Capabilities {
                probability: true,
                native_importance: false,
                linear_coefficients: true,
                tree_structured: false,
            },
            Self::DecisionTree => Capabilities {
                probability: true,
                native_importance: true,
                linear_coefficients: false,
                tree_structured: true,
            },
            Self::RandomForest | Self::GradientBoosted => Capabilities {
                probability: true,
                native_importance: true,
                linear_coefficients: false,
                tree_structured: false,
            },
            Self::NearestCentroid => Capabilities::default(),
        }
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelFamily {
    type Err = RenewalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "linear" | "logistic" => Ok(Self::Linear),
            "tree" | "decision_tree" => Ok(Self::DecisionTree),
            "forest" | "random_forest" => Ok(Self::RandomForest),
            "boosted" | "gradient_boosted" => Ok(Self::GradientBoosted),
            "centroid" | "nearest_centroid" => Ok(Self::NearestCentroid),
            other => Err(RenewalError::Config(format!("Unknown model family '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub probability: bool,
    pub native_importance: bool,
    pub linear_coefficients: bool,
    pub tree_structured: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// A real positive-class probability.
    Exact,
    /// Hard label collapsed to 0.0 / 1.0.
    Degraded,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub probability: f64,
    pub label: u8,
    pub confidence: Confidence,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum Model {
    Linear(LogisticModel),
    DecisionTree(DecisionTree),
    RandomForest(RandomForest),
    GradientBoosted(GradientBoosted),
    NearestCentroid(NearestCentroid),
}

impl Model {
    pub fn family(&self) -> ModelFamily {
        match self {
            Self::Linear(_) => ModelFamily::Linear,
            Self::DecisionTree(_) => ModelFamily::DecisionTree,
            Self::RandomForest(_) => ModelFamily::RandomForest,
            Self::GradientBoosted(_) => ModelFamily::GradientBoosted,
            Self::NearestCentroid(_) => ModelFamily::NearestCentroid,
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        self.family().capabilities()
    }

    pub fn n_features(&self) -> usize {
        match self {
            Self::Linear(m) => m.coefficients.len(),
            Self::DecisionTree(m) => m.n_features(),
            Self::RandomForest(m) => m.n_features(),
            Self::GradientBoosted(m) => m.n_features(),
            Self::NearestCentroid(m) => m.n_features(),
        }
    }

    /// Raw model output: positive-class probability, or the hard label as
    /// 0.0 / 1.0 for families without probabilities. Attribution works on
    /// this value.
    ///
    /// # Errors
    ///
    /// Returns `PredictionFailure` for a vector of the wrong width or with
    /// non-finite entries.
    pub fn output(&self, features: &[f64]) -> Result<f64> {
        if features.len() != self.n_features() {
            return Err(RenewalError::PredictionFailure(format!(
                "Model expects {} features, received {}",
                self.n_features(),
                features.len()
            )));
        }
        if features.iter().any(|v| !v.is_finite()) {
            return Err(RenewalError::PredictionFailure(
                "Feature vector contains non-finite values".to_owned(),
            ));
        }

        let value = match self {
            Self::Linear(m) => m.probability(features),
            Self::DecisionTree(m) => m.probability(features),
            Self::RandomForest(m) => m.probability(features),
            Self::GradientBoosted(m) => m.probability(features),
            Self::NearestCentroid(m) => f64::from(m.label(features)),
        };
        Ok(value)
    }

    /// `label = 1` iff `probability >= threshold`.
    ///
    /// # Errors
    ///
    /// See [`Model::output`].
    pub fn predict(&self, features: &[f64], threshold: f64) -> Result<PredictionResult> {
        let probability = self.output(features)?;
        let confidence = if self.capabilities().probability {
            Confidence::Exact
        } else {
            Confidence::Degraded
        };
        Ok(PredictionResult {
            probability,
            label: u8::from(probability >= threshold),
            confidence,
        })
    }

    pub fn native_importance(&self) -> Option<Vec<f64>> {
        match self {
            Self::DecisionTree(m) => Some(m.importances()),
            Self::RandomForest(m) => Some(m.importances()),
            Self::GradientBoosted(m) => Some(m.importances()),
            Self::Linear(_) | Self::NearestCentroid(_) => None,
        }
    }

    pub fn coefficients(&self) -> Option<&[f64]> {
        match self {
            Self::Linear(m) => Some(&m.coefficients),
            _ => None,
        }
    }

    pub fn as_tree(&self) -> Option<&DecisionTree> {
        match self {
            Self::DecisionTree(m) => Some(m),
            _ => None,
        }
    }
}

/// A persisted model plus the metadata needed to serve it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub feature_names: Vec<String>,
    /// `fitted_at` of the transformer this model was trained against.
    /// Serving refuses to pair the model with any other transformer.
    #[serde(default)]
    pub transformer_fitted_at: Option<DateTime<Utc>>,
    pub metrics: Option<QualityMetrics>,
    pub model: Model,
}

impl ModelArtifact {
    pub fn new(model: Model, feature_names: Vec<String>, metrics: Option<QualityMetrics>) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            feature_names,
            transformer_fitted_at: None,
            metrics,
            model,
        }
    }

    /// An artifact bound to the transformer its features came from.
    pub fn for_transformer(model: Model, transformer: &FeatureTransformer, metrics: Option<QualityMetrics>) -> Self {
        Self {
            transformer_fitted_at: Some(transformer.fitted_at()),
            ..Self::new(model, transformer.feature_names(), metrics)
        }
    }

    pub fn family(&self) -> ModelFamily {
        self.model.family()
    }

    /// # Errors
    ///
    /// Returns the serialization error.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// # Errors
    ///
    /// Returns `CorruptArtifact` when the feature names do not match the
    /// model's width, or the JSON error when it does not parse.
    pub fn from_json(json: &str) -> Result<Self> {
        let artifact: Self = serde_json::from_str(json)?;
        if artifact.feature_names.len() != artifact.model.n_features() {
            return Err(RenewalError::CorruptArtifact(format!(
                "Model artifact lists {} feature names but the model expects {}",
                artifact.feature_names.len(),
                artifact.model.n_features()
            )));
        }
        Ok(artifact)
    }
}
