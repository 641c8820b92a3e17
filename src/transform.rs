//! Feature transformation between raw records and model input.
//!
//! A [`FeatureTransformer`] is fit once on a training set and then applied,
//! unchanged, to every batch and single-record request. The fitted state
//! (imputation values, scaling parameters, category vocabularies) is
//! serialized alongside the model so serving encodes records exactly the
//! way training did.
//!
//! ## Encoding rules
//!
//! - Numeric columns: missing cells take the fit-time median, then are
//!   standardized (linear families) or passed through raw (tree families).
//! - Categorical columns: one indicator per vocabulary value, named
//!   `column=value`. A value never seen at fit time encodes as all zeros.
//! - Temporal columns: replaced by `column_year` and `column_month`, each
//!   handled like a numeric column.
//!
//! ```no_run
//! use renewal::data::{Dataset, RawColumn};
//! use renewal::transform::{FeatureTransformer, TransformOptions};
//!
//! # fn main() -> renewal::error::Result<()> {
//! let training = Dataset::new(vec![
//!     RawColumn::numbers("age", &[20.0, 30.0, 40.0]),
//!     RawColumn::texts("income_level", &["high", "low", "high"]),
//! ])?;
//! let transformer = FeatureTransformer::fit(&training, &TransformOptions::default())?;
//! assert_eq!(transformer.feature_names(), ["age", "income_level=high", "income_level=low"]);
//! # Ok(())
//! # }
//! ```

use crate::data::schema::{self, SemanticType};
use crate::data::{Dataset, RawValue};
use crate::error::{RenewalError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::ops::Deref;

/// Options controlling a fit.
#[derive(Debug, Clone, Default)]
pub struct TransformOptions {
    /// Standardize numeric and derived temporal features.
    pub scale_numeric: bool,
    /// Columns never encoded (identifiers, the label).
    pub excluded_columns: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Scaling {
    pub mean: f64,
    pub std_dev: f64,
}

impl Scaling {
    pub fn scale(&self, raw: f64) -> f64 {
        (raw - self.mean) / self.std_dev
    }

    pub fn unscale(&self, encoded: f64) -> f64 {
        encoded * self.std_dev + self.mean
    }
}

/// Fitted state of one numeric (or derived temporal) feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericState {
    pub impute: f64,
    pub scaling: Option<Scaling>,
}

impl NumericState {
    fn fit(values: &[Option<f64>], scale: bool) -> Self {
        let observed: Vec<f64> = values.iter().flatten().copied().collect();
        let impute = median(&observed).unwrap_or(0.0);
        let scaling = scale.then(|| {
            // Statistics over the imputed column, matching what apply sees.
            let filled: Vec<f64> = values.iter().map(|v| v.unwrap_or(impute)).collect();
            let n = filled.len().max(1) as f64;
            let mean = filled.iter().sum::<f64>() / n;
            let var = filled.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
            let std_dev = var.sqrt();
            Scaling {
                mean,
                std_dev: if std_dev > f64::EPSILON { std_dev } else { 1.0 },
            }
        });
        Self { impute, scaling }
    }

    fn encode(&self, raw: Option<f64>) -> f64 {
        let value = raw.unwrap_or(self.impute);
        match &self.scaling {
            Some(s) => s.scale(value),
            None => value,
        }
    }
}

fn median(values: &[f64]) -> Option<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    let upper = *sorted.get(mid)?;
    if sorted.len() % 2 == 0 {
        let lower = *sorted.get(mid - 1)?;
        Some((lower + upper) / 2.0)
    } else {
        Some(upper)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ColumnEncoding {
    Numeric {
        state: NumericState,
    },
    Categorical {
        vocabulary: Vec<String>,
        /// Most frequent fit-time value, used for missing cells.
        fallback: Option<String>,
    },
    Temporal {
        year: NumericState,
        month: NumericState,
    },
}

/// Fitted encoding for one raw column. Immutable once fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub encoding: ColumnEncoding,
}

impl ColumnSpec {
    pub fn semantic(&self) -> SemanticType {
        match self.encoding {
            ColumnEncoding::Numeric { .. } => SemanticType::Numeric,
            ColumnEncoding::Categorical { .. } => SemanticType::Categorical,
            ColumnEncoding::Temporal { .. } => SemanticType::Temporal,
        }
    }

    pub fn width(&self) -> usize {
        match &self.encoding {
            ColumnEncoding::Numeric { .. } => 1,
            ColumnEncoding::Categorical { vocabulary, .. } => vocabulary.len(),
            ColumnEncoding::Temporal { .. } => 2,
        }
    }

    fn fit(name: &str, semantic: SemanticType, values: &[RawValue], scale: bool) -> Self {
        let encoding = match semantic {
            SemanticType::Numeric => {
                let numbers: Vec<Option<f64>> = values
                    .iter()
                    .map(|v| match v {
                        RawValue::Number(n) if !n.is_nan() => Some(*n),
                        _ => None,
                    })
                    .collect();
                ColumnEncoding::Numeric {
                    state: NumericState::fit(&numbers, scale),
                }
            }
            SemanticType::Categorical => {
                let mut counts: BTreeMap<String, usize> = BTreeMap::new();
                for key in values.iter().filter_map(RawValue::category_key) {
                    *counts.entry(key).or_default() += 1;
                }
                let mut fallback: Option<(&String, usize)> = None;
                for (value, &count) in &counts {
                    if fallback.is_none_or(|(_, best)| count > best) {
                        fallback = Some((value, count));
                    }
                }
                let fallback = fallback.map(|(v, _)| v.clone());
                ColumnEncoding::Categorical {
                    vocabulary: counts.into_keys().collect(),
                    fallback,
                }
            }
            SemanticType::Temporal => {
                let (years, months): (Vec<Option<f64>>, Vec<Option<f64>>) = values
                    .iter()
                    .map(|v| {
                        let parts = v.year_month();
                        (parts.map(|(y, _)| y), parts.map(|(_, m)| m))
                    })
                    .unzip();
                ColumnEncoding::Temporal {
                    year: NumericState::fit(&years, scale),
                    month: NumericState::fit(&months, scale),
                }
            }
        };
        Self {
            name: name.to_owned(),
            encoding,
        }
    }

    fn encode_into(&self, row: usize, value: &RawValue, out: &mut Vec<f64>) -> Result<()> {
        let invalid = |expected: &str| RenewalError::InvalidRecord {
            row,
            column: self.name.clone(),
            reason: format!("expected {expected}, found {}", value.type_name()),
        };

        match &self.encoding {
            ColumnEncoding::Numeric { state } => {
                let raw = match value {
                    RawValue::Number(n) if !n.is_nan() => Some(*n),
                    RawValue::Number(_) | RawValue::Missing => None,
                    RawValue::Text(_) | RawValue::Date(_) => return Err(invalid("a number")),
                };
                out.push(state.encode(raw));
            }
            ColumnEncoding::Categorical {
                vocabulary,
                fallback,
            } => {
                let key = value.category_key().or_else(|| fallback.clone());
                let hit = key
                    .as_deref()
                    .and_then(|k| vocabulary.binary_search_by(|v| v.as_str().cmp(k)).ok());
                out.extend((0..vocabulary.len()).map(|i| if Some(i) == hit { 1.0 } else { 0.0 }));
            }
            ColumnEncoding::Temporal { year, month } => {
                let parts = match value {
                    RawValue::Date(_) => value.year_month(),
                    RawValue::Missing => None,
                    RawValue::Number(n) if n.is_nan() => None,
                    RawValue::Number(_) | RawValue::Text(_) => return Err(invalid("a date")),
                };
                out.push(year.encode(parts.map(|(y, _)| y)));
                out.push(month.encode(parts.map(|(_, m)| m)));
            }
        }
        Ok(())
    }
}

/// Fixed-width encoded record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector(pub Vec<f64>);

impl From<Vec<f64>> for FeatureVector {
    fn from(values: Vec<f64>) -> Self {
        Self(values)
    }
}

impl Deref for FeatureVector {
    type Target = [f64];

    fn deref(&self) -> &[f64] {
        &self.0
    }
}

/// Semantic origin of one encoded column.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureOrigin {
    /// A numeric value (raw, or a derived year/month).
    Numeric {
        feature: String,
        scaling: Option<Scaling>,
    },
    /// One indicator of a categorical block.
    Indicator { feature: String, value: String },
}

impl FeatureOrigin {
    pub fn feature(&self) -> &str {
        match self {
            Self::Numeric { feature, .. } | Self::Indicator { feature, .. } => feature,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureTransformer {
    columns: Vec<ColumnSpec>,
    output_width: usize,
    excluded_columns: Vec<String>,
    fitted_at: DateTime<Utc>,
    scaled: bool,
}

impl FeatureTransformer {
    /// Learn imputation, scaling and vocabularies from `dataset`.
    ///
    /// # Errors
    ///
    /// Returns `DataProcessing` when no feature column is left after the exclusions.
    pub fn fit(dataset: &Dataset, options: &TransformOptions) -> Result<Self> {
        let schema = schema::classify(dataset, &options.excluded_columns);
        if schema.is_empty() {
            return Err(RenewalError::DataProcessing(
                "No feature columns left after excluding identifiers and label".to_owned(),
            ));
        }

        let columns: Vec<ColumnSpec> = schema
            .iter()
            .filter_map(|ct| {
                dataset.column(&ct.name).map(|raw| {
                    ColumnSpec::fit(&ct.name, ct.semantic, &raw.values, options.scale_numeric)
                })
            })
            .collect();
        let output_width = columns.iter().map(ColumnSpec::width).sum();

        tracing::debug!(
            columns = columns.len(),
            output_width,
            scaled = options.scale_numeric,
            "Fitted feature transformer"
        );

        Ok(Self {
            columns,
            output_width,
            excluded_columns: options.excluded_columns.clone(),
            fitted_at: Utc::now(),
            scaled: options.scale_numeric,
        })
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    pub fn output_width(&self) -> usize {
        self.output_width
    }

    pub fn fitted_at(&self) -> DateTime<Utc> {
        self.fitted_at
    }

    pub fn is_scaled(&self) -> bool {
        self.scaled
    }

    pub fn excluded_columns(&self) -> &[String] {
        &self.excluded_columns
    }

    /// Compare a dataset's feature columns with the fit-time schema.
    ///
    /// # Errors
    ///
    /// Returns `SchemaMismatch` listing the missing and unexpected columns.
    pub fn check_schema(&self, dataset: &Dataset) -> Result<()> {
        let present: HashSet<&str> = dataset.column_names().into_iter().collect();
        let expected: HashSet<&str> = self.columns.iter().map(|c| c.name.as_str()).collect();

        let missing: Vec<String> = self
            .columns
            .iter()
            .filter(|c| !present.contains(c.name.as_str()))
            .map(|c| c.name.clone())
            .collect();
        let unexpected: Vec<String> = dataset
            .column_names()
            .into_iter()
            .filter(|n| !expected.contains(n) && !self.excluded_columns.iter().any(|e| e == n))
            .map(str::to_owned)
            .collect();

        if missing.is_empty() && unexpected.is_empty() {
            Ok(())
        } else {
            Err(RenewalError::SchemaMismatch {
                missing,
                unexpected,
            })
        }
    }

    /// Encode every row. The first invalid row fails the whole call.
    ///
    /// # Errors
    ///
    /// Returns `SchemaMismatch`, or the first row's `InvalidRecord`.
    pub fn apply(&self, dataset: &Dataset) -> Result<Vec<FeatureVector>> {
        self.apply_rows(dataset)?.into_iter().collect()
    }

    /// Encode every row, reporting per-row failures individually. Only a
    /// schema mismatch fails the call as a whole.
    ///
    /// # Errors
    ///
    /// Returns `SchemaMismatch` when the columns differ from the fit-time schema.
    pub fn apply_rows(&self, dataset: &Dataset) -> Result<Vec<Result<FeatureVector>>> {
        self.check_schema(dataset)?;

        let raw_columns: Vec<&[RawValue]> = self
            .columns
            .iter()
            .filter_map(|spec| dataset.column(&spec.name).map(|c| c.values.as_slice()))
            .collect();

        Ok((0..dataset.height())
            .map(|row| {
                let mut out = Vec::with_capacity(self.output_width);
                for (spec, values) in self.columns.iter().zip(&raw_columns) {
                    let value = values.get(row).unwrap_or(&RawValue::Missing);
                    spec.encode_into(row, value, &mut out)?;
                }
                Ok(FeatureVector(out))
            })
            .collect())
    }

    pub fn feature_names(&self) -> Vec<String> {
        self.origins()
            .into_iter()
            .map(|origin| match origin {
                FeatureOrigin::Numeric { feature, .. } => feature,
                FeatureOrigin::Indicator { feature, value } => format!("{feature}={value}"),
            })
            .collect()
    }

    /// Semantic origin of every encoded column, in output order.
    pub fn origins(&self) -> Vec<FeatureOrigin> {
        let mut origins = Vec::with_capacity(self.output_width);
        for spec in &self.columns {
            match &spec.encoding {
                ColumnEncoding::Numeric { state } => origins.push(FeatureOrigin::Numeric {
                    feature: spec.name.clone(),
                    scaling: state.scaling,
                }),
                ColumnEncoding::Categorical { vocabulary, .. } => {
                    origins.extend(vocabulary.iter().map(|value| FeatureOrigin::Indicator {
                        feature: spec.name.clone(),
                        value: value.clone(),
                    }));
                }
                ColumnEncoding::Temporal { year, month } => {
                    origins.push(FeatureOrigin::Numeric {
                        feature: format!("{}_year", spec.name),
                        scaling: year.scaling,
                    });
                    origins.push(FeatureOrigin::Numeric {
                        feature: format!("{}_month", spec.name),
                        scaling: month.scaling,
                    });
                }
            }
        }
        origins
    }

    pub fn origin(&self, index: usize) -> Option<FeatureOrigin> {
        self.origins().into_iter().nth(index)
    }

    /// # Errors
    ///
    /// Returns the serialization error.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse and validate a persisted transformer.
    ///
    /// # Errors
    ///
    /// Returns the JSON error, or `CorruptArtifact` when the encodings are inconsistent.
    pub fn from_json(json: &str) -> Result<Self> {
        let transformer: Self = serde_json::from_str(json)?;
        transformer.validate()?;
        Ok(transformer)
    }

    fn validate(&self) -> Result<()> {
        let implied: usize = self.columns.iter().map(ColumnSpec::width).sum();
        if implied != self.output_width {
            return Err(RenewalError::CorruptArtifact(format!(
                "Transformer declares width {} but its columns encode {implied}",
                self.output_width
            )));
        }
        for spec in &self.columns {
            if let ColumnEncoding::Categorical { vocabulary, .. } = &spec.encoding
                && !vocabulary.is_sorted_by(|a, b| a < b)
            {
                return Err(RenewalError::CorruptArtifact(format!(
                    "Vocabulary of '{}' is not sorted and unique",
                    spec.name
                )));
            }
        }
        Ok(())
    }
}
