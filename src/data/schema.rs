//! Schema profiling: classify each input column as numeric, categorical
//! or temporal.
//!
//! Classification is driven by the observed values, not by column names.
//! A column whose non-missing values are all numbers is numeric, all
//! dates is temporal, and everything else (free text, mixed types,
//! booleans, all-missing columns) is categorical.

use super::{Dataset, RawColumn, RawValue};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SemanticType {
    Numeric,
    Categorical,
    Temporal,
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric => write!(f, "numeric"),
            Self::Categorical => write!(f, "categorical"),
            Self::Temporal => write!(f, "temporal"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnType {
    pub name: String,
    pub semantic: SemanticType,
}

/// Ordered classification of a dataset's columns.
pub type Schema = Vec<ColumnType>;

pub fn classify_column(column: &RawColumn) -> SemanticType {
    let mut numbers = 0usize;
    let mut dates = 0usize;
    let mut other = 0usize;
    for value in &column.values {
        match value {
            RawValue::Missing => {}
            RawValue::Number(n) if n.is_nan() => {}
            RawValue::Number(_) => numbers += 1,
            RawValue::Date(_) => dates += 1,
            RawValue::Text(_) => other += 1,
        }
    }

    match (numbers, dates, other) {
        (n, 0, 0) if n > 0 => SemanticType::Numeric,
        (0, d, 0) if d > 0 => SemanticType::Temporal,
        _ => SemanticType::Categorical,
    }
}

/// Classify every column except the excluded ones, keeping input order.
pub fn classify(dataset: &Dataset, exclude: &[String]) -> Schema {
    dataset
        .columns()
        .iter()
        .filter(|c| !exclude.iter().any(|e| e == &c.name))
        .map(|c| ColumnType {
            name: c.name.clone(),
            semantic: classify_column(c),
        })
        .collect()
}

/// Per-column summary shown by the `profile` command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnProfile {
    pub name: String,
    pub semantic: SemanticType,
    pub count: usize,
    pub missing: usize,
    pub distinct: usize,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl ColumnProfile {
    pub fn missing_pct(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.missing as f64 / self.count as f64 * 100.0
        }
    }
}

pub fn profile(dataset: &Dataset) -> Vec<ColumnProfile> {
    dataset
        .columns()
        .iter()
        .map(|c| {
            let semantic = classify_column(c);
            let distinct: HashSet<String> = c.values.iter().filter_map(RawValue::category_key).collect();
            let numbers = c.values.iter().filter_map(|v| match v {
                RawValue::Number(n) if !n.is_nan() => Some(*n),
                _ => None,
            });
            let (min, max) = numbers.fold((None, None), |(lo, hi): (Option<f64>, Option<f64>), n| {
                (
                    Some(lo.map_or(n, |l| l.min(n))),
                    Some(hi.map_or(n, |h| h.max(n))),
                )
            });
            ColumnProfile {
                name: c.name.clone(),
                semantic,
                count: c.values.len(),
                missing: c.missing_count(),
                distinct: distinct.len(),
                min,
                max,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> RawValue {
        RawValue::Date(NaiveDate::from_ymd_opt(y, m, d).expect("valid date"))
    }

    #[test]
    fn test_classification_by_values() -> Result<()> {
        let ds = Dataset::new(vec![
            RawColumn::new("age", vec![RawValue::Number(30.0), RawValue::Missing]),
            RawColumn::texts("region", &["north", "south"]),
            RawColumn::new("start", vec![date(2020, 1, 1), RawValue::Missing]),
            RawColumn::new(
                "mixed",
                vec![RawValue::Number(1.0), RawValue::Text("x".to_owned())],
            ),
            RawColumn::new("blank", vec![RawValue::Missing, RawValue::Missing]),
        ])?;

        let schema = classify(&ds, &[]);
        let kinds: Vec<SemanticType> = schema.iter().map(|c| c.semantic).collect();
        assert_eq!(
            kinds,
            vec![
                SemanticType::Numeric,
                SemanticType::Categorical,
                SemanticType::Temporal,
                SemanticType::Categorical,
                SemanticType::Categorical,
            ]
        );
        Ok(())
    }

    #[test]
    fn test_classify_respects_exclusions() -> Result<()> {
        let ds = Dataset::new(vec![
            RawColumn::texts("CustomerID", &["c1", "c2"]),
            RawColumn::numbers("age", &[30.0, 40.0]),
        ])?;
        let schema = classify(&ds, &["CustomerID".to_owned()]);
        assert_eq!(schema.len(), 1);
        assert_eq!(schema[0].name, "age");
        Ok(())
    }

    #[test]
    fn test_profile_counts() -> Result<()> {
        let ds = Dataset::new(vec![RawColumn::new(
            "premium",
            vec![
                RawValue::Number(100.0),
                RawValue::Missing,
                RawValue::Number(250.0),
                RawValue::Number(100.0),
            ],
        )])?;
        let profiles = profile(&ds);
        assert_eq!(profiles[0].missing, 1);
        assert_eq!(profiles[0].distinct, 2);
        assert_eq!(profiles[0].min, Some(100.0));
        assert_eq!(profiles[0].max, Some(250.0));
        assert!((profiles[0].missing_pct() - 25.0).abs() < 1e-9);
        Ok(())
    }
}
