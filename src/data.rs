//! In-memory raw datasets.
//!
//! Uploads are read through Polars (see [`io`]) and converted into a
//! [`Dataset`] of [`RawValue`] cells. Keeping the raw representation
//! independent of Polars lets single-record requests, batch uploads and
//! training sets flow through the same transformer code.

pub mod io;
pub mod schema;

use crate::error::{RenewalError, Result};
use chrono::{Datelike as _, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A single raw cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RawValue {
    Missing,
    Number(f64),
    Text(String),
    Date(NaiveDate),
}

impl RawValue {
    /// Best-effort coercion of a form field, used by the calling layer
    /// before a record reaches the transformer. Empty input is missing,
    /// then number, then ISO date, otherwise text.
    pub fn coerce(input: &str) -> Self {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Self::Missing;
        }
        if let Ok(n) = trimmed.parse::<f64>()
            && n.is_finite()
        {
            return Self::Number(n);
        }
        if let Ok(d) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
            return Self::Date(d);
        }
        Self::Text(trimmed.to_owned())
    }

    pub fn is_missing(&self) -> bool {
        match self {
            Self::Missing => true,
            Self::Number(n) => n.is_nan(),
            Self::Text(_) | Self::Date(_) => false,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::Number(_) => "number",
            Self::Text(_) => "text",
            Self::Date(_) => "date",
        }
    }

    /// Category key used for indicator encoding.
    pub fn category_key(&self) -> Option<String> {
        match self {
            Self::Missing => None,
            Self::Number(n) if n.is_nan() => None,
            Self::Number(n) => Some(format_number(*n)),
            Self::Text(s) => Some(s.clone()),
            Self::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
        }
    }

    /// Year and month of a date cell.
    pub fn year_month(&self) -> Option<(f64, f64)> {
        match self {
            Self::Date(d) => Some((f64::from(d.year()), f64::from(d.month()))),
            _ => None,
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{n:.0}")
    } else {
        n.to_string()
    }
}

/// Names accepted for the label column when the configured name is not
/// in the upload.
pub const LABEL_ALIASES: [&str; 2] = ["Renewed", "renewal"];

/// Parse a ground-truth renewal label. Accepts 0/1 numbers and the usual
/// yes/no spellings; anything else is treated as unlabelled.
pub fn parse_label(value: &RawValue) -> Option<u8> {
    match value {
        RawValue::Number(n) if *n == 0.0 => Some(0),
        RawValue::Number(n) if *n == 1.0 => Some(1),
        RawValue::Text(s) => match s.trim().to_lowercase().as_str() {
            "1" | "yes" | "y" | "true" | "renewed" => Some(1),
            "0" | "no" | "n" | "false" | "lapsed" => Some(0),
            _ => None,
        },
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawColumn {
    pub name: String,
    pub values: Vec<RawValue>,
}

impl RawColumn {
    pub fn new(name: impl Into<String>, values: Vec<RawValue>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    pub fn numbers(name: impl Into<String>, values: &[f64]) -> Self {
        Self::new(name, values.iter().map(|&v| RawValue::Number(v)).collect())
    }

    pub fn texts(name: impl Into<String>, values: &[&str]) -> Self {
        Self::new(
            name,
            values
                .iter()
                .map(|v| RawValue::Text((*v).to_owned()))
                .collect(),
        )
    }

    pub fn missing_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_missing()).count()
    }
}

/// Column-oriented raw table. All columns have the same height.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    columns: Vec<RawColumn>,
    height: usize,
}

impl Dataset {
    /// Columns must share one height and have distinct names.
    ///
    /// # Errors
    ///
    /// Returns `DataProcessing` for ragged or duplicate columns.
    pub fn new(columns: Vec<RawColumn>) -> Result<Self> {
        let height = columns.first().map_or(0, |c| c.values.len());
        let mut seen = HashSet::new();
        for column in &columns {
            if column.values.len() != height {
                return Err(RenewalError::DataProcessing(format!(
                    "Column '{}' has {} rows, expected {height}",
                    column.name,
                    column.values.len()
                )));
            }
            if !seen.insert(column.name.as_str()) {
                return Err(RenewalError::DataProcessing(format!(
                    "Duplicate column '{}'",
                    column.name
                )));
            }
        }
        Ok(Self { columns, height })
    }

    /// Build a one-row dataset from a flat key→value mapping.
    ///
    /// # Errors
    ///
    /// Returns `DataProcessing` when a field name repeats.
    pub fn from_record<I, K>(fields: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, RawValue)>,
        K: Into<String>,
    {
        let columns = fields
            .into_iter()
            .map(|(name, value)| RawColumn::new(name, vec![value]))
            .collect();
        Self::new(columns)
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.height == 0
    }

    pub fn columns(&self) -> &[RawColumn] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&RawColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// The ground-truth column: `preferred` when present, otherwise the
    /// first column matching it or one of [`LABEL_ALIASES`] ignoring case.
    pub fn label_column(&self, preferred: &str) -> Option<&RawColumn> {
        self.column(preferred).or_else(|| {
            std::iter::once(preferred)
                .chain(LABEL_ALIASES)
                .find_map(|alias| self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(alias)))
        })
    }

    pub fn value(&self, column: &str, row: usize) -> Option<&RawValue> {
        self.column(column).and_then(|c| c.values.get(row))
    }

    /// Keep only the given rows, in the given order.
    pub fn select_rows(&self, rows: &[usize]) -> Self {
        let columns = self
            .columns
            .iter()
            .map(|c| {
                let values = rows
                    .iter()
                    .filter_map(|&r| c.values.get(r).cloned())
                    .collect();
                RawColumn::new(c.name.clone(), values)
            })
            .collect();
        Self {
            columns,
            height: rows.iter().filter(|&&r| r < self.height).count(),
        }
    }

    /// Drop rows where every cell is missing, then exact duplicate rows
    /// (first occurrence wins).
    pub fn without_empty_and_duplicate_rows(&self) -> Self {
        let mut seen = HashSet::new();
        let keep: Vec<usize> = (0..self.height)
            .filter(|&row| {
                let cells: Vec<&RawValue> = self
                    .columns
                    .iter()
                    .filter_map(|c| c.values.get(row))
                    .collect();
                if cells.iter().all(|v| v.is_missing()) {
                    return false;
                }
                seen.insert(format!("{cells:?}"))
            })
            .collect();
        self.select_rows(&keep)
    }

    /// Clip numeric columns to `mean ± sigmas · std` (sample standard
    /// deviation). Columns named in `excluded` and columns with any
    /// non-numeric cell are left as they are.
    pub fn with_outliers_clipped(&self, excluded: &[String], sigmas: f64) -> Self {
        let columns = self
            .columns
            .iter()
            .map(|column| {
                if excluded.iter().any(|e| *e == column.name) {
                    return column.clone();
                }
                let Some((lower, upper)) = clip_bounds(column, sigmas) else {
                    return column.clone();
                };

                let mut clipped = 0usize;
                let values = column
                    .values
                    .iter()
                    .map(|v| match v {
                        RawValue::Number(x) if *x < lower || *x > upper => {
                            clipped += 1;
                            RawValue::Number(x.clamp(lower, upper))
                        }
                        other => other.clone(),
                    })
                    .collect();
                if clipped > 0 {
                    tracing::info!(column = %column.name, clipped, lower, upper, "Clipped outliers");
                }
                RawColumn::new(column.name.clone(), values)
            })
            .collect();
        Self {
            columns,
            height: self.height,
        }
    }
}

fn clip_bounds(column: &RawColumn, sigmas: f64) -> Option<(f64, f64)> {
    let mut values = Vec::with_capacity(column.values.len());
    for value in &column.values {
        match value {
            RawValue::Number(x) if !x.is_nan() => values.push(*x),
            v if v.is_missing() => {}
            _ => return None,
        }
    }
    if values.len() < 2 {
        return None;
    }

    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let std = (values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt();
    std.is_finite().then_some((mean - sigmas * std, mean + sigmas * std))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coerce_form_fields() {
        assert_eq!(RawValue::coerce("42"), RawValue::Number(42.0));
        assert_eq!(RawValue::coerce(" 3.5 "), RawValue::Number(3.5));
        assert_eq!(RawValue::coerce(""), RawValue::Missing);
        assert_eq!(
            RawValue::coerce("2023-04-01"),
            RawValue::Date(NaiveDate::from_ymd_opt(2023, 4, 1).expect("valid date"))
        );
        assert_eq!(RawValue::coerce("high"), RawValue::Text("high".to_owned()));
    }

    #[test]
    fn test_parse_label() {
        assert_eq!(parse_label(&RawValue::Number(1.0)), Some(1));
        assert_eq!(parse_label(&RawValue::Text("Yes".to_owned())), Some(1));
        assert_eq!(parse_label(&RawValue::Text("no".to_owned())), Some(0));
        assert_eq!(parse_label(&RawValue::Number(0.5)), None);
        assert_eq!(parse_label(&RawValue::Missing), None);
    }

    #[test]
    fn test_label_column_aliases() -> Result<()> {
        let ds = Dataset::new(vec![
            RawColumn::numbers("age", &[20.0]),
            RawColumn::numbers("renewal", &[1.0]),
        ])?;
        assert_eq!(ds.label_column("renewal").map(|c| c.name.as_str()), Some("renewal"));
        assert_eq!(ds.label_column("Renewed").map(|c| c.name.as_str()), Some("renewal"));
        assert_eq!(ds.label_column("RENEWAL").map(|c| c.name.as_str()), Some("renewal"));
        assert!(ds.label_column("churned").is_some());

        let unlabelled = Dataset::new(vec![RawColumn::numbers("age", &[20.0])])?;
        assert!(unlabelled.label_column("Renewed").is_none());
        Ok(())
    }

    #[test]
    fn test_dataset_rejects_ragged_columns() {
        let result = Dataset::new(vec![
            RawColumn::numbers("age", &[20.0, 30.0]),
            RawColumn::numbers("premium", &[100.0]),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_outliers_clipped_to_three_sigma() -> Result<()> {
        let mut premiums = vec![10.0; 20];
        premiums.push(1000.0);
        let ids: Vec<f64> = (0..21).map(|i| if i == 20 { 1e6 } else { f64::from(i) }).collect();
        let ds = Dataset::new(vec![
            RawColumn::numbers("policy_id", &ids),
            RawColumn::numbers("premium", &premiums),
            RawColumn::texts("plan", &["gold"; 21]),
        ])?;

        let clipped = ds.with_outliers_clipped(&["policy_id".to_owned()], 3.0);
        let Some(RawValue::Number(top)) = clipped.value("premium", 20) else {
            panic!("premium stays numeric");
        };
        // mean 57.14, sample std 216.0
        assert!((top - 705.3).abs() < 0.1, "clipped to {top}");
        assert_eq!(clipped.value("premium", 0), Some(&RawValue::Number(10.0)));
        assert_eq!(clipped.value("policy_id", 20), Some(&RawValue::Number(1e6)));
        assert_eq!(clipped.column("plan"), ds.column("plan"));
        Ok(())
    }

    #[test]
    fn test_mixed_column_not_clipped() -> Result<()> {
        let mut values: Vec<RawValue> = (0..20).map(|_| RawValue::Number(1.0)).collect();
        values.push(RawValue::Number(500.0));
        values.push(RawValue::Text("n/a".to_owned()));
        let ds = Dataset::new(vec![RawColumn::new("tenure", values)])?;
        assert_eq!(ds.with_outliers_clipped(&[], 3.0), ds);
        Ok(())
    }

    #[test]
    fn test_dedup_and_empty_rows() -> Result<()> {
        let ds = Dataset::new(vec![
            RawColumn::new(
                "age",
                vec![
                    RawValue::Number(20.0),
                    RawValue::Number(20.0),
                    RawValue::Missing,
                    RawValue::Number(40.0),
                ],
            ),
            RawColumn::new(
                "city",
                vec![
                    RawValue::Text("a".to_owned()),
                    RawValue::Text("a".to_owned()),
                    RawValue::Missing,
                    RawValue::Text("b".to_owned()),
                ],
            ),
        ])?;
        let cleaned = ds.without_empty_and_duplicate_rows();
        assert_eq!(cleaned.height(), 2);
        assert_eq!(cleaned.value("age", 1), Some(&RawValue::Number(40.0)));
        Ok(())
    }
}
