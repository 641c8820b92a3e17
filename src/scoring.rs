//! Batch scoring of uploaded datasets.
//!
//! Rows are scored independently: a row that fails to encode or predict
//! is recorded as a [`RowFailure`] and left without predictions while the
//! rest of the batch continues. Only a column-set mismatch aborts the
//! batch. When the upload carries ground-truth labels, quality metrics
//! are computed over the rows that were scored and labelled.

use crate::data::{Dataset, parse_label};
use crate::error::Result;
use crate::metrics::{self, QualityMetrics};
use crate::model::{Confidence, PredictionResult};
use crate::serving::ServingContext;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowFailure {
    pub row: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub scored: usize,
    pub predicted_renewals: usize,
    pub renewal_rate: f64,
    pub degraded: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    /// One entry per input row; `None` for rows that failed.
    pub predictions: Vec<Option<PredictionResult>>,
    pub failures: Vec<RowFailure>,
    pub metrics: Option<QualityMetrics>,
    pub summary: BatchSummary,
}

impl BatchReport {
    pub fn probabilities(&self) -> Vec<Option<f64>> {
        self.predictions
            .iter()
            .map(|p| p.map(|p| p.probability))
            .collect()
    }

    pub fn labels(&self) -> Vec<Option<i32>> {
        self.predictions
            .iter()
            .map(|p| p.map(|p| i32::from(p.label)))
            .collect()
    }
}

/// Score every row of `dataset`. `label_column`, or one of the label
/// aliases, supplies ground truth for the quality metrics when the upload
/// carries it.
///
/// # Errors
///
/// Fails for the whole batch when the upload's columns do not match the
/// trained schema. Rows that fail on their own are reported in
/// [`BatchReport::failures`] instead.
pub fn score_dataset(context: &ServingContext, dataset: &Dataset, label_column: &str) -> Result<BatchReport> {
    let rows = context.predict_rows(dataset)?;

    let mut predictions = Vec::with_capacity(rows.len());
    let mut failures = Vec::new();
    for (row, result) in rows.into_iter().enumerate() {
        match result {
            Ok(prediction) => predictions.push(Some(prediction)),
            Err(e) => {
                tracing::warn!(row, error = %e, "Skipping row");
                failures.push(RowFailure {
                    row,
                    reason: e.to_string(),
                });
                predictions.push(None);
            }
        }
    }

    let scored: Vec<&PredictionResult> = predictions.iter().flatten().collect();
    let predicted_renewals = scored.iter().filter(|p| p.label == 1).count();
    let summary = BatchSummary {
        total: predictions.len(),
        scored: scored.len(),
        predicted_renewals,
        renewal_rate: if scored.is_empty() {
            0.0
        } else {
            predicted_renewals as f64 / scored.len() as f64
        },
        degraded: scored
            .iter()
            .filter(|p| p.confidence == Confidence::Degraded)
            .count(),
    };

    let metrics = dataset.label_column(label_column).and_then(|labels| {
        let (truth, scores): (Vec<u8>, Vec<f64>) = labels
            .values
            .iter()
            .zip(&predictions)
            .filter_map(|(value, prediction)| Some((parse_label(value)?, prediction.as_ref()?.probability)))
            .unzip();
        metrics::evaluate(&truth, &scores, context.threshold())
    });

    tracing::info!(
        total = summary.total,
        scored = summary.scored,
        failed = failures.len(),
        "Scored batch"
    );

    Ok(BatchReport {
        predictions,
        failures,
        metrics,
        summary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{RawColumn, RawValue};
    use crate::error::RenewalError;
    use crate::model::{DecisionTree, Model, ModelArtifact, NearestCentroid, TreeParams};
    use crate::transform::{FeatureTransformer, TransformOptions};

    fn context(label_only: bool) -> Result<ServingContext> {
        let ds = Dataset::new(vec![
            RawColumn::numbers("age", &[20.0, 30.0, 50.0, 60.0]),
            RawColumn::numbers("renewal", &[0.0, 0.0, 1.0, 1.0]),
        ])?;
        let options = TransformOptions {
            excluded_columns: vec!["renewal".to_owned()],
            ..TransformOptions::default()
        };
        let transformer = FeatureTransformer::fit(&ds, &options)?;
        let x = transformer.apply(&ds)?;
        let y = [0, 0, 1, 1];
        let model = if label_only {
            Model::NearestCentroid(NearestCentroid::fit(&x, &y)?)
        } else {
            Model::DecisionTree(DecisionTree::fit(&x, &y, &TreeParams::default()))
        };
        let artifact = ModelArtifact::new(model, transformer.feature_names(), None);
        ServingContext::new(transformer, artifact, 0.5)
    }

    #[test]
    fn test_skip_row_policy() -> Result<()> {
        let ctx = context(false)?;
        let upload = Dataset::new(vec![RawColumn::new(
            "age",
            vec![
                RawValue::Number(25.0),
                RawValue::Text("unknown".to_owned()),
                RawValue::Number(58.0),
            ],
        )])?;

        let report = score_dataset(&ctx, &upload, "renewal")?;
        assert_eq!(report.summary.total, 3);
        assert_eq!(report.summary.scored, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].row, 1);
        assert_eq!(report.labels(), vec![Some(0), None, Some(1)]);
        assert!(report.metrics.is_none());
        Ok(())
    }

    #[test]
    fn test_metrics_when_labels_present() -> Result<()> {
        let ctx = context(false)?;
        let upload = Dataset::new(vec![
            RawColumn::numbers("age", &[22.0, 35.0, 55.0, 65.0]),
            RawColumn::texts("renewal", &["no", "no", "yes", "yes"]),
        ])?;
        // The configured name differs from the upload's; the alias finds it.
        let report = score_dataset(&ctx, &upload, "Renewed")?;
        let metrics = report.metrics.expect("labels present");
        assert_eq!(metrics.accuracy, 1.0);
        assert!(metrics.roc_auc.is_some_and(|auc| (auc - 1.0).abs() < 1e-6));
        assert!((report.summary.renewal_rate - 0.5).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn test_threshold_consistency_and_degraded_count() -> Result<()> {
        let ctx = context(true)?;
        let upload = Dataset::new(vec![RawColumn::numbers("age", &[21.0, 59.0, 40.5])])?;
        let report = score_dataset(&ctx, &upload, "renewal")?;
        assert_eq!(report.summary.degraded, 3);
        for p in report.predictions.iter().flatten() {
            assert_eq!(p.label == 1, p.probability >= ctx.threshold());
        }
        Ok(())
    }

    #[test]
    fn test_column_mismatch_aborts_batch() -> Result<()> {
        let ctx = context(false)?;
        let upload = Dataset::new(vec![RawColumn::numbers("years", &[1.0])])?;
        assert!(matches!(
            score_dataset(&ctx, &upload, "renewal"),
            Err(RenewalError::SchemaMismatch { .. })
        ));
        Ok(())
    }
}
