//! Training runs: clean, split, fit, evaluate.
//!
//! A run produces a fitted [`FeatureTransformer`] and a [`ModelArtifact`]
//! that belong together. Nothing is persisted here; the caller decides
//! whether to hand the pair to an [`ArtifactStore`](crate::store::ArtifactStore).

use crate::data::{Dataset, parse_label};
use crate::error::{RenewalError, Result};
use crate::metrics::{self, QualityMetrics};
use crate::model::{
    BoostingParams, DecisionTree, GradientBoosted, LogisticModel, Model, ModelArtifact, ModelFamily,
    NearestCentroid, RandomForest, TreeParams,
};
use crate::transform::{FeatureTransformer, FeatureVector, TransformOptions};
use rand::SeedableRng as _;
use rand::rngs::StdRng;
use rand::seq::SliceRandom as _;
use std::time::{Duration, Instant};

/// Numeric cells further than this many standard deviations from their
/// column mean are clipped before fitting.
const OUTLIER_SIGMAS: f64 = 3.0;

/// Customer and policy keys that never become features.
pub const DEFAULT_IDENTIFIER_COLUMNS: [&str; 4] = ["CustomerID", "customer_id", "policy_id", "id"];

#[derive(Debug, Clone)]
pub struct TrainingOptions {
    pub label_column: String,
    pub identifier_columns: Vec<String>,
    /// Share of rows held out for evaluation, per class.
    pub test_fraction: f64,
    pub seed: u64,
    pub threshold: f64,
    pub tree: TreeParams,
    pub forest_trees: usize,
    pub boosting: BoostingParams,
    pub max_iterations: u64,
}

impl Default for TrainingOptions {
    fn default() -> Self {
        Self {
            label_column: "Renewed".to_owned(),
            identifier_columns: DEFAULT_IDENTIFIER_COLUMNS.map(str::to_owned).to_vec(),
            test_fraction: 0.2,
            seed: 42,
            threshold: 0.5,
            tree: TreeParams::default(),
            forest_trees: 50,
            boosting: BoostingParams::default(),
            max_iterations: 200,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub transformer: FeatureTransformer,
    pub artifact: ModelArtifact,
    pub train_rows: usize,
    pub test_rows: usize,
    pub duration: Duration,
}

impl TrainingOutcome {
    pub fn family(&self) -> ModelFamily {
        self.artifact.family()
    }

    pub fn metrics(&self) -> Option<&QualityMetrics> {
        self.artifact.metrics.as_ref()
    }

    /// Plain-language reading of the evaluation.
    pub fn interpretation(&self) -> Vec<String> {
        let mut lines = Vec::new();
        let Some(m) = self.metrics() else {
            lines.push("No metrics: the evaluation rows do not contain both renewed and lapsed customers.".to_owned());
            return lines;
        };

        let pct = m.accuracy * 100.0;
        lines.push(format!(
            "The model correctly identifies renewal outcomes {pct:.1}% of the time."
        ));
        if m.accuracy > 0.8 {
            lines.push("This is considered a very reliable classification.".to_owned());
        } else if m.accuracy < 0.6 {
            lines.push(
                "The model is not much better than a coin flip; consider adding more relevant features."
                    .to_owned(),
            );
        }
        if let Some(auc) = m.roc_auc {
            lines.push(format!(
                "It ranks a random renewing customer above a lapsing one {:.1}% of the time (ROC-AUC).",
                auc * 100.0
            ));
        }
        if self.test_rows == 0 {
            lines.push("Too few rows for a hold-out split; metrics are measured on the training rows.".to_owned());
        }
        lines
    }
}

/// Seeded per-class hold-out split. Returns (train, test) row indices.
#[expect(clippy::indexing_slicing)]
fn stratified_split(labels: &[u8], test_fraction: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let fraction = test_fraction.clamp(0.0, 1.0);
    let (mut train, mut test) = (Vec::new(), Vec::new());

    for class in [0u8, 1] {
        let mut members: Vec<usize> = (0..labels.len()).filter(|&i| labels[i] == class).collect();
        members.shuffle(&mut rng);
        // Always leave at least one row of each class for training.
        let n_test = ((members.len() as f64 * fraction).round() as usize).min(members.len().saturating_sub(1));
        test.extend_from_slice(&members[..n_test]);
        train.extend_from_slice(&members[n_test..]);
    }
    train.sort_unstable();
    test.sort_unstable();
    (train, test)
}

fn fit_family(family: ModelFamily, x: &[FeatureVector], y: &[u8], options: &TrainingOptions) -> Result<Model> {
    Ok(match family {
        ModelFamily::Linear => Model::Linear(LogisticModel::fit(x, y, options.max_iterations)?),
        ModelFamily::DecisionTree => Model::DecisionTree(DecisionTree::fit(x, y, &options.tree)),
        ModelFamily::RandomForest => Model::RandomForest(RandomForest::fit(
            x,
            y,
            options.forest_trees,
            &options.tree,
            options.seed,
        )),
        ModelFamily::GradientBoosted => Model::GradientBoosted(GradientBoosted::fit(x, y, &options.boosting)),
        ModelFamily::NearestCentroid => Model::NearestCentroid(NearestCentroid::fit(x, y)?),
    })
}

/// Train one model family on a labelled dataset.
///
/// The label column is looked up with [`Dataset::label_column`], so both
/// `Renewed` and `renewal` are found whatever the configured name.
///
/// # Errors
///
/// Returns `Training` when the label column is missing or holds a single
/// class, and any transformer or fitting error.
#[expect(clippy::indexing_slicing)]
pub fn train(dataset: &Dataset, family: ModelFamily, options: &TrainingOptions) -> Result<TrainingOutcome> {
    let start = Instant::now();
    let label_column = dataset.label_column(&options.label_column).ok_or_else(|| {
        RenewalError::Training(format!("Label column '{}' not found", options.label_column))
    })?;
    let label_name = label_column.name.clone();

    let labelled: Vec<usize> = label_column
        .values
        .iter()
        .enumerate()
        .filter(|(_, v)| parse_label(v).is_some())
        .map(|(i, _)| i)
        .collect();
    if labelled.len() < dataset.height() {
        tracing::warn!(
            dropped = dataset.height() - labelled.len(),
            "Dropping rows without a usable label"
        );
    }

    let mut excluded = options.identifier_columns.clone();
    excluded.push(label_name.clone());

    let cleaned = dataset
        .select_rows(&labelled)
        .without_empty_and_duplicate_rows()
        .with_outliers_clipped(&excluded, OUTLIER_SIGMAS);
    let labels: Vec<u8> = cleaned
        .column(&label_name)
        .map(|c| c.values.iter().filter_map(parse_label).collect())
        .unwrap_or_default();

    let positives = labels.iter().filter(|&&y| y == 1).count();
    if positives == 0 || positives == labels.len() {
        return Err(RenewalError::Training(format!(
            "The label column '{label_name}' must contain both renewed and lapsed customers ({} rows, {positives} renewed)",
            labels.len()
        )));
    }

    let (train_idx, test_idx) = stratified_split(&labels, options.test_fraction, options.seed);
    let train_set = cleaned.select_rows(&train_idx);
    let y_train: Vec<u8> = train_idx.iter().map(|&i| labels[i]).collect();

    let transformer = FeatureTransformer::fit(
        &train_set,
        &TransformOptions {
            scale_numeric: family.wants_scaling(),
            excluded_columns: excluded,
        },
    )?;

    let x_train = transformer.apply(&train_set)?;
    let model = fit_family(family, &x_train, &y_train, options)?;

    // Evaluate on the hold-out rows, or on the training rows when the
    // dataset is too small to hold any out.
    let (eval_x, eval_y) = if test_idx.is_empty() {
        (x_train, y_train)
    } else {
        let test_set = cleaned.select_rows(&test_idx);
        (
            transformer.apply(&test_set)?,
            test_idx.iter().map(|&i| labels[i]).collect(),
        )
    };
    let scores = eval_x
        .iter()
        .map(|x| model.output(x))
        .collect::<Result<Vec<f64>>>()?;
    let evaluation = metrics::evaluate(&eval_y, &scores, options.threshold);

    let artifact = ModelArtifact::for_transformer(model, &transformer, evaluation);
    let outcome = TrainingOutcome {
        transformer,
        artifact,
        train_rows: train_idx.len(),
        test_rows: test_idx.len(),
        duration: start.elapsed(),
    };

    tracing::info!(
        family = %family,
        train_rows = outcome.train_rows,
        test_rows = outcome.test_rows,
        features = outcome.transformer.output_width(),
        leaves = ?outcome.artifact.model.as_tree().map(|t| t.root().n_leaves()),
        roc_auc = ?outcome.metrics().and_then(|m| m.roc_auc),
        "Trained model"
    );
    Ok(outcome)
}

/// Train every family and keep the one with the best hold-out ROC-AUC.
/// Families that fail to train are skipped.
///
/// # Errors
///
/// Returns the last family's error when no family trains.
pub fn train_best(dataset: &Dataset, options: &TrainingOptions) -> Result<TrainingOutcome> {
    let mut best: Option<TrainingOutcome> = None;
    let mut last_error = None;

    for family in ModelFamily::ALL {
        match train(dataset, family, options) {
            Ok(outcome) => {
                let auc = |o: &TrainingOutcome| o.metrics().and_then(|m| m.roc_auc).unwrap_or(f64::NEG_INFINITY);
                if best.as_ref().is_none_or(|b| auc(&outcome) > auc(b)) {
                    best = Some(outcome);
                }
            }
            Err(e) => {
                tracing::warn!(family = %family, error = %e, "Model family failed to train");
                last_error = Some(e);
            }
        }
    }

    best.ok_or_else(|| last_error.unwrap_or_else(|| RenewalError::Training("No model families to train".to_owned())))
}
