//! End-to-end workflow tests: train on a fixture file, persist the
//! artifacts, load a serving context from the store and exercise every
//! request type against it.

use renewal::data::io::{
    PREDICTION_COLUMN, PROBABILITY_COLUMN, append_predictions, frame_to_dataset, load_df, save_df,
};
use renewal::data::{Dataset, RawValue};
use renewal::error::RenewalError;
use renewal::explain::ImportanceMethod;
use renewal::model::{Confidence, ModelFamily};
use renewal::scoring::score_dataset;
use renewal::serving::{ServingContext, ServingHandle};
use renewal::store::ArtifactStore;
use renewal::training::{self, TrainingOptions, TrainingOutcome};
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn fixture() -> PathBuf {
    PathBuf::from("testdata/policies.csv")
}

fn policies() -> Dataset {
    let df = load_df(&fixture()).expect("fixture should load");
    frame_to_dataset(&df).expect("fixture should convert")
}

fn train_and_store(family: ModelFamily, dir: &Path) -> (ArtifactStore, TrainingOutcome) {
    let store = ArtifactStore::new(dir.to_path_buf()).expect("store");
    let outcome = training::train(&policies(), family, &TrainingOptions::default())
        .expect("training should succeed");
    store
        .save_transformer(&outcome.transformer)
        .expect("save transformer");
    store.save_model(&outcome.artifact).expect("save model");
    (store, outcome)
}

#[test]
fn test_fixture_shape() {
    let ds = policies();
    assert_eq!(ds.height(), 60);
    assert_eq!(ds.width(), 7);
    assert!(matches!(
        ds.value("policy_start", 0),
        Some(RawValue::Date(_))
    ));
    assert!(ds.value("age", 5).is_some_and(RawValue::is_missing));
}

#[test]
fn test_tree_workflow_scores_and_writes_output() {
    let temp = tempfile::tempdir().expect("tempdir");
    let (store, outcome) = train_and_store(ModelFamily::DecisionTree, temp.path());

    let metrics = outcome.metrics().expect("hold-out metrics");
    assert!(metrics.accuracy >= 0.9, "accuracy was {}", metrics.accuracy);
    assert!(
        !outcome
            .transformer
            .feature_names()
            .iter()
            .any(|n| n.starts_with("CustomerID") || n.starts_with("renewal")),
        "identifier and label columns must not be features"
    );

    let handle = ServingHandle::new();
    handle.reload(&store, 0.5).expect("reload");
    let context = handle.current().expect("ready");

    let mut df = load_df(&fixture()).expect("load");
    let dataset = frame_to_dataset(&df).expect("convert");
    let report = score_dataset(&context, &dataset, "renewal").expect("score");

    assert_eq!(report.summary.total, 60);
    assert_eq!(report.summary.scored, 60);
    assert!(report.failures.is_empty());
    assert_eq!(report.summary.degraded, 0);
    let batch_metrics = report.metrics.as_ref().expect("labels present");
    assert!(batch_metrics.accuracy >= 0.9);

    for p in report.predictions.iter().flatten() {
        assert!((0.0..=1.0).contains(&p.probability));
        assert_eq!(p.label == 1, p.probability >= 0.5);
        assert_eq!(p.confidence, Confidence::Exact);
    }

    append_predictions(&mut df, report.probabilities(), report.labels()).expect("append");
    let out = temp.path().join("scored.csv");
    save_df(&mut df, &out).expect("save");

    let written = load_df(&out).expect("reload output");
    assert_eq!(written.height(), 60);
    let names: Vec<String> = written
        .get_column_names()
        .iter()
        .map(|n| n.to_string())
        .collect();
    assert!(names.iter().any(|n| n == PROBABILITY_COLUMN));
    assert!(names.iter().any(|n| n == PREDICTION_COLUMN));
}

#[test]
fn test_tree_rules_partition_training_rows() {
    let temp = tempfile::tempdir().expect("tempdir");
    let (store, outcome) = train_and_store(ModelFamily::DecisionTree, temp.path());
    let context = ServingContext::load(&store, 0.5).expect("context");

    let rules = context.rules().expect("tree model has rules");
    assert!(!rules.is_empty());
    assert_eq!(
        rules.iter().map(|r| r.samples).sum::<usize>(),
        outcome.train_rows
    );
    assert!(rules.windows(2).all(|w| w[0].samples >= w[1].samples));
    assert!(rules.iter().any(|r| r.to_string().contains("tenure")));

    let encoded = context.transformer().apply(&policies()).expect("encode");
    for x in &encoded {
        assert_eq!(rules.iter().filter(|r| r.matches(x)).count(), 1);
    }

    let importance = context.importance(None).expect("importance");
    assert_eq!(importance.method, Some(ImportanceMethod::Native));
    assert_eq!(importance.entries[0].feature, "tenure");
}

#[test]
fn test_single_record_with_unseen_category() {
    let temp = tempfile::tempdir().expect("tempdir");
    let (store, _) = train_and_store(ModelFamily::DecisionTree, temp.path());
    let context = ServingContext::load(&store, 0.5).expect("context");

    let record = [
        ("age", "51"),
        ("tenure", "8"),
        ("annual_premium", "720"),
        ("plan", "platinum"),
        ("policy_start", "2019-06-15"),
    ]
    .map(|(k, v)| (k, RawValue::coerce(v)));
    let result = context.predict_record(record).expect("prediction");
    assert_eq!(result.label, 1);

    let bad = [
        ("age", "fifty"),
        ("tenure", "8"),
        ("annual_premium", "720"),
        ("plan", "gold"),
        ("policy_start", "2019-06-15"),
    ]
    .map(|(k, v)| (k, RawValue::coerce(v)));
    assert!(matches!(
        context.predict_record(bad),
        Err(RenewalError::InvalidRecord { .. })
    ));

    let partial = [("age", RawValue::coerce("51"))];
    assert!(matches!(
        context.predict_record(partial),
        Err(RenewalError::SchemaMismatch { .. })
    ));
}

#[test]
fn test_linear_model_explained_by_coefficients() {
    let temp = tempfile::tempdir().expect("tempdir");
    let (store, outcome) = train_and_store(ModelFamily::Linear, temp.path());
    assert!(outcome.transformer.is_scaled());

    let context = ServingContext::load(&store, 0.5).expect("context");
    assert!(matches!(
        context.rules(),
        Err(RenewalError::RulesUnavailable(_))
    ));

    let importance = context.importance(None).expect("importance");
    assert_eq!(importance.method, Some(ImportanceMethod::Coefficients));
    assert_eq!(
        importance.entries.len(),
        context.transformer().output_width()
    );
    assert!(
        importance
            .entries
            .windows(2)
            .all(|w| w[0].score.abs() >= w[1].score.abs())
    );
}

#[test]
fn test_centroid_model_is_degraded_and_needs_sample_for_importance() {
    let temp = tempfile::tempdir().expect("tempdir");
    let (store, _) = train_and_store(ModelFamily::NearestCentroid, temp.path());
    let context = ServingContext::load(&store, 0.5).expect("context");

    let report = score_dataset(&context, &policies(), "renewal").expect("score");
    assert_eq!(report.summary.degraded, report.summary.scored);

    assert!(context.importance(None).expect("importance").is_empty());

    let sample = policies();
    let importance = context.importance(Some(&sample)).expect("importance");
    assert_eq!(importance.method, Some(ImportanceMethod::Attribution));
    let again = context.importance(Some(&sample)).expect("importance");
    assert_eq!(importance, again);
}

#[test]
fn test_reload_picks_up_newer_artifacts() {
    let temp = tempfile::tempdir().expect("tempdir");
    let (store, _) = train_and_store(ModelFamily::DecisionTree, temp.path());

    let handle = ServingHandle::new();
    handle.reload(&store, 0.5).expect("reload");
    let first = handle.current().expect("ready");
    assert_eq!(first.model().family(), ModelFamily::DecisionTree);

    let (_, _) = train_and_store(ModelFamily::RandomForest, temp.path());
    handle.reload(&store, 0.5).expect("reload");
    let second = handle.current().expect("ready");

    assert_eq!(second.model().family(), ModelFamily::RandomForest);
    assert!(!Arc::ptr_eq(&first, &second));
    // In-flight holders keep their context.
    assert_eq!(first.model().family(), ModelFamily::DecisionTree);
}

#[test]
fn test_empty_store_leaves_handle_not_ready() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = ArtifactStore::new(temp.path().to_path_buf()).expect("store");
    let handle = ServingHandle::new();

    assert!(handle.reload(&store, 0.5).is_err());
    assert!(!handle.is_ready());
    assert!(matches!(handle.current(), Err(RenewalError::NotReady)));
}

#[test]
fn test_spreadsheet_upload_trains_and_scores() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = ArtifactStore::new(temp.path().to_path_buf()).expect("store");

    let df = load_df(Path::new("testdata/policies.xlsx")).expect("workbook should load");
    let workbook = frame_to_dataset(&df).expect("convert");
    // Default options name the label `Renewed`, as the workbook does.
    let outcome = training::train(&workbook, ModelFamily::DecisionTree, &TrainingOptions::default())
        .expect("training should succeed");
    assert!(
        !outcome
            .transformer
            .feature_names()
            .iter()
            .any(|n| n.starts_with("Renewed") || n.starts_with("CustomerID"))
    );
    store.save_transformer(&outcome.transformer).expect("save transformer");
    store.save_model(&outcome.artifact).expect("save model");

    let context = ServingContext::load(&store, 0.5).expect("context");
    let report = score_dataset(&context, &workbook, "Renewed").expect("score");
    assert_eq!(report.summary.total, 60);
    assert_eq!(report.summary.scored, 60);
    assert!(report.metrics.is_some());
}

#[test]
fn test_stray_text_in_numeric_column_skips_only_that_row() {
    let temp = tempfile::tempdir().expect("tempdir");
    let (store, _) = train_and_store(ModelFamily::DecisionTree, temp.path());
    let context = ServingContext::load(&store, 0.5).expect("context");

    let upload = temp.path().join("march.csv");
    std::fs::write(
        &upload,
        "CustomerID,age,tenure,annual_premium,plan,policy_start\n\
         C100,51,8,720,gold,2019-06-15\n\
         C101,fifty,8,720,gold,2019-06-15\n\
         C102,30,1,420,basic,2016-02-15\n",
    )
    .expect("write upload");

    let df = load_df(&upload).expect("load");
    let dataset = frame_to_dataset(&df).expect("convert");
    let report = score_dataset(&context, &dataset, "Renewed").expect("score");

    assert_eq!(report.summary.total, 3);
    assert_eq!(report.summary.scored, 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].row, 1);
    assert!(report.failures[0].reason.contains("age"));
    assert!(report.metrics.is_none());
}
