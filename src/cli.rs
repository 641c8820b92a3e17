use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use renewal::config::{self, AppConfig};
use renewal::data::io::{append_predictions, frame_to_dataset, load_df, save_df};
use renewal::data::{Dataset, RawValue, schema};
use renewal::error::RenewalError;
use renewal::explain::Explainer;
use renewal::model::ModelFamily;
use renewal::serving::{ServingContext, ServingHandle};
use renewal::store::ArtifactStore;
use renewal::training::{self, TrainingOutcome};
use renewal::utils::fmt_opt;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "renewal", about = "Insurance policy renewal prediction")]
pub struct Cli {
    /// Path to a JSON configuration file. Defaults to the app data directory.
    #[arg(long, global = true, env = "RENEWAL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Artifact directory, overriding the configured one
    #[arg(long, global = true, env = "RENEWAL_ARTIFACTS")]
    pub artifacts: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the inferred type and basic statistics of every column
    Profile {
        /// Dataset to profile (CSV, XLSX, Parquet, JSON)
        file: PathBuf,
    },
    /// Train a model and store it with its transformer
    Train {
        /// Labelled training dataset (CSV, XLSX, Parquet, JSON)
        file: PathBuf,

        /// Model family: linear, tree, forest, boosted, centroid. Trains every
        /// family and keeps the best by ROC-AUC when omitted.
        #[arg(short, long)]
        family: Option<ModelFamily>,

        /// Label column name
        #[arg(short, long)]
        label: Option<String>,

        /// Seed for the hold-out split and tree ensembles
        #[arg(long)]
        seed: Option<u64>,

        /// Fraction of rows held out for evaluation
        #[arg(long)]
        test_fraction: Option<f64>,
    },
    /// Score a dataset with the latest model
    Score {
        /// Dataset to score (CSV, XLSX, Parquet, JSON)
        file: PathBuf,

        /// Output file path. Defaults to `<input>_scored.csv` beside the input.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Decision threshold in [0, 1]
        #[arg(short, long)]
        threshold: Option<f64>,
    },
    /// Score a single record given as `column=value` pairs
    Predict {
        /// One field of the record, e.g. `--field age=42`
        #[arg(short, long = "field", value_parser = parse_field, required = true)]
        fields: Vec<(String, String)>,

        /// Decision threshold in [0, 1]
        #[arg(short, long)]
        threshold: Option<f64>,
    },
    /// Rank the features that drive the latest model
    Explain {
        /// Sample dataset for models without built-in importance
        #[arg(short, long)]
        sample: Option<PathBuf>,

        /// Number of features to show
        #[arg(long, default_value_t = 10)]
        top: usize,

        /// Rows of the sample used for attribution
        #[arg(long, default_value_t = 200)]
        max_rows: usize,
    },
    /// Print the decision rules of the latest single-tree model
    Rules {
        /// Only show the rules covering the most samples
        #[arg(long)]
        top: Option<usize>,
    },
    /// Print the effective configuration as JSON
    Config {
        /// Save it to the configuration file
        #[arg(long)]
        write: bool,
    },
}

fn parse_field(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected column=value, got '{s}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing column name in '{s}'"));
    }
    Ok((key.to_owned(), value.to_owned()))
}

/// Status 2 for input the library rejected, 1 for everything else.
pub fn exit_code(error: &anyhow::Error) -> ExitCode {
    if is_request_failure(error) {
        ExitCode::from(2)
    } else {
        ExitCode::FAILURE
    }
}

fn is_request_failure(error: &anyhow::Error) -> bool {
    error.chain().any(|cause| {
        cause
            .downcast_ref::<RenewalError>()
            .is_some_and(RenewalError::is_request_error)
    })
}

pub fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => config::load_app_config_from(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => config::load_app_config(),
    };
    let config_path = cli.config.clone().unwrap_or_else(config::get_config_path);
    if let Some(dir) = cli.artifacts {
        config.artifact_dir = Some(dir);
    }

    match cli.command {
        Commands::Profile { file } => handle_profile(&file),
        Commands::Train {
            file,
            family,
            label,
            seed,
            test_fraction,
        } => handle_train(&config, &file, family, label, seed, test_fraction),
        Commands::Score {
            file,
            output,
            threshold,
        } => handle_score(&config, &file, output, threshold),
        Commands::Predict { fields, threshold } => handle_predict(&config, fields, threshold),
        Commands::Explain {
            sample,
            top,
            max_rows,
        } => handle_explain(&config, sample.as_deref(), top, max_rows),
        Commands::Rules { top } => handle_rules(&config, top),
        Commands::Config { write } => handle_config(&config, &config_path, write),
    }
}

fn load_dataset(path: &Path) -> Result<Dataset> {
    let df = load_df(path).with_context(|| format!("Failed to load {}", path.display()))?;
    Ok(frame_to_dataset(&df)?)
}

fn open_store(config: &AppConfig) -> Result<ArtifactStore> {
    let dir = config.artifact_dir();
    ArtifactStore::new(dir.clone())
        .with_context(|| format!("Failed to open artifact directory {}", dir.display()))
}

fn serving_context(config: &AppConfig, threshold: Option<f64>) -> Result<Arc<ServingContext>> {
    let store = open_store(config)?;
    let threshold = threshold.unwrap_or(config.threshold);
    let handle = ServingHandle::new();
    handle.reload_with(|| {
        Ok(ServingContext::load(&store, threshold)?.with_rule_format(config.rule_format()))
    })?;
    Ok(handle.current()?)
}

fn handle_profile(file: &Path) -> Result<()> {
    let dataset = load_dataset(file)?;
    println!(
        "{}: {} rows, {} columns",
        file.display(),
        dataset.height(),
        dataset.width()
    );
    println!(
        "{:<28} {:<12} {:>8} {:>9} {:>9} {:>12} {:>12}",
        "column", "type", "count", "missing%", "distinct", "min", "max"
    );
    for col in schema::profile(&dataset) {
        println!(
            "{:<28} {:<12} {:>8} {:>8.1}% {:>9} {:>12} {:>12}",
            col.name,
            col.semantic.to_string(),
            col.count,
            col.missing_pct(),
            col.distinct,
            fmt_opt(col.min),
            fmt_opt(col.max)
        );
    }
    Ok(())
}

fn handle_train(
    config: &AppConfig,
    file: &Path,
    family: Option<ModelFamily>,
    label: Option<String>,
    seed: Option<u64>,
    test_fraction: Option<f64>,
) -> Result<()> {
    let mut options = config.training_options();
    if let Some(label) = label {
        options.label_column = label;
    }
    if let Some(seed) = seed {
        options.seed = seed;
    }
    if let Some(fraction) = test_fraction {
        anyhow::ensure!(
            (0.0..1.0).contains(&fraction),
            "--test-fraction must be within [0, 1)"
        );
        options.test_fraction = fraction;
    }

    let dataset = load_dataset(file)?;
    println!("Training on {} rows from {}...", dataset.height(), file.display());

    let outcome = match family {
        Some(family) => training::train(&dataset, family, &options)?,
        None => training::train_best(&dataset, &options)?,
    };

    let store = open_store(config)?;
    let transformer_path = store.save_transformer(&outcome.transformer)?;
    let model_path = store.save_model(&outcome.artifact)?;

    print_outcome(&outcome);
    println!("Transformer saved to: {}", transformer_path.display());
    println!("Model saved to: {}", model_path.display());
    Ok(())
}

fn print_outcome(outcome: &TrainingOutcome) {
    println!(
        "Model: {} ({} train / {} test rows, {:.2}s)",
        outcome.family(),
        outcome.train_rows,
        outcome.test_rows,
        outcome.duration.as_secs_f64()
    );
    if let Some(m) = outcome.metrics() {
        println!("  accuracy           {}", fmt_opt(Some(m.accuracy)));
        println!("  precision          {}", fmt_opt(Some(m.precision)));
        println!("  recall             {}", fmt_opt(Some(m.recall)));
        println!("  f1                 {}", fmt_opt(Some(m.f1)));
        println!("  roc_auc            {}", fmt_opt(m.roc_auc));
        println!("  average_precision  {}", fmt_opt(m.average_precision));
    }
    for line in outcome.interpretation() {
        println!("{line}");
    }
}

fn default_output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "scored".to_owned());
    input.with_file_name(format!("{stem}_scored.csv"))
}

fn handle_score(
    config: &AppConfig,
    file: &Path,
    output: Option<PathBuf>,
    threshold: Option<f64>,
) -> Result<()> {
    let context = serving_context(config, threshold)?;

    let mut df = load_df(file).with_context(|| format!("Failed to load {}", file.display()))?;
    let dataset = frame_to_dataset(&df)?;
    let report = renewal::scoring::score_dataset(&context, &dataset, &config.label_column)?;

    append_predictions(&mut df, report.probabilities(), report.labels())?;
    let output = output.unwrap_or_else(|| default_output_path(file));
    save_df(&mut df, &output)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    let s = &report.summary;
    println!(
        "Scored {} of {} rows; {} predicted to renew ({:.1}%).",
        s.scored,
        s.total,
        s.predicted_renewals,
        s.renewal_rate * 100.0
    );
    if s.degraded > 0 {
        println!(
            "{} predictions are hard labels only; the model does not produce probabilities.",
            s.degraded
        );
    }
    for failure in report.failures.iter().take(10) {
        println!("  row {}: {}", failure.row + 1, failure.reason);
    }
    if report.failures.len() > 10 {
        println!("  ... {} more rows skipped", report.failures.len() - 10);
    }
    if let Some(m) = &report.metrics {
        println!(
            "Against the uploaded labels: accuracy {}, ROC-AUC {}",
            fmt_opt(Some(m.accuracy)),
            fmt_opt(m.roc_auc)
        );
    }
    println!("Predictions written to: {}", output.display());
    Ok(())
}

fn handle_predict(
    config: &AppConfig,
    fields: Vec<(String, String)>,
    threshold: Option<f64>,
) -> Result<()> {
    let context = serving_context(config, threshold)?;
    let record = fields
        .into_iter()
        .map(|(key, value)| (key, RawValue::coerce(&value)));
    let result = context.predict_record(record)?;

    let verdict = if result.label == 1 {
        "likely to renew"
    } else {
        "unlikely to renew"
    };
    println!(
        "Renewal probability: {:.4} ({verdict}, threshold {})",
        result.probability,
        context.threshold()
    );
    if result.confidence == renewal::model::Confidence::Degraded {
        println!("The model only produces hard labels; the probability is 0 or 1.");
    }
    Ok(())
}

fn handle_explain(
    config: &AppConfig,
    sample: Option<&Path>,
    top: usize,
    max_rows: usize,
) -> Result<()> {
    let store = open_store(config)?;
    let context = ServingContext::load(&store, config.threshold)?
        .with_rule_format(config.rule_format())
        .with_explainer(Explainer::default().max_sample_rows(max_rows));
    let sample = sample.map(load_dataset).transpose()?;
    let importance = context.importance(sample.as_ref())?;

    if importance.is_empty() {
        println!("No feature importance is available for this model.");
        if sample.is_none() && !context.model().model.capabilities().native_importance {
            println!("Pass --sample <file> to estimate it from example rows.");
        }
        return Ok(());
    }

    println!("{:>4}  {:<32} {:>10}  effect", "rank", "feature", "score");
    for entry in importance.entries.iter().take(top) {
        println!(
            "{:>4}  {:<32} {:>10.4}  {:?}",
            entry.rank, entry.feature, entry.score, entry.effect
        );
    }
    println!();
    for line in importance.describe(3) {
        println!("{line}");
    }
    Ok(())
}

fn handle_rules(config: &AppConfig, top: Option<usize>) -> Result<()> {
    let context = serving_context(config, None)?;
    let rules = context.rules()?;
    let shown = top.unwrap_or(rules.len());
    for rule in rules.iter().take(shown) {
        println!("{rule}");
    }
    if shown < rules.len() {
        println!("... {} more rules", rules.len() - shown);
    }
    Ok(())
}

fn handle_config(config: &AppConfig, path: &Path, write: bool) -> Result<()> {
    if write {
        config::save_app_config(config, path)
            .with_context(|| format!("Failed to write config {}", path.display()))?;
        println!("Configuration written to: {}", path.display());
    } else {
        println!("{}", serde_json::to_string_pretty(config)?);
    }
    Ok(())
}
