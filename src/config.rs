//! Application configuration.
//!
//! Stored as JSON at `<data dir>/renewal/config.json`. Every field has a
//! default, so a partial file only overrides what it names and a missing
//! file means "all defaults".

use crate::error::{RenewalError, Result};
use crate::model::{BoostingParams, TreeParams};
use crate::rules::{RuleFormat, Unit};
use crate::training::{DEFAULT_IDENTIFIER_COLUMNS, TrainingOptions};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct TrainingDefaults {
    pub test_fraction: f64,
    pub seed: u64,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub forest_trees: usize,
    pub boosting_rounds: usize,
    pub learning_rate: f64,
    /// Iteration cap for logistic regression
    pub max_iterations: u64,
}

impl Default for TrainingDefaults {
    fn default() -> Self {
        Self {
            test_fraction: 0.2,
            seed: 42,
            max_depth: 5,
            min_samples_split: 2,
            min_samples_leaf: 1,
            forest_trees: 50,
            boosting_rounds: 50,
            learning_rate: 0.1,
            max_iterations: 200,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Where transformer and model artifacts live. Defaults to
    /// `<data dir>/renewal/artifacts`.
    pub artifact_dir: Option<PathBuf>,
    /// Ground-truth column, excluded from features
    pub label_column: String,
    /// Identifier columns, excluded from features
    pub identifier_columns: Vec<String>,
    /// Probability at or above which a customer is predicted to renew
    pub threshold: f64,
    /// Unit overrides for rule thresholds, keyed by feature name
    pub units: BTreeMap<String, Unit>,
    /// Display labels for rule conditions, keyed by feature name
    pub display_names: BTreeMap<String, String>,
    pub training: TrainingDefaults,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            artifact_dir: None,
            label_column: "Renewed".to_owned(),
            identifier_columns: DEFAULT_IDENTIFIER_COLUMNS.map(str::to_owned).to_vec(),
            threshold: 0.5,
            units: BTreeMap::new(),
            display_names: BTreeMap::new(),
            training: TrainingDefaults::default(),
        }
    }
}

impl AppConfig {
    pub fn artifact_dir(&self) -> PathBuf {
        self.artifact_dir
            .clone()
            .unwrap_or_else(|| crate::utils::standard_paths().artifacts_dir)
    }

    /// # Errors
    ///
    /// Returns `Config` naming the first out-of-range field.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(RenewalError::Config(format!(
                "threshold must be within [0, 1], got {}",
                self.threshold
            )));
        }
        if !(0.0..1.0).contains(&self.training.test_fraction) {
            return Err(RenewalError::Config(format!(
                "training.test_fraction must be within [0, 1), got {}",
                self.training.test_fraction
            )));
        }
        if self.label_column.trim().is_empty() {
            return Err(RenewalError::Config("label_column must not be empty".to_owned()));
        }
        Ok(())
    }

    pub fn training_options(&self) -> TrainingOptions {
        let t = &self.training;
        TrainingOptions {
            label_column: self.label_column.clone(),
            identifier_columns: self.identifier_columns.clone(),
            test_fraction: t.test_fraction,
            seed: t.seed,
            threshold: self.threshold,
            tree: TreeParams {
                max_depth: t.max_depth,
                min_samples_split: t.min_samples_split,
                min_samples_leaf: t.min_samples_leaf,
                max_features: None,
            },
            forest_trees: t.forest_trees,
            boosting: BoostingParams {
                rounds: t.boosting_rounds,
                learning_rate: t.learning_rate,
                max_depth: t.max_depth.min(3),
                min_samples_leaf: t.min_samples_leaf,
            },
            max_iterations: t.max_iterations,
        }
    }

    pub fn rule_format(&self) -> RuleFormat {
        RuleFormat {
            units: self.units.clone(),
            labels: self.display_names.clone(),
        }
    }
}

pub fn get_config_path() -> PathBuf {
    crate::utils::standard_paths().base_dir.join("config.json")
}

/// Load the default config file, falling back to defaults when it is
/// missing or unreadable.
pub fn load_app_config() -> AppConfig {
    let path = get_config_path();
    match load_app_config_from(&path) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable config file");
            AppConfig::default()
        }
    }
}

/// Load an explicit config file. A missing file yields defaults; a file
/// that exists but does not parse is an error.
///
/// # Errors
///
/// Returns `Config` for a file that does not parse or validate, and the I/O error for one that cannot be read.
pub fn load_app_config_from(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = serde_json::from_str(&content)
        .map_err(|e| RenewalError::Config(format!("{}: {e}", path.display())))?;
    config.validate()?;
    Ok(config)
}

/// Write `config` as pretty JSON, creating parent directories.
///
/// # Errors
///
/// Returns the I/O error from creating the directory or writing the file.
pub fn save_app_config(config: &AppConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
