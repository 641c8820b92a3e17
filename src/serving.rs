//! Serving context: the immutable transformer/model pair every request
//! runs against, and a handle that swaps it atomically.
//!
//! A [`ServingHandle`] starts out not ready. Until a context has been
//! loaded every request fails with [`RenewalError::NotReady`]; a failed
//! reload leaves the previous context in place.
//!
//! ```no_run
//! use renewal::data::RawValue;
//! use renewal::serving::ServingHandle;
//! use renewal::store::ArtifactStore;
//!
//! # fn main() -> renewal::error::Result<()> {
//! let store = ArtifactStore::new("artifacts".into())?;
//! let handle = ServingHandle::new();
//! handle.reload(&store, 0.5)?;
//!
//! let context = handle.current()?;
//! let result = context.predict_record([
//!     ("age", RawValue::coerce("42")),
//!     ("plan", RawValue::coerce("gold")),
//! ])?;
//! println!("renewal probability: {:.2}", result.probability);
//! # Ok(())
//! # }
//! ```

use crate::data::{Dataset, RawValue};
use crate::error::{RenewalError, Result};
use crate::explain::{Explainer, Importance};
use crate::model::{ModelArtifact, PredictionResult};
use crate::rules::{self, DecisionRule, RuleFormat};
use crate::store::ArtifactStore;
use crate::transform::{FeatureTransformer, FeatureVector};
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Debug, Clone)]
pub struct ServingContext {
    transformer: Arc<FeatureTransformer>,
    model: Arc<ModelArtifact>,
    threshold: f64,
    rule_format: RuleFormat,
    explainer: Arc<Explainer>,
}

impl ServingContext {
    /// Pair a transformer and model. They must agree on the encoded
    /// feature names, and the threshold must lie in `[0, 1]`.
    ///
    /// # Errors
    ///
    /// Returns `Config` for a bad threshold and `CorruptArtifact` when the
    /// model was trained against a different transformer.
    pub fn new(transformer: FeatureTransformer, model: ModelArtifact, threshold: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(RenewalError::Config(format!(
                "Decision threshold {threshold} is outside [0, 1]"
            )));
        }
        let names = transformer.feature_names();
        if names != model.feature_names {
            return Err(RenewalError::CorruptArtifact(format!(
                "Transformer encodes {} features but the model was trained on {}; \
                 the latest artifacts do not belong to the same training run",
                names.len(),
                model.feature_names.len()
            )));
        }
        if let Some(expected) = model.transformer_fitted_at
            && expected != transformer.fitted_at()
        {
            return Err(RenewalError::CorruptArtifact(format!(
                "Model {} was trained against the transformer fitted at {expected}, \
                 but the latest transformer was fitted at {}",
                model.id,
                transformer.fitted_at()
            )));
        }

        Ok(Self {
            transformer: Arc::new(transformer),
            model: Arc::new(model),
            threshold,
            rule_format: RuleFormat::default(),
            explainer: Arc::new(Explainer::default()),
        })
    }

    /// Build a context from the most recent artifacts in a store.
    ///
    /// # Errors
    ///
    /// Fails when the store holds no transformer or model, or when the
    /// latest pair does not belong together.
    pub fn load(store: &ArtifactStore, threshold: f64) -> Result<Self> {
        let transformer = store.load_latest_transformer()?;
        let model = store.load_latest_model()?;
        tracing::info!(
            model = %model.id,
            family = %model.family(),
            features = transformer.output_width(),
            "Loaded serving artifacts"
        );
        Self::new(transformer, model, threshold)
    }

    pub fn with_rule_format(mut self, format: RuleFormat) -> Self {
        self.rule_format = format;
        self
    }

    pub fn with_explainer(mut self, explainer: Explainer) -> Self {
        self.explainer = Arc::new(explainer);
        self
    }

    pub fn transformer(&self) -> &FeatureTransformer {
        &self.transformer
    }

    pub fn model(&self) -> &ModelArtifact {
        &self.model
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// # Errors
    ///
    /// Returns `PredictionFailure` when the vector does not fit the model.
    pub fn predict_features(&self, features: &FeatureVector) -> Result<PredictionResult> {
        self.model.model.predict(features, self.threshold)
    }

    /// Score every row. Only a column-set mismatch fails the whole call;
    /// individual rows report their own failures.
    ///
    /// # Errors
    ///
    /// Returns `SchemaMismatch` when the columns differ from training.
    pub fn predict_rows(&self, dataset: &Dataset) -> Result<Vec<Result<PredictionResult>>> {
        Ok(self
            .transformer
            .apply_rows(dataset)?
            .into_iter()
            .map(|row| row.and_then(|features| self.predict_features(&features)))
            .collect())
    }

    /// Score a single flat record.
    ///
    /// # Errors
    ///
    /// Returns `SchemaMismatch` for a wrong field set and `InvalidRecord`
    /// when a value cannot be encoded.
    pub fn predict_record<I, K>(&self, fields: I) -> Result<PredictionResult>
    where
        I: IntoIterator<Item = (K, RawValue)>,
        K: Into<String>,
    {
        let record = Dataset::from_record(fields)?;
        let features = self
            .transformer
            .apply(&record)?
            .pop()
            .ok_or_else(|| RenewalError::DataProcessing("Empty record".to_owned()))?;
        self.predict_features(&features)
    }

    /// Feature importance for the loaded model. `sample` rows that fail to
    /// encode are left out of the attribution fallback.
    ///
    /// # Errors
    ///
    /// Returns `SchemaMismatch` when the sample has the wrong columns.
    pub fn importance(&self, sample: Option<&Dataset>) -> Result<Importance> {
        let encoded: Option<Vec<FeatureVector>> = match sample {
            Some(ds) => Some(
                self.transformer
                    .apply_rows(ds)?
                    .into_iter()
                    .filter_map(Result::ok)
                    .collect(),
            ),
            None => None,
        };
        Ok(self.explainer.importance(
            &self.model.model,
            &self.model.feature_names,
            encoded.as_deref(),
        ))
    }

    /// Decision rules of a single-tree model.
    ///
    /// # Errors
    ///
    /// Returns `RulesUnavailable` for every other family.
    pub fn rules(&self) -> Result<Vec<DecisionRule>> {
        let tree = self.model.model.as_tree().ok_or_else(|| {
            RenewalError::RulesUnavailable(format!(
                "the loaded model is a {} model, not a single decision tree",
                self.model.family()
            ))
        })?;
        Ok(rules::extract_rules(
            tree,
            &self.transformer.origins(),
            &self.rule_format,
        ))
    }
}

/// Shared, atomically swappable access to the active [`ServingContext`].
#[derive(Debug, Default)]
pub struct ServingHandle {
    current: RwLock<Option<Arc<ServingContext>>>,
}

impl ServingHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_ready(&self) -> bool {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// The context requests should capture and use for their whole run.
    ///
    /// # Errors
    ///
    /// Returns `NotReady` until a context has been installed.
    pub fn current(&self) -> Result<Arc<ServingContext>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(RenewalError::NotReady)
    }

    /// Install a new context, returning the previous one.
    pub fn swap(&self, context: ServingContext) -> Option<Arc<ServingContext>> {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        guard.replace(Arc::new(context))
    }

    /// Rebuild from the store. On failure the current context is kept.
    ///
    /// # Errors
    ///
    /// Returns the error from [`ServingContext::load`].
    pub fn reload(&self, store: &ArtifactStore, threshold: f64) -> Result<()> {
        self.reload_with(|| ServingContext::load(store, threshold))
    }

    /// Swap in the context built by `build`, or keep the current one and
    /// return the build error.
    ///
    /// # Errors
    ///
    /// Returns whatever `build` returns.
    pub fn reload_with<F>(&self, build: F) -> Result<()>
    where
        F: FnOnce() -> Result<ServingContext>,
    {
        match build() {
            Ok(context) => {
                self.swap(context);
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, ready = self.is_ready(), "Serving context reload failed");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::RawColumn;
    use crate::model::{DecisionTree, LogisticModel, Model, TreeParams};
    use crate::transform::TransformOptions;

    fn fitted() -> Result<(FeatureTransformer, ModelArtifact)> {
        let ds = Dataset::new(vec![
            RawColumn::numbers("age", &[20.0, 30.0, 50.0, 60.0]),
            RawColumn::texts("plan", &["basic", "basic", "gold", "gold"]),
        ])?;
        let transformer = FeatureTransformer::fit(&ds, &TransformOptions::default())?;
        let x = transformer.apply(&ds)?;
        let tree = DecisionTree::fit(&x, &[0, 0, 1, 1], &TreeParams::default());
        let artifact = ModelArtifact::for_transformer(Model::DecisionTree(tree), &transformer, None);
        Ok((transformer, artifact))
    }

    #[test]
    fn test_handle_not_ready_until_loaded() -> Result<()> {
        let handle = ServingHandle::new();
        assert!(matches!(handle.current(), Err(RenewalError::NotReady)));

        let (t, m) = fitted()?;
        handle.swap(ServingContext::new(t, m, 0.5)?);
        assert!(handle.is_ready());

        let ctx = handle.current()?;
        let result = ctx.predict_record([
            ("age", RawValue::coerce("55")),
            ("plan", RawValue::coerce("gold")),
        ])?;
        assert_eq!(result.label, 1);
        Ok(())
    }

    #[test]
    fn test_failed_reload_keeps_previous_context() -> Result<()> {
        let handle = ServingHandle::new();
        let (t, m) = fitted()?;
        handle.swap(ServingContext::new(t, m, 0.5)?);
        let before = handle.current()?;

        let temp = tempfile::tempdir()?;
        let empty = ArtifactStore::new(temp.path().to_path_buf())?;
        assert!(matches!(
            handle.reload(&empty, 0.5),
            Err(RenewalError::NoTransformerAvailable)
        ));
        assert!(Arc::ptr_eq(&before, &handle.current()?));
        Ok(())
    }

    #[test]
    fn test_mismatched_artifacts_rejected() -> Result<()> {
        let (t, _) = fitted()?;
        let linear = ModelArtifact::new(
            Model::Linear(LogisticModel {
                coefficients: vec![1.0],
                intercept: 0.0,
            }),
            vec!["age".to_owned()],
            None,
        );
        assert!(matches!(
            ServingContext::new(t.clone(), linear, 0.5),
            Err(RenewalError::CorruptArtifact(_))
        ));

        let (_, m) = fitted()?;
        assert!(matches!(
            ServingContext::new(t, m, 1.5),
            Err(RenewalError::Config(_))
        ));
        Ok(())
    }

    #[test]
    fn test_model_from_another_training_run_rejected() -> Result<()> {
        let (t, mut m) = fitted()?;
        m.transformer_fitted_at = t.fitted_at().checked_sub_signed(chrono::TimeDelta::seconds(1));
        assert!(matches!(
            ServingContext::new(t.clone(), m.clone(), 0.5),
            Err(RenewalError::CorruptArtifact(_))
        ));

        // Older artifacts that do not record their transformer still load.
        m.transformer_fitted_at = None;
        assert!(ServingContext::new(t, m, 0.5).is_ok());
        Ok(())
    }

    #[test]
    fn test_rules_only_for_single_tree() -> Result<()> {
        let (t, m) = fitted()?;
        let ctx = ServingContext::new(t.clone(), m, 0.5)?;
        let rules = ctx.rules()?;
        assert_eq!(rules.iter().map(|r| r.samples).sum::<usize>(), 4);

        let linear = ModelArtifact::new(
            Model::Linear(LogisticModel {
                coefficients: vec![0.1, 0.2, 0.3],
                intercept: 0.0,
            }),
            t.feature_names(),
            None,
        );
        let ctx = ServingContext::new(t, linear, 0.5)?;
        assert!(matches!(ctx.rules(), Err(RenewalError::RulesUnavailable(_))));
        Ok(())
    }
}
