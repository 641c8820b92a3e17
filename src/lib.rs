//! # Renewal - explainable insurance renewal prediction
//!
//! Renewal trains classifiers that predict whether a customer will renew
//! their policy, scores uploaded customer tables with them and explains
//! what drives the predictions.
//!
//! ## Quick Start
//!
//! ```no_run
//! use renewal::data::io::{frame_to_dataset, load_df};
//! use renewal::model::ModelFamily;
//! use renewal::store::ArtifactStore;
//! use renewal::training::{self, TrainingOptions};
//!
//! # fn main() -> anyhow::Result<()> {
//! let df = load_df("policies.csv".as_ref())?;
//! let dataset = frame_to_dataset(&df)?;
//!
//! let outcome = training::train(&dataset, ModelFamily::DecisionTree, &TrainingOptions::default())?;
//! for line in outcome.interpretation() {
//!     println!("{line}");
//! }
//!
//! let store = ArtifactStore::new("artifacts".into())?;
//! store.save_transformer(&outcome.transformer)?;
//! store.save_model(&outcome.artifact)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Core Modules
//!
//! - [`data`]: raw datasets, file I/O and schema profiling
//! - [`transform`]: the fitted raw-row to feature-vector mapping
//! - [`model`]: model families, predictions and persisted artifacts
//! - [`training`]: cleaning, hold-out split, fitting and evaluation
//! - [`store`]: timestamped artifact files and latest-artifact lookup
//! - [`serving`]: the immutable context every request runs against
//! - [`scoring`]: batch scoring with per-row failure reporting
//! - [`explain`]: feature importance with an attribution fallback
//! - [`rules`]: human-readable rules from single decision trees
//!
//! ## Serving
//!
//! A [`serving::ServingContext`] pairs the latest transformer and model.
//! It is built once, shared behind an `Arc` and swapped as a whole when
//! new artifacts are trained:
//!
//! ```no_run
//! use renewal::serving::ServingHandle;
//! use renewal::store::ArtifactStore;
//!
//! # fn main() -> renewal::error::Result<()> {
//! let store = ArtifactStore::new("artifacts".into())?;
//! let handle = ServingHandle::new();
//! handle.reload(&store, 0.5)?;
//!
//! let context = handle.current()?;
//! for rule in context.rules()? {
//!     println!("{rule}");
//! }
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all, rust_2018_idioms)]

pub mod config;
pub mod data;
pub mod error;
pub mod explain;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod rules;
pub mod scoring;
pub mod serving;
pub mod store;
pub mod training;
pub mod transform;
pub mod utils;
