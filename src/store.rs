//! Artifact storage for fitted transformers and models.
//!
//! Artifacts are JSON files named `<kind>_<YYYYmmddTHHMMSSmmm>.json` in a
//! single directory. Files are created exclusively and never rewritten;
//! the most recent artifact of each kind is the one with the latest
//! timestamp in its file name.

use crate::error::{RenewalError, Result, ResultExt as _};
use crate::model::ModelArtifact;
use crate::transform::FeatureTransformer;
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

const STAMP_FORMAT: &str = "%Y%m%dT%H%M%S%3f";
const MAX_STAMP_RETRIES: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Transformer,
    Model,
}

impl ArtifactKind {
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Transformer => "transformer",
            Self::Model => "model",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    pub path: PathBuf,
    pub created_at: NaiveDateTime,
}

/// Parse the timestamp out of an artifact file name.
fn parse_stamp(kind: ArtifactKind, file_name: &str) -> Option<NaiveDateTime> {
    let stamp = file_name
        .strip_prefix(kind.prefix())?
        .strip_prefix('_')?
        .strip_suffix(".json")?;
    if stamp.len() != 18 || !stamp.is_char_boundary(15) {
        return None;
    }
    let (seconds, millis) = stamp.split_at(15);
    let base = NaiveDateTime::parse_from_str(seconds, "%Y%m%dT%H%M%S").ok()?;
    let millis: i64 = millis.parse().ok()?;
    Some(base + Duration::milliseconds(millis))
}

#[derive(Debug)]
pub struct ArtifactStore {
    base_path: PathBuf,
}

impl ArtifactStore {
    /// Open a store, creating its directory.
    ///
    /// # Errors
    ///
    /// Fails when the directory cannot be created.
    pub fn new(base_path: PathBuf) -> Result<Self> {
        fs::create_dir_all(&base_path).context("Failed to create artifact directory")?;
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn artifact_path(&self, kind: ArtifactKind, created_at: &DateTime<Utc>) -> PathBuf {
        self.base_path.join(format!(
            "{}_{}.json",
            kind.prefix(),
            created_at.format(STAMP_FORMAT)
        ))
    }

    /// Write a new artifact file. An existing file is never overwritten; on
    /// a name collision the timestamp is bumped by a millisecond.
    fn write_new(&self, kind: ArtifactKind, created_at: DateTime<Utc>, json: &str) -> Result<PathBuf> {
        let mut stamp = created_at;
        for _ in 0..MAX_STAMP_RETRIES {
            let path = self.artifact_path(kind, &stamp);
            match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(json.as_bytes())?;
                    tracing::info!(path = %path.display(), "Saved {} artifact", kind.prefix());
                    return Ok(path);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    stamp += Duration::milliseconds(1);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(RenewalError::Other(format!(
            "Could not find a free {} artifact name in {}",
            kind.prefix(),
            self.base_path.display()
        )))
    }

    /// # Errors
    ///
    /// Returns the I/O error, or `Other` when every timestamped name is taken.
    pub fn save_transformer(&self, transformer: &FeatureTransformer) -> Result<PathBuf> {
        self.write_new(
            ArtifactKind::Transformer,
            transformer.fitted_at(),
            &transformer.to_json()?,
        )
    }

    /// # Errors
    ///
    /// See [`ArtifactStore::save_transformer`].
    pub fn save_model(&self, artifact: &ModelArtifact) -> Result<PathBuf> {
        self.write_new(ArtifactKind::Model, artifact.created_at, &artifact.to_json()?)
    }

    /// All artifacts of a kind, oldest first.
    ///
    /// # Errors
    ///
    /// Returns the I/O error from reading the directory.
    pub fn list(&self, kind: ArtifactKind) -> Result<Vec<StoredArtifact>> {
        let mut found = Vec::new();
        for entry in fs::read_dir(&self.base_path)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(created_at) = parse_stamp(kind, name) {
                found.push(StoredArtifact {
                    path: entry.path(),
                    created_at,
                });
            }
        }
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.path.cmp(&b.path)));
        Ok(found)
    }

    /// # Errors
    ///
    /// See [`ArtifactStore::list`].
    pub fn latest(&self, kind: ArtifactKind) -> Result<Option<StoredArtifact>> {
        Ok(self.list(kind)?.pop())
    }

    /// # Errors
    ///
    /// Returns `NoTransformerAvailable` for an empty store and `CorruptArtifact` for a file that fails validation.
    pub fn load_latest_transformer(&self) -> Result<FeatureTransformer> {
        let stored = self
            .latest(ArtifactKind::Transformer)?
            .ok_or(RenewalError::NoTransformerAvailable)?;
        tracing::debug!(path = %stored.path.display(), "Loading transformer");
        let json = fs::read_to_string(&stored.path)?;
        FeatureTransformer::from_json(&json).map_err(|e| corrupt(&stored.path, e))
    }

    /// # Errors
    ///
    /// Returns `NoModelAvailable` for an empty store and `CorruptArtifact` for a file that fails validation.
    pub fn load_latest_model(&self) -> Result<ModelArtifact> {
        let stored = self
            .latest(ArtifactKind::Model)?
            .ok_or(RenewalError::NoModelAvailable)?;
        tracing::debug!(path = %stored.path.display(), "Loading model");
        let json = fs::read_to_string(&stored.path)?;
        ModelArtifact::from_json(&json).map_err(|e| corrupt(&stored.path, e))
    }
}

fn corrupt(path: &Path, err: RenewalError) -> RenewalError {
    match err {
        RenewalError::CorruptArtifact(msg) => {
            RenewalError::CorruptArtifact(format!("{}: {msg}", path.display()))
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Dataset, RawColumn};
    use crate::model::{DecisionTree, Model, TreeParams};
    use crate::transform::{FeatureVector, TransformOptions};
    use tempfile::TempDir;

    fn transformer() -> Result<FeatureTransformer> {
        let ds = Dataset::new(vec![RawColumn::numbers("age", &[20.0, 40.0])])?;
        FeatureTransformer::fit(&ds, &TransformOptions::default())
    }

    fn model() -> ModelArtifact {
        let tree = DecisionTree::fit(
            &[FeatureVector(vec![20.0]), FeatureVector(vec![40.0])],
            &[0, 1],
            &TreeParams::default(),
        );
        ModelArtifact::new(Model::DecisionTree(tree), vec!["age".to_owned()], None)
    }

    #[test]
    fn test_empty_store_reports_missing_artifacts() -> Result<()> {
        let temp = TempDir::new()?;
        let store = ArtifactStore::new(temp.path().join("artifacts"))?;
        assert!(matches!(
            store.load_latest_model(),
            Err(RenewalError::NoModelAvailable)
        ));
        assert!(matches!(
            store.load_latest_transformer(),
            Err(RenewalError::NoTransformerAvailable)
        ));
        Ok(())
    }

    #[test]
    fn test_latest_by_timestamp() -> Result<()> {
        let temp = TempDir::new()?;
        let store = ArtifactStore::new(temp.path().to_path_buf())?;

        let mut older = model();
        older.created_at -= Duration::days(1);
        let newer = model();
        store.save_model(&newer)?;
        store.save_model(&older)?;

        let loaded = store.load_latest_model()?;
        assert_eq!(loaded.id, newer.id);
        assert_eq!(store.list(ArtifactKind::Model)?.len(), 2);
        Ok(())
    }

    #[test]
    fn test_same_timestamp_never_overwrites() -> Result<()> {
        let temp = TempDir::new()?;
        let store = ArtifactStore::new(temp.path().to_path_buf())?;
        let t = transformer()?;

        let first = store.save_transformer(&t)?;
        let second = store.save_transformer(&t)?;
        assert_ne!(first, second);
        assert_eq!(store.list(ArtifactKind::Transformer)?.len(), 2);
        assert_eq!(store.load_latest_transformer()?, t);
        Ok(())
    }

    #[test]
    fn test_corrupt_file_is_reported() -> Result<()> {
        let temp = TempDir::new()?;
        let store = ArtifactStore::new(temp.path().to_path_buf())?;
        fs::write(temp.path().join("model_20240101T000000000.json"), "{not json")?;
        fs::write(temp.path().join("notes.txt"), "ignored")?;

        assert!(matches!(
            store.load_latest_model(),
            Err(RenewalError::CorruptArtifact(_))
        ));
        Ok(())
    }

    #[test]
    fn test_parse_stamp() {
        let parsed = parse_stamp(ArtifactKind::Model, "model_20240315T101112345.json");
        assert_eq!(
            parsed.map(|t| t.format("%Y-%m-%d %H:%M:%S%.3f").to_string()),
            Some("2024-03-15 10:11:12.345".to_owned())
        );
        assert_eq!(parse_stamp(ArtifactKind::Transformer, "model_20240315T101112345.json"), None);
        assert_eq!(parse_stamp(ArtifactKind::Model, "model_latest.json"), None);
    }
}
