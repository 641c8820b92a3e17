//! Error handling for renewal prediction.
//!
//! Every component reports failures as a [`RenewalError`] so the calling
//! layer (the CLI, or any service embedding the library) can decide how to
//! surface them. Nothing in the library terminates the process.
//!
//! ## Error kinds
//!
//! ```
//! use renewal::error::RenewalError;
//!
//! fn describe(err: &RenewalError) -> &'static str {
//!     match err {
//!         RenewalError::SchemaMismatch { .. } => "upload does not match the trained schema",
//!         RenewalError::NoModelAvailable | RenewalError::NoTransformerAvailable => "train first",
//!         RenewalError::NotReady => "service is still loading",
//!         _ => "request failed",
//!     }
//! }
//! ```
//!
//! Unseen categorical values are deliberately absent from this list: the
//! transformer encodes them as an all-zero indicator block. A model with no
//! usable importance method likewise yields an empty ranking rather than an
//! error.
//!
//! ## Context extension trait
//!
//! ```no_run
//! use renewal::error::ResultExt as _;
//!
//! fn read_upload(path: &str) -> renewal::error::Result<String> {
//!     std::fs::read_to_string(path).context("Failed to read upload")
//! }
//! ```

use std::fmt;

/// Main error type for renewal operations.
#[derive(Debug)]
pub enum RenewalError {
    /// Apply-time column drift against the fit-time schema
    SchemaMismatch {
        missing: Vec<String>,
        unexpected: Vec<String>,
    },

    /// A single record carries a value the transformer cannot encode
    InvalidRecord {
        row: usize,
        column: String,
        reason: String,
    },

    /// No model artifact has been persisted yet
    NoModelAvailable,

    /// No transformer artifact has been persisted yet
    NoTransformerAvailable,

    /// A persisted artifact failed validation on load
    CorruptArtifact(String),

    /// The model raised during inference
    PredictionFailure(String),

    /// Serving context not loaded; predictions are refused
    NotReady,

    /// Rule extraction requested for a model that is not a single tree
    RulesUnavailable(String),

    /// Model fitting failed
    Training(String),

    /// I/O errors (artifact files, uploads)
    Io(std::io::Error),

    /// Data processing errors (Polars, parsing, etc.)
    DataProcessing(String),

    /// Configuration errors
    Config(String),

    /// Generic error with context
    Other(String),
}

impl fmt::Display for RenewalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SchemaMismatch {
                missing,
                unexpected,
            } => {
                write!(f, "Schema mismatch:")?;
                if !missing.is_empty() {
                    write!(f, " missing columns [{}]", missing.join(", "))?;
                }
                if !unexpected.is_empty() {
                    write!(f, " unexpected columns [{}]", unexpected.join(", "))?;
                }
                Ok(())
            }
            Self::InvalidRecord {
                row,
                column,
                reason,
            } => write!(f, "Invalid value in row {row}, column '{column}': {reason}"),
            Self::NoModelAvailable => write!(f, "No trained model is available"),
            Self::NoTransformerAvailable => write!(f, "No fitted feature transformer is available"),
            Self::CorruptArtifact(msg) => write!(f, "Corrupt artifact: {msg}"),
            Self::PredictionFailure(msg) => write!(f, "Prediction failed: {msg}"),
            Self::NotReady => write!(
                f,
                "Service not ready: model and transformer must both be loaded"
            ),
            Self::RulesUnavailable(msg) => write!(f, "Decision rules unavailable: {msg}"),
            Self::Training(msg) => write!(f, "Training failed: {msg}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::DataProcessing(msg) => write!(f, "Data processing error: {msg}"),
            Self::Config(msg) => write!(f, "Configuration error: {msg}"),
            Self::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for RenewalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl RenewalError {
    /// True for failures caused by a single request's input rather than
    /// by the loaded artifacts.
    pub fn is_request_error(&self) -> bool {
        matches!(
            self,
            Self::SchemaMismatch { .. } | Self::InvalidRecord { .. } | Self::DataProcessing(_)
        )
    }
}

impl From<std::io::Error> for RenewalError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<anyhow::Error> for RenewalError {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}

impl From<serde_json::Error> for RenewalError {
    fn from(err: serde_json::Error) -> Self {
        Self::CorruptArtifact(format!("JSON error: {err}"))
    }
}

impl From<polars::error::PolarsError> for RenewalError {
    fn from(err: polars::error::PolarsError) -> Self {
        Self::DataProcessing(err.to_string())
    }
}

impl From<RenewalError> for String {
    fn from(err: RenewalError) -> Self {
        err.to_string()
    }
}

/// Result type alias for renewal operations.
pub type Result<T> = std::result::Result<T, RenewalError>;

/// Extension trait to add context to results.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, msg: impl Into<String>) -> Result<T>;

    /// Add context using a closure (lazy evaluation).
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<RenewalError>,
{
    fn context(self, msg: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let err: RenewalError = e.into();
            RenewalError::Other(format!("{}: {}", msg.into(), err))
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let err: RenewalError = e.into();
            RenewalError::Other(format!("{}: {}", f(), err))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_mismatch_display() {
        let err = RenewalError::SchemaMismatch {
            missing: vec!["age".to_owned()],
            unexpected: vec!["agee".to_owned()],
        };
        assert_eq!(
            err.to_string(),
            "Schema mismatch: missing columns [age] unexpected columns [agee]"
        );
        assert!(err.is_request_error());
    }

    #[test]
    fn test_error_conversion_to_string() {
        let err = RenewalError::NotReady;
        let s: String = err.into();
        assert!(s.starts_with("Service not ready"));
    }

    #[test]
    fn test_result_context() {
        let result: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "model.json",
        ));

        let result: Result<()> = result.context("Failed to read artifact");
        let err = result.expect_err("context keeps the error");
        assert!(err.to_string().contains("Failed to read artifact"));
        assert!(!err.is_request_error());
    }
}
