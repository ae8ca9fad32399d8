//! Error types for rulevault.
//!
//! Library crates use [`RuleVaultError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Ingestion stage that a [`RuleVaultError::Stage`] failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Extraction,
    Chunking,
    Embedding,
    Indexing,
}

impl Stage {
    /// Lowercase stage name as it appears in ingestion reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Extraction => "extraction",
            Self::Chunking => "chunking",
            Self::Embedding => "embedding",
            Self::Indexing => "indexing",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level error type for all rulevault operations.
#[derive(Debug, thiserror::Error)]
pub enum RuleVaultError {
    /// The PDF could not be opened or parsed.
    #[error("extraction error in {path:?}: {message}")]
    Extraction { path: PathBuf, message: String },

    /// A single table could not be extracted. Logged and skipped, never fatal.
    #[error("table extraction warning on page {page}: {message}")]
    TableExtraction { page: u32, message: String },

    /// The embedding model could not be loaded or reached at construction.
    #[error("embedding model error: {0}")]
    EmbeddingModel(String),

    /// Inference failed for a batch of inputs.
    #[error("embedding error: {0}")]
    Embedding(String),

    /// The vector index is unreachable or rejected a request.
    #[error("vector index unavailable: {0}")]
    IndexUnavailable(String),

    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Parsing error (content type names, filter expressions, payloads).
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// An ingestion stage failed; wraps the underlying cause.
    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<RuleVaultError>,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, RuleVaultError>;

impl RuleVaultError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create an extraction error for the given PDF path.
    pub fn extraction(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Self::Extraction {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Attribute this error to an ingestion stage.
    pub fn in_stage(self, stage: Stage) -> Self {
        Self::Stage {
            stage,
            source: Box::new(self),
        }
    }

    /// The stage this error was attributed to, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = RuleVaultError::config("missing API key");
        assert_eq!(err.to_string(), "config error: missing API key");

        let err = RuleVaultError::validation("unknown content type 'potion'");
        assert!(err.to_string().contains("potion"));
    }

    #[test]
    fn stage_wrapping_reports_stage() {
        let err = RuleVaultError::IndexUnavailable("connection refused".into())
            .in_stage(Stage::Indexing);
        assert_eq!(err.stage(), Some(Stage::Indexing));
        assert_eq!(
            err.to_string(),
            "indexing stage failed: vector index unavailable: connection refused"
        );
    }

    #[test]
    fn unstaged_error_has_no_stage() {
        let err = RuleVaultError::EmbeddingModel("no such model".into());
        assert_eq!(err.stage(), None);
    }
}
