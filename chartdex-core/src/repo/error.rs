//! Repository error types with clear, actionable messages

use std::path::PathBuf;
use thiserror::Error;

use super::storage::StorageError;

/// Result alias used throughout the repository engine
pub type Result<T, E = RepoError> = std::result::Result<T, E>;

/// Coarse classification of a [`RepoError`]
///
/// Lets callers decide between retrying, reconfiguring and giving up
/// without matching on every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Usage,
    NotFound,
    Decode,
    Encode,
    VersionParse,
    Conflict,
    Storage,
    PartialTraversal,
    Chart,
    Cancelled,
}

/// Errors surfaced by the index engine
#[derive(Error, Debug)]
pub enum RepoError {
    /// The caller asked for something contradictory or incomplete
    #[error("{0}")]
    Usage(String),

    /// The repository index is absent where one is required
    #[error("The index file does not exist at {url}.\n\nIf you haven't initialized the repository yet, run:\n  chartdex init {repo_url}")]
    IndexNotFound { url: String, repo_url: String },

    /// A chart version is absent from the index
    #[error("Chart '{name}' version '{version}' not found in the repository index")]
    ChartNotFound { name: String, version: String },

    /// The index document could not be parsed
    #[error("Failed to decode repository index: {reason}")]
    Decode { reason: String },

    /// The index could not be serialized
    #[error("Failed to encode repository index: {reason}")]
    Encode { reason: String },

    /// A chart declared a version that is not semantic versioning
    #[error("Invalid chart version '{version}' for '{name}'")]
    VersionParse {
        name: String,
        version: String,
        #[source]
        source: semver::Error,
    },

    /// The chart version is already published and no override was requested
    #[error("The chart already exists in the repository and cannot be overwritten without an explicit intent.\n\nChart: {name} {version}\n\nTo replace the existing chart, use --force.\nTo leave it untouched and succeed anyway, use --ignore-if-exists.")]
    Conflict { name: String, version: String },

    /// The object store failed
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A rebuild finished but some objects could not be indexed
    #[error("Reindex completed with {failed} failed object(s) out of {total}; the rebuilt index is incomplete")]
    PartialTraversal { failed: usize, total: usize },

    /// The artifact is not a readable chart archive
    #[error("Invalid chart archive {file}: {reason}")]
    Chart { file: String, reason: String },

    /// Repository configuration could not be read or written
    #[error("Repository configuration error at {path}: {reason}")]
    Config { path: PathBuf, reason: String },

    /// Local cache write failed
    #[error("Failed to write local index cache to {path}")]
    CacheWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The operation was cancelled before it finished
    #[error("Operation cancelled")]
    Cancelled,
}

impl RepoError {
    pub fn usage(message: impl Into<String>) -> Self {
        RepoError::Usage(message.into())
    }

    pub fn decode(reason: impl ToString) -> Self {
        RepoError::Decode {
            reason: reason.to_string(),
        }
    }

    pub fn encode(reason: impl ToString) -> Self {
        RepoError::Encode {
            reason: reason.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            RepoError::Usage(_) | RepoError::Config { .. } => ErrorKind::Usage,
            RepoError::IndexNotFound { .. } | RepoError::ChartNotFound { .. } => {
                ErrorKind::NotFound
            }
            RepoError::Decode { .. } => ErrorKind::Decode,
            RepoError::Encode { .. } => ErrorKind::Encode,
            RepoError::VersionParse { .. } => ErrorKind::VersionParse,
            RepoError::Conflict { .. } => ErrorKind::Conflict,
            RepoError::Storage(StorageError::NotFound { .. }) => ErrorKind::NotFound,
            RepoError::Cancelled => ErrorKind::Cancelled,
            RepoError::Storage(_) | RepoError::CacheWrite { .. } => ErrorKind::Storage,
            RepoError::PartialTraversal { .. } => ErrorKind::PartialTraversal,
            RepoError::Chart { .. } => ErrorKind::Chart,
        }
    }

    /// Only transient storage failures are worth retrying as-is
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Storage
    }
}
