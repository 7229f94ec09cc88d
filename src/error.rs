//! Error types for the symptom search engine
//!
//! One enum per component, built with thiserror. Messages carry a
//! `Suggestion:` line so operators can act on them directly.

use std::path::PathBuf;
use thiserror::Error;

use crate::storage::FileFormatError;
use crate::vector::{ClusteringError, VectorError};

/// Errors from the vector record store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error(
        "Vector for '{label}' has {actual} dimensions, expected {expected}\nSuggestion: Ensure every symptom vector comes from the same 384-dimension encoder"
    )]
    DimensionMismatch {
        label: String,
        expected: usize,
        actual: usize,
    },

    #[error("Symptom '{label}' not found\nSuggestion: Check the label or seed the vocabulary first")]
    NotFound { label: String },

    #[error("Failed to persist records to '{path}': {source}")]
    Persistence {
        path: PathBuf,
        source: FileFormatError,
    },

    #[error(
        "Record file '{path}' is unreadable: {source}\nSuggestion: Remove the file and run 'aurora-vector setup' again"
    )]
    Corrupted {
        path: PathBuf,
        source: FileFormatError,
    },
}

/// Errors from the embedding cache
#[derive(Error, Debug)]
pub enum CacheError {
    #[error(
        "Cached vector has {actual} dimensions, expected {expected}\nSuggestion: Only cache vectors produced by the configured encoder"
    )]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Failed to write embedding cache to '{path}': {source}")]
    CacheWriteFailed {
        path: PathBuf,
        source: FileFormatError,
    },

    #[error(
        "Cache file '{path}' is unreadable: {source}\nSuggestion: Delete the cache file; it is rebuilt on demand"
    )]
    Corrupted {
        path: PathBuf,
        source: FileFormatError,
    },
}

/// Errors from building or querying the approximate index
#[derive(Error, Debug)]
pub enum IndexError {
    #[error(
        "Query vector has {actual} dimensions, expected {expected}\nSuggestion: Encode the query with the same model as the vocabulary"
    )]
    DimensionMismatch { expected: usize, actual: usize },

    #[error(
        "Index is {behind} mutations behind the store (threshold {threshold})\nSuggestion: Rebuild the index or enable index.auto_rebuild"
    )]
    IndexStale { behind: u64, threshold: u64 },

    #[error("Index build exceeded its deadline\nSuggestion: Allow a longer deadline or lower index.lists")]
    DeadlineExceeded,

    #[error("Clustering failed: {0}")]
    Clustering(ClusteringError),
}

impl From<VectorError> for IndexError {
    fn from(err: VectorError) -> Self {
        match err {
            VectorError::DimensionMismatch { expected, actual } => {
                Self::DimensionMismatch { expected, actual }
            }
            other => Self::Clustering(ClusteringError::Vector(other)),
        }
    }
}

impl From<ClusteringError> for IndexError {
    fn from(err: ClusteringError) -> Self {
        match err {
            ClusteringError::DeadlineExceeded { .. } => Self::DeadlineExceeded,
            other => Self::Clustering(other),
        }
    }
}

/// Top-level error returned by [`crate::SearchEngine`]
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Embedding(#[from] VectorError),

    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    #[error(
        "Storage at '{path}' is unreachable: {reason}\nSuggestion: Check that the directory exists and is writable"
    )]
    ConnectivityFailed { path: PathBuf, reason: String },

    #[error("Operation exceeded its deadline\nSuggestion: Retry with a longer deadline")]
    DeadlineExceeded,
}

impl EngineError {
    /// Get a stable status code for this error type.
    ///
    /// Integrators can match on this string without depending on the enum.
    pub fn status_code(&self) -> String {
        match self {
            Self::Store(StoreError::DimensionMismatch { .. })
            | Self::Cache(CacheError::DimensionMismatch { .. })
            | Self::Index(IndexError::DimensionMismatch { .. })
            | Self::Embedding(VectorError::DimensionMismatch { .. }) => "DIMENSION_MISMATCH",
            Self::Store(StoreError::NotFound { .. }) => "NOT_FOUND",
            Self::Store(StoreError::Persistence { .. }) => "PERSISTENCE_ERROR",
            Self::Cache(CacheError::CacheWriteFailed { .. }) => "CACHE_WRITE_FAILED",
            Self::Store(StoreError::Corrupted { .. }) | Self::Cache(CacheError::Corrupted { .. }) => {
                "CORRUPTED_FILE"
            }
            Self::Index(IndexError::IndexStale { .. }) => "INDEX_STALE",
            Self::Index(IndexError::DeadlineExceeded) | Self::DeadlineExceeded => {
                "DEADLINE_EXCEEDED"
            }
            Self::Index(IndexError::Clustering(_)) => "CLUSTERING_FAILED",
            Self::Embedding(_) => "EMBEDDING_FAILED",
            Self::Config { .. } => "CONFIG_ERROR",
            Self::ConnectivityFailed { .. } => "CONNECTIVITY_FAILED",
        }
        .to_string()
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            Self::Index(IndexError::IndexStale { .. }) => vec![
                "Run 'aurora-vector rebuild' to publish a fresh index",
                "Set index.auto_rebuild = true to rebuild on demand",
            ],
            Self::Index(IndexError::DeadlineExceeded) | Self::DeadlineExceeded => vec![
                "Retry with a longer deadline",
                "Lower index.lists to shorten the clustering pass",
            ],
            Self::Store(StoreError::Persistence { .. })
            | Self::Cache(CacheError::CacheWriteFailed { .. }) => vec![
                "Check disk space and permissions in the storage directory",
                "In-memory state is intact; call flush() again once storage recovers",
            ],
            Self::ConnectivityFailed { .. } => vec![
                "Create the storage directory or point storage.path elsewhere",
                "Unset storage.path to run fully in memory",
            ],
            Self::Store(StoreError::Corrupted { .. }) | Self::Cache(CacheError::Corrupted { .. }) => {
                vec![
                    "Restore the file from a backup",
                    "Delete the file and run 'aurora-vector setup' to start over",
                ]
            }
            Self::Store(StoreError::NotFound { .. }) => {
                vec!["Run 'aurora-vector setup' to seed the base vocabulary"]
            }
            _ => vec![],
        }
    }
}

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type alias for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

/// Result type alias for index operations
pub type IndexResult<T> = Result<T, IndexError>;

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
