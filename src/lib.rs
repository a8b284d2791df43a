use std::fmt;

use thiserror::Error;

use crate::catalog::ItemId;

pub type Result<T> = std::result::Result<T, CinebrainError>;

/// Stage of a recommendation request, attached to failures for context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Embedding,
    Search,
}

impl fmt::Display for Phase {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Embedding => f.write_str("embedding"),
            Self::Search => f.write_str("search"),
        }
    }
}

#[derive(Error, Debug)]
pub enum CinebrainError {
    #[error("Embedding provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Invalid embedding response: {0}")]
    InvalidResponse(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Item not found: {0}")]
    NotFound(ItemId),

    #[error("Index is empty, build it before querying")]
    EmptyIndex,

    #[error("Corrupt index: {0}")]
    CorruptIndex(String),

    #[error("Internal inconsistency between index and metadata: {0}")]
    InternalInconsistency(String),

    #[error("Recommendation failed during {phase}: {cause}")]
    RecommendationFailed {
        phase: Phase,
        #[source]
        cause: Box<CinebrainError>,
    },

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl CinebrainError {
    /// Wrap an error with the phase of the recommendation it happened in.
    #[inline]
    pub fn during(phase: Phase, cause: Self) -> Self {
        Self::RecommendationFailed {
            phase,
            cause: Box::new(cause),
        }
    }

    /// The innermost error, looking through `RecommendationFailed`.
    #[inline]
    pub fn root_cause(&self) -> &Self {
        match self {
            Self::RecommendationFailed { cause, .. } => cause.root_cause(),
            other => other,
        }
    }

    /// Only provider outages are worth retrying without changing the input.
    #[inline]
    pub fn is_retryable(&self) -> bool {
        matches!(self.root_cause(), Self::ProviderUnavailable(_))
    }
}

pub mod catalog;
pub mod commands;
pub mod config;
pub mod database;
pub mod embeddings;
pub mod engine;
pub mod features;
