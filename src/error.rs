//! # Errors
//!
//! One error type for the whole crate. Variants fall into three families:
//!
//! - **data shape** (`DimensionMismatch`, `InvalidArgument`, `DuplicateDocument`):
//!   programmer errors, raised immediately and never coerced;
//! - **environmental** (`EmbeddingProvider`, `GenerationProvider`, `Cancelled`,
//!   `Timeout`): failures of the external model provider, surfaced unchanged so
//!   the outer layer can report them;
//! - **lookup / storage** (`AgentNotFound`, `DocumentNotFound`, persistence).
//!
//! `DocumentNotFound` is expected during context assembly (a stale index hit)
//! and is recovered there by skipping the hit.

use thiserror::Error;

/// Boxed error used for provider failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, DocentError>;

#[derive(Error, Debug)]
pub enum DocentError {
    /// Vector length differs from the index dimension.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The identity is already live in the index.
    #[error("document already indexed: {0}")]
    DuplicateDocument(String),

    #[error("agent not found: {0}")]
    AgentNotFound(String),

    #[error("document not found: {0}")]
    DocumentNotFound(String),

    #[error("embedding provider failed: {source}")]
    EmbeddingProvider { source: BoxError },

    #[error("generation provider failed: {source}")]
    GenerationProvider { source: BoxError },

    /// The caller cancelled the request before the provider answered.
    #[error("request cancelled")]
    Cancelled,

    #[error("provider call exceeded {millis}ms deadline")]
    Timeout { millis: u64 },

    #[error("context of {actual} chars exceeds budget of {limit} chars")]
    ContextBudgetExceeded { limit: usize, actual: usize },

    #[error("persisted state is corrupt: {0}")]
    Persistence(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("index encoding failed: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("index decoding failed: {0}")]
    Decode(#[from] bincode::error::DecodeError),
}

impl DocentError {
    pub fn embedding(source: impl Into<BoxError>) -> Self {
        DocentError::EmbeddingProvider {
            source: source.into(),
        }
    }

    pub fn generation(source: impl Into<BoxError>) -> Self {
        DocentError::GenerationProvider {
            source: source.into(),
        }
    }

    /// Stable code for logs.
    pub fn error_code(&self) -> &'static str {
        match self {
            DocentError::DimensionMismatch { .. } => "DIMENSION_MISMATCH",
            DocentError::InvalidArgument(_) => "INVALID_ARGUMENT",
            DocentError::DuplicateDocument(_) => "DUPLICATE_DOCUMENT",
            DocentError::AgentNotFound(_) => "AGENT_NOT_FOUND",
            DocentError::DocumentNotFound(_) => "DOCUMENT_NOT_FOUND",
            DocentError::EmbeddingProvider { .. } => "EMBEDDING_PROVIDER_ERROR",
            DocentError::GenerationProvider { .. } => "GENERATION_PROVIDER_ERROR",
            DocentError::Cancelled => "CANCELLED",
            DocentError::Timeout { .. } => "TIMEOUT",
            DocentError::ContextBudgetExceeded { .. } => "CONTEXT_BUDGET_EXCEEDED",
            DocentError::Persistence(_) => "PERSISTENCE",
            DocentError::Config(_) => "CONFIG",
            DocentError::Io(_) => "IO",
            DocentError::Yaml(_) => "YAML",
            DocentError::Encode(_) => "ENCODE",
            DocentError::Decode(_) => "DECODE",
        }
    }

    /// Failures of the external model provider, including cancellation and deadlines.
    pub fn is_provider_error(&self) -> bool {
        matches!(
            self,
            DocentError::EmbeddingProvider { .. }
                | DocentError::GenerationProvider { .. }
                | DocentError::Cancelled
                | DocentError::Timeout { .. }
        )
    }

    /// Process exit status for the CLI.
    ///
    /// Cancellation and deadlines use the shell conventions (130, 124); other
    /// provider failures exit with 3, caller mistakes with 2, unknown ids with 4.
    pub fn exit_code(&self) -> u8 {
        match self {
            DocentError::Cancelled => 130,
            DocentError::Timeout { .. } => 124,
            e if e.is_provider_error() => 3,
            e if e.is_programmer_error() => 2,
            DocentError::AgentNotFound(_) | DocentError::DocumentNotFound(_) => 4,
            _ => 1,
        }
    }

    /// Data-shape errors caused by the caller.
    pub fn is_programmer_error(&self) -> bool {
        matches!(
            self,
            DocentError::DimensionMismatch { .. }
                | DocentError::InvalidArgument(_)
                | DocentError::DuplicateDocument(_)
        )
    }
}
