use crate::types::RunState;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Failure reported by an external collaborator (model, ad platform,
/// embedding service, vector store).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("request rejected: {0}")]
    Rejected(String),
}

impl ProviderError {
    /// Timeouts, rate limits and outages are worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::Timeout(_) | ProviderError::RateLimited(_) | ProviderError::Unavailable(_)
        )
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, ProviderError::Auth(_))
    }
}

#[derive(Error, Debug, Clone)]
pub enum PipelineError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Generation error: {0}")]
    Generation(ProviderError),

    #[error("Enrichment error for '{keyword}': {source}")]
    Enrichment {
        keyword: String,
        #[source]
        source: ProviderError,
    },

    #[error("Embedding error: {0}")]
    Embedding(ProviderError),

    #[error("Vector store error: {0}")]
    Store(ProviderError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No viable candidates left after {stage}")]
    NoViableCandidates { stage: RunState },

    #[error("Run cancelled")]
    Cancelled,

    #[error("Invalid run transition from {from} to {to}")]
    InvalidTransition { from: RunState, to: RunState },
}

impl PipelineError {
    /// Whether the orchestrator may retry the stage that produced this error.
    /// Malformed output counts as retryable for generation only.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Generation(e) => {
                e.is_transient() || matches!(e, ProviderError::Malformed(_))
            }
            PipelineError::Enrichment { source, .. } => source.is_transient(),
            PipelineError::Embedding(e) | PipelineError::Store(e) => e.is_transient(),
            PipelineError::Validation(_)
            | PipelineError::Config(_)
            | PipelineError::NoViableCandidates { .. }
            | PipelineError::Cancelled
            | PipelineError::InvalidTransition { .. } => false,
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            PipelineError::Validation(_) => ErrorClass::Validation,
            PipelineError::Generation(_) => ErrorClass::Generation,
            PipelineError::Enrichment { .. } => ErrorClass::Enrichment,
            PipelineError::Embedding(_) => ErrorClass::Embedding,
            PipelineError::Store(_) => ErrorClass::Store,
            PipelineError::Config(_) => ErrorClass::Config,
            PipelineError::NoViableCandidates { .. } => ErrorClass::NoViableCandidates,
            PipelineError::Cancelled => ErrorClass::Cancelled,
            PipelineError::InvalidTransition { .. } => ErrorClass::InvalidTransition,
        }
    }

    /// Authentication failures from any provider are configuration problems:
    /// fatal, never retried.
    pub fn from_provider(err: ProviderError, wrap: fn(ProviderError) -> PipelineError) -> Self {
        if err.is_auth() {
            PipelineError::Config(err.to_string())
        } else {
            wrap(err)
        }
    }
}

/// Serializable error category carried by failure reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Validation,
    Generation,
    Enrichment,
    Embedding,
    Store,
    Config,
    NoViableCandidates,
    Cancelled,
    InvalidTransition,
}
