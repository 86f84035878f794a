//! Error types for the data-access layer and its collaborators.

use crate::models::TenantId;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Where a knowledge ingestion request stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStage {
    Validation,
    Embedding,
    Storage,
    Transport,
}

impl fmt::Display for IngestStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IngestStage::Validation => "validation",
            IngestStage::Embedding => "embedding",
            IngestStage::Storage => "storage",
            IngestStage::Transport => "transport",
        };
        f.write_str(name)
    }
}

/// Errors reported by a knowledge indexing service.
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("vector storage failed: {0}")]
    Storage(String),

    /// The service could not be reached or answered with something unusable.
    #[error("index service unreachable: {0}")]
    Transport(String),
}

impl IndexError {
    pub fn stage(&self) -> IngestStage {
        match self {
            IndexError::Embedding(_) => IngestStage::Embedding,
            IndexError::Storage(_) => IngestStage::Storage,
            IndexError::Transport(_) => IngestStage::Transport,
        }
    }
}

/// Errors surfaced by the repositories and the knowledge gateway.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("invalid input: {0}")]
    Validation(String),

    /// A unique key (slug, api key, ...) already belongs to another row.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("upstream {stage} failed: {source}")]
    UpstreamFailure {
        stage: IngestStage,
        #[source]
        source: IndexError,
    },

    #[error("upstream call did not finish within {0:?}")]
    UpstreamTimeout(Duration),

    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),

    /// A stored row could not be decoded into its model.
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        StoreError::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    pub fn tenant_not_found(tenant_id: TenantId) -> Self {
        Self::not_found("tenant", tenant_id)
    }

    /// The ingestion stage this error belongs to, if it came from ingestion.
    pub fn stage(&self) -> Option<IngestStage> {
        match self {
            StoreError::Validation(_) => Some(IngestStage::Validation),
            StoreError::UpstreamFailure { stage, .. } => Some(*stage),
            StoreError::UpstreamTimeout(_) => Some(IngestStage::Transport),
            _ => None,
        }
    }

    /// Whether repeating the same call could succeed. The gateway never retries on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::UpstreamTimeout(_)
                | StoreError::UpstreamFailure {
                    stage: IngestStage::Transport | IngestStage::Storage,
                    ..
                }
        )
    }
}

impl From<IndexError> for StoreError {
    fn from(err: IndexError) -> Self {
        StoreError::UpstreamFailure {
            stage: err.stage(),
            source: err,
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                StoreError::ConstraintViolation(db_err.message().to_string())
            }
            other => StoreError::Database(other),
        }
    }
}

/// Maps a foreign-key failure on a tenant reference to `NotFound`.
pub(crate) fn tenant_reference(err: sqlx::Error, tenant_id: TenantId) -> StoreError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation() => {
            StoreError::tenant_not_found(tenant_id)
        }
        _ => err.into(),
    }
}

/// Errors from the chat completion service.
#[derive(Error, Debug)]
pub enum CompletionError {
    #[error("completion request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("completion service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("error reading completion stream: {0}")]
    Stream(String),

    #[error("malformed completion chunk: {0}")]
    Decode(String),

    #[error("completion returned no content")]
    Empty,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_errors_keep_their_stage() {
        let err: StoreError = IndexError::Embedding("model offline".into()).into();
        assert_eq!(err.stage(), Some(IngestStage::Embedding));
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("embedding"));

        let err: StoreError = IndexError::Transport("connection refused".into()).into();
        assert_eq!(err.stage(), Some(IngestStage::Transport));
        assert!(err.is_retryable());
    }

    #[test]
    fn timeouts_are_retryable_transport_failures() {
        let err = StoreError::UpstreamTimeout(Duration::from_secs(2));
        assert_eq!(err.stage(), Some(IngestStage::Transport));
        assert!(err.is_retryable());
    }

    #[test]
    fn validation_is_not_retryable() {
        let err = StoreError::Validation("empty".into());
        assert_eq!(err.stage(), Some(IngestStage::Validation));
        assert!(!err.is_retryable());
    }

    #[test]
    fn row_not_found_stays_a_database_error() {
        let err: StoreError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, StoreError::Database(sqlx::Error::RowNotFound)));
    }
}
