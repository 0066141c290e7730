//! Saga error types.

use common::{SagaId, Version};
use thiserror::Error;

use crate::result_tree::ResultTreeError;
use crate::state::SagaStatus;
use crate::template::TemplateError;

/// Errors raised when the orchestrator is driven incorrectly.
///
/// Every variant is a caller or programmer error: it means the saga was
/// defined badly or the API was called out of order. Remote failures never
/// show up here, they are reported through `fail_step` instead.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The step list given at creation is unusable.
    #[error("Invalid saga definition: {0}")]
    InvalidDefinition(String),

    /// No saga is known under this id.
    #[error("Saga not found: {0}")]
    NotFound(SagaId),

    /// The saga can no longer move forward.
    #[error("Saga {saga_id} is {status} and cannot advance")]
    AlreadyTerminal { saga_id: SagaId, status: SagaStatus },

    /// Saga is in an invalid state for the requested operation.
    #[error("Invalid saga state: expected {expected}, actual {actual}")]
    InvalidState {
        expected: &'static str,
        actual: SagaStatus,
    },

    /// A payload template could not be resolved.
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// The result tree rejected a read or write.
    #[error(transparent)]
    ResultTree(#[from] ResultTreeError),

    /// Another writer updated the saga between our read and our write.
    #[error(
        "Concurrency conflict for saga {saga_id}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        saga_id: SagaId,
        expected: Version,
        actual: Version,
    },

    /// The saga store failed.
    #[error("Saga storage error: {0}")]
    Storage(String),
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
