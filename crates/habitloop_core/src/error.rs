//! Engine-level error taxonomy.
//!
//! # Responsibility
//! - Give callers one typed error to switch on for every public operation.
//! - Map repository semantics (`NotFound`, `Conflict`) onto engine variants.
//!
//! # Invariants
//! - Persistence failures pass through unmodified inside `EngineError::Repo`.
//! - `ConcurrentModification` is only returned after the bounded retry lost.

use crate::model::obligation::{ObligationId, ObligationValidationError};
use crate::model::period::{PeriodId, PeriodOutcome};
use crate::model::recurrence::RecurrenceError;
use crate::repo::RepoError;
use thiserror::Error;
use uuid::Uuid;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("obligation not found: {0}")]
    ObligationNotFound(ObligationId),
    #[error("period not found: {0}")]
    PeriodNotFound(PeriodId),
    /// Operation attempted on an archived obligation.
    #[error("obligation is archived: {0}")]
    ObligationArchived(ObligationId),
    #[error("period {period_id} is already finalized as {outcome:?}")]
    PeriodFinalized {
        period_id: PeriodId,
        outcome: PeriodOutcome,
    },
    #[error(transparent)]
    InvalidRecurrenceRule(#[from] RecurrenceError),
    /// A conditional write lost its race; the caller may retry.
    #[error("concurrent modification of {entity} {id}")]
    ConcurrentModification { entity: &'static str, id: Uuid },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Repo(RepoError),
}

impl From<RepoError> for EngineError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::NotFound {
                entity: "obligation",
                id,
            } => Self::ObligationNotFound(id),
            RepoError::NotFound {
                entity: "period",
                id,
            } => Self::PeriodNotFound(id),
            RepoError::InvalidRecurrence { source, .. } => Self::InvalidRecurrenceRule(source),
            other => Self::Repo(other),
        }
    }
}

impl From<ObligationValidationError> for EngineError {
    fn from(value: ObligationValidationError) -> Self {
        Self::InvalidInput(value.to_string())
    }
}

impl EngineError {
    /// Whether a retry with fresh state may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrentModification { .. })
    }
}
