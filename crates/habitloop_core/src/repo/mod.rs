//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define the `PeriodStore` collaborator consumed by the lifecycle services.
//! - Isolate SQLite query details from service orchestration.
//!
//! # Invariants
//! - Period state transitions are only expressed through
//!   `PeriodRepository::conditional_update`, guarded on the prior state.
//! - Creating a second active period for one obligation fails with
//!   `RepoError::Conflict`, never by silently replacing the first.
//! - Repository APIs return semantic errors (`NotFound`, `Conflict`) in
//!   addition to DB transport errors.

pub mod entry_repo;
pub mod obligation_repo;
pub mod period_repo;
pub mod store;

use crate::db::DbError;
use crate::model::obligation::ObligationValidationError;
use crate::model::recurrence::RecurrenceError;
use thiserror::Error;
use uuid::Uuid;

pub use entry_repo::EntryRepository;
pub use obligation_repo::{ObligationListQuery, ObligationRepository};
pub use period_repo::{
    PeriodMutation, PeriodPredicate, PeriodRepository, SweepCursor, SweepScope,
};
pub use store::SqlitePeriodStore;

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for obligation, period and entry persistence.
#[derive(Debug, Error)]
pub enum RepoError {
    #[error(transparent)]
    Validation(#[from] ObligationValidationError),
    #[error(transparent)]
    Db(#[from] DbError),
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Uuid },
    /// A uniqueness constraint rejected the write.
    #[error("conflicting write: {0}")]
    Conflict(String),
    #[error("invalid persisted data: {0}")]
    InvalidData(String),
    /// A persisted cadence no longer parses as a recurrence rule.
    #[error("invalid persisted cadence in {column}: {source}")]
    InvalidRecurrence {
        column: &'static str,
        #[source]
        source: RecurrenceError,
    },
    #[error("store requires schema version {expected_version}, got {actual_version}")]
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    #[error("store requires table `{0}`")]
    MissingRequiredTable(&'static str),
    #[error("store requires column `{column}` in table `{table}`")]
    MissingRequiredColumn {
        table: &'static str,
        column: &'static str,
    },
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(failure, message) = &value {
            if failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
            {
                return Self::Conflict(
                    message
                        .clone()
                        .unwrap_or_else(|| "unique constraint violated".to_string()),
                );
            }
        }
        Self::Db(DbError::Sqlite(value))
    }
}

/// Full persistence contract required by the lifecycle engine.
///
/// Implemented automatically for any type that provides all three
/// repositories.
pub trait PeriodStore: ObligationRepository + PeriodRepository + EntryRepository {}

impl<T> PeriodStore for T where T: ObligationRepository + PeriodRepository + EntryRepository {}
