//! Period lifecycle engine for habits and dailies.
//! This crate owns window computation, period finalization, completion
//! recording and streak derivation.

pub mod clock;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, EngineConfig};
pub use db::{open_db, open_db_in_memory, DbError};
pub use engine::HabitEngine;
pub use error::{EngineError, EngineResult};
pub use logging::{default_log_level, init_logging, init_logging_from_config, LoggingError};
pub use model::entry::{Entry, EntryId, EntryOutcome};
pub use model::obligation::{
    Difficulty, Obligation, ObligationId, ObligationKind, ObligationStatus,
    ObligationValidationError, OwnerId,
};
pub use model::period::{Period, PeriodId, PeriodOutcome};
pub use model::recurrence::{
    is_expired, Cadence, Calendar, RecurrenceError, RecurrenceRule, WeekStart, Window,
};
pub use repo::{
    ObligationListQuery, PeriodStore, RepoError, RepoResult, SqlitePeriodStore, SweepCursor,
    SweepScope,
};
pub use service::completion_service::{CompletionOutcome, CompletionService};
pub use service::lifecycle_service::{PeriodLifecycleService, SweepReport};
pub use service::streak_service::{CompletionStats, Streak, StreakService};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
