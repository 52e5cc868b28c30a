//! Engine facade.
//!
//! # Responsibility
//! - Bind one `PeriodStore`, one `Clock` and one `EngineConfig`.
//! - Expose the lifecycle operations with "now" taken from the clock.
//!
//! # Invariants
//! - The facade reads the clock once per operation and passes that instant
//!   through every step.
//! - All services share the same `Calendar`, derived from the config.

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::model::entry::Entry;
use crate::model::obligation::{Obligation, ObligationId, ObligationStatus};
use crate::model::period::{Period, PeriodId};
use crate::model::recurrence::Calendar;
use crate::repo::{ObligationListQuery, PeriodStore, SweepScope};
use crate::service::completion_service::{CompletionOutcome, CompletionService};
use crate::service::lifecycle_service::{PeriodLifecycleService, SweepReport};
use crate::service::streak_service::{CompletionStats, Streak, StreakService};
use chrono::{DateTime, Utc};
use log::info;

pub struct HabitEngine<S: PeriodStore, C: Clock> {
    completion: CompletionService<S>,
    streaks: StreakService<S>,
    clock: C,
    config: EngineConfig,
}

impl<S: PeriodStore + Clone, C: Clock> HabitEngine<S, C> {
    pub fn new(store: S, clock: C, config: EngineConfig) -> Self {
        let calendar = config.calendar();
        let lifecycle = PeriodLifecycleService::new(store.clone(), calendar)
            .with_sweep_batch_size(config.sweep.batch_size);
        Self {
            completion: CompletionService::new(lifecycle),
            streaks: StreakService::new(store, calendar),
            clock,
            config,
        }
    }
}

impl<S: PeriodStore, C: Clock> HabitEngine<S, C> {
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn calendar(&self) -> &Calendar {
        self.lifecycle().calendar()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn lifecycle(&self) -> &PeriodLifecycleService<S> {
        self.completion.lifecycle()
    }

    fn store(&self) -> &S {
        self.lifecycle().store()
    }

    /// Persists a new obligation and returns it as stored.
    pub fn create_obligation(&self, obligation: &Obligation) -> EngineResult<Obligation> {
        obligation.validate()?;
        let id = self.store().create_obligation(obligation)?;
        info!(
            "event=obligation_create module=engine status=ok obligation_id={} kind={:?} cadence={}",
            id, obligation.kind, obligation.recurrence
        );
        self.get_obligation(id)
    }

    pub fn get_obligation(&self, obligation_id: ObligationId) -> EngineResult<Obligation> {
        self.store()
            .get_obligation(obligation_id)?
            .ok_or(EngineError::ObligationNotFound(obligation_id))
    }

    pub fn list_obligations(&self, query: &ObligationListQuery) -> EngineResult<Vec<Obligation>> {
        Ok(self.store().list_obligations(query)?)
    }

    /// Archives an obligation. Its pending period is left to expire normally.
    pub fn archive_obligation(&self, obligation_id: ObligationId) -> EngineResult<()> {
        self.store()
            .set_obligation_status(obligation_id, ObligationStatus::Archived)?;
        info!("event=obligation_archive module=engine status=ok obligation_id={obligation_id}");
        Ok(())
    }

    pub fn restore_obligation(&self, obligation_id: ObligationId) -> EngineResult<()> {
        self.store()
            .set_obligation_status(obligation_id, ObligationStatus::Active)?;
        info!("event=obligation_restore module=engine status=ok obligation_id={obligation_id}");
        Ok(())
    }

    /// Period covering now; `None` for archived obligations.
    pub fn get_or_create_active_period(
        &self,
        obligation_id: ObligationId,
    ) -> EngineResult<Option<Period>> {
        let obligation = self.get_obligation(obligation_id)?;
        self.lifecycle()
            .get_or_create_active_period(&obligation, self.now())
    }

    pub fn finalize_expired_periods(&self, scope: SweepScope) -> EngineResult<SweepReport> {
        self.lifecycle().finalize_expired_periods(scope, self.now())
    }

    /// Forces a pending period to `success`, recording the completion.
    pub fn complete_and_finalize(&self, period_id: PeriodId) -> EngineResult<CompletionOutcome> {
        self.completion.complete_and_finalize(period_id, self.now())
    }

    pub fn complete_obligation(
        &self,
        obligation_id: ObligationId,
    ) -> EngineResult<CompletionOutcome> {
        self.completion.complete_obligation(obligation_id, self.now())
    }

    pub fn record_adhoc_completion(
        &self,
        obligation_id: ObligationId,
        completed_at: DateTime<Utc>,
    ) -> EngineResult<CompletionOutcome> {
        self.completion
            .record_adhoc_completion(obligation_id, completed_at, self.now())
    }

    pub fn get_streak(&self, obligation_id: ObligationId) -> EngineResult<Streak> {
        self.streaks.get_streak(obligation_id, self.now())
    }

    pub fn get_stats(&self, obligation_id: ObligationId) -> EngineResult<CompletionStats> {
        self.streaks.get_stats(obligation_id)
    }

    pub fn list_periods(&self, obligation_id: ObligationId) -> EngineResult<Vec<Period>> {
        Ok(self.store().list_periods(obligation_id)?)
    }

    pub fn list_entries(&self, obligation_id: ObligationId) -> EngineResult<Vec<Entry>> {
        Ok(self.store().list_entries(obligation_id)?)
    }
}
