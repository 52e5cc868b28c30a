//! Completion recorder.
//!
//! # Responsibility
//! - Record a completion against the period covering "now".
//! - Record backfilled (ad-hoc) completions outside any tracked period.
//! - Maintain `Obligation::last_completed_date`.
//!
//! # Invariants
//! - Completion is idempotent per period: a period already in `success`
//!   (or, for single-shot obligations, a period whose start date equals
//!   `last_completed_date`; today's date for unbounded periods) yields no
//!   new entry and no write.
//! - The success entry is appended only after the period write landed, so a
//!   lost race never leaves a duplicate entry.
//! - `last_completed_date` never moves backwards; the store only applies
//!   forward moves.

use crate::error::{EngineError, EngineResult};
use crate::model::entry::{Entry, EntryOutcome};
use crate::model::obligation::{Obligation, ObligationId};
use crate::model::period::{Period, PeriodId, PeriodOutcome};
use crate::model::recurrence::is_expired;
use crate::repo::PeriodStore;
use crate::service::lifecycle_service::{CompletionWrite, PeriodLifecycleService};
use crate::service::MAX_CONFLICT_RETRIES;
use chrono::{DateTime, Utc};
use log::info;
use serde::Serialize;
use std::time::Instant;

/// Result of a completion request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionOutcome {
    /// Obligation after the completion, including `last_completed_date`.
    pub obligation: Obligation,
    /// Period the completion counted against. `None` for ad-hoc completions.
    pub period: Option<Period>,
    /// Entry appended by this call, if any.
    pub entry: Option<Entry>,
    /// `false` when the call was an idempotent repeat.
    pub recorded: bool,
}

/// Completion service driving the lifecycle manager.
pub struct CompletionService<S: PeriodStore> {
    lifecycle: PeriodLifecycleService<S>,
}

impl<S: PeriodStore> CompletionService<S> {
    pub fn new(lifecycle: PeriodLifecycleService<S>) -> Self {
        Self { lifecycle }
    }

    pub fn lifecycle(&self) -> &PeriodLifecycleService<S> {
        &self.lifecycle
    }

    /// Completes `obligation_id` at `now`.
    ///
    /// # Errors
    /// - `ObligationNotFound` / `ObligationArchived` before any write.
    /// - `ConcurrentModification` when the period write loses twice, for
    ///   example to a sweep expiring the same window.
    pub fn complete_obligation(
        &self,
        obligation_id: ObligationId,
        now: DateTime<Utc>,
    ) -> EngineResult<CompletionOutcome> {
        let started_at = Instant::now();
        let mut obligation = self.load_unarchived(obligation_id)?;

        let mut attempt = 0;
        loop {
            if attempt > 0 {
                // The winner may have moved `last_completed_date`.
                obligation = self.load_unarchived(obligation_id)?;
            }
            let period = self
                .lifecycle
                .get_or_create_active_period(&obligation, now)?
                .ok_or(EngineError::ObligationArchived(obligation_id))?;

            if let Some(outcome) = self.complete_in_period(&obligation, period.clone(), now)? {
                if outcome.recorded {
                    info!(
                        "event=completion_record module=service status=ok obligation_id={} period_id={} attempt={} duration_ms={}",
                        obligation_id,
                        period.id,
                        attempt,
                        started_at.elapsed().as_millis()
                    );
                }
                return Ok(outcome);
            }

            if attempt >= MAX_CONFLICT_RETRIES {
                info!(
                    "event=completion_record module=service status=conflict obligation_id={} period_id={}",
                    obligation_id, period.id
                );
                return Err(EngineError::ConcurrentModification {
                    entity: "period",
                    id: period.id,
                });
            }
            attempt += 1;
        }
    }

    /// Returns `Ok(None)` when the period changed underneath and the caller
    /// should reload.
    fn complete_in_period(
        &self,
        obligation: &Obligation,
        period: Period,
        now: DateTime<Utc>,
    ) -> EngineResult<Option<CompletionOutcome>> {
        match period.outcome {
            PeriodOutcome::Success => return Ok(Some(self.idempotent(obligation, period))),
            PeriodOutcome::Expired => return Ok(None),
            PeriodOutcome::Pending => {}
        }

        // Unbounded periods stay open across days, so they are keyed by today.
        let guard_instant = if period.period_type.is_windowed() {
            period.start_instant
        } else {
            now
        };
        let guard_date = self.lifecycle.calendar().date_of(guard_instant);
        if obligation.is_single_shot() && obligation.last_completed_date == Some(guard_date) {
            return Ok(Some(self.idempotent(obligation, period)));
        }

        let updated = match self.lifecycle.record_completion(&period, now)? {
            CompletionWrite::Progressed(updated) | CompletionWrite::Finalized(updated) => updated,
            CompletionWrite::Lost => {
                // A concurrent success on the same period is an idempotent repeat.
                let current = self.lifecycle.store().get_period(period.id)?;
                return match current {
                    Some(current) if current.outcome == PeriodOutcome::Success => {
                        let fresh = self.reload_obligation(obligation.id)?;
                        Ok(Some(self.idempotent(&fresh, current)))
                    }
                    _ => Ok(None),
                };
            }
        };

        let entry = Entry::record(obligation, Some(updated.id), now, EntryOutcome::Success);
        self.lifecycle.store().append_entry(&entry)?;
        let obligation = self.advance_last_completed(obligation, now)?;

        Ok(Some(CompletionOutcome {
            obligation,
            period: Some(updated),
            entry: Some(entry),
            recorded: true,
        }))
    }

    /// Forces a pending period to `success` regardless of its count target,
    /// recording the completion like `complete_obligation` does.
    ///
    /// # Errors
    /// - `PeriodNotFound` for unknown ids.
    /// - `ObligationArchived` when the owning obligation is archived.
    /// - `PeriodFinalized` when the period already left `pending`, including
    ///   when its window elapsed before `now` (it is expired first).
    /// - `ConcurrentModification` when another writer changed it meanwhile.
    pub fn complete_and_finalize(
        &self,
        period_id: PeriodId,
        now: DateTime<Utc>,
    ) -> EngineResult<CompletionOutcome> {
        let period = self.lifecycle.reload(period_id)?;
        let obligation = self.load_unarchived(period.obligation_id)?;
        if period.is_finalized() {
            return Err(EngineError::PeriodFinalized {
                period_id,
                outcome: period.outcome,
            });
        }
        if is_expired(&period, now) {
            self.lifecycle.expire_period(&obligation, &period, now)?;
            let current = self.lifecycle.reload(period_id)?;
            return Err(EngineError::PeriodFinalized {
                period_id,
                outcome: current.outcome,
            });
        }

        if !self.lifecycle.force_success(&period, now)? {
            return Err(EngineError::ConcurrentModification {
                entity: "period",
                id: period_id,
            });
        }
        let updated = self.lifecycle.reload(period_id)?;
        let entry = Entry::record(&obligation, Some(period_id), now, EntryOutcome::Success);
        self.lifecycle.store().append_entry(&entry)?;
        let obligation = self.advance_last_completed(&obligation, now)?;

        Ok(CompletionOutcome {
            obligation,
            period: Some(updated),
            entry: Some(entry),
            recorded: true,
        })
    }

    /// Appends a success entry with no period for an instant before the
    /// current window.
    ///
    /// # Errors
    /// - `InvalidInput` when `completed_at` is in the future or inside the
    ///   window covering `now`.
    pub fn record_adhoc_completion(
        &self,
        obligation_id: ObligationId,
        completed_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> EngineResult<CompletionOutcome> {
        let obligation = self.load_unarchived(obligation_id)?;
        if completed_at > now {
            return Err(EngineError::InvalidInput(
                "ad-hoc completion instant is in the future".to_string(),
            ));
        }

        let store = self.lifecycle.store();
        let current_window_start = match store.latest_period(obligation_id)? {
            Some(latest) if latest.covers(now) => latest.start_instant,
            _ => {
                obligation
                    .recurrence
                    .compute_window(now, self.lifecycle.calendar())
                    .start
            }
        };
        if completed_at >= current_window_start {
            return Err(EngineError::InvalidInput(
                "ad-hoc completion falls inside the current window; complete the obligation instead"
                    .to_string(),
            ));
        }

        let entry = Entry::record(&obligation, None, completed_at, EntryOutcome::Success);
        store.append_entry(&entry)?;
        let obligation = self.advance_last_completed(&obligation, completed_at)?;
        info!(
            "event=completion_record module=service status=ok kind=adhoc obligation_id={} entry_id={}",
            obligation_id, entry.id
        );

        Ok(CompletionOutcome {
            obligation,
            period: None,
            entry: Some(entry),
            recorded: true,
        })
    }

    fn reload_obligation(&self, obligation_id: ObligationId) -> EngineResult<Obligation> {
        self.lifecycle
            .store()
            .get_obligation(obligation_id)?
            .ok_or(EngineError::ObligationNotFound(obligation_id))
    }

    fn load_unarchived(&self, obligation_id: ObligationId) -> EngineResult<Obligation> {
        let obligation = self.reload_obligation(obligation_id)?;
        if obligation.is_archived() {
            return Err(EngineError::ObligationArchived(obligation_id));
        }
        Ok(obligation)
    }

    fn advance_last_completed(
        &self,
        obligation: &Obligation,
        completed_at: DateTime<Utc>,
    ) -> EngineResult<Obligation> {
        let date = self.lifecycle.calendar().date_of(completed_at);
        if self
            .lifecycle
            .store()
            .set_last_completed_date(obligation.id, date)?
        {
            let mut updated = obligation.clone();
            updated.last_completed_date = Some(date);
            return Ok(updated);
        }
        // A same-or-later date is already stored, possibly by a concurrent writer.
        self.reload_obligation(obligation.id)
    }

    fn idempotent(&self, obligation: &Obligation, period: Period) -> CompletionOutcome {
        info!(
            "event=completion_idempotent module=service status=skip obligation_id={} period_id={} outcome={:?}",
            obligation.id, period.id, period.outcome
        );
        CompletionOutcome {
            obligation: obligation.clone(),
            period: Some(period),
            entry: None,
            recorded: false,
        }
    }
}
