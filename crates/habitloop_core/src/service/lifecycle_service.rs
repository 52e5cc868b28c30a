//! Period lifecycle manager.
//!
//! # Responsibility
//! - Resolve the period covering "now" for an obligation, opening a new one
//!   when none exists.
//! - Expire elapsed periods lazily (on access) and in bulk (sweep).
//! - Apply completion writes to an active period.
//!
//! # Invariants
//! - Every expiry decision goes through `recurrence::is_expired`.
//! - New windows never start before the previous period's end.
//! - Archived obligations never gain periods; resolving one performs no write.
//! - Exactly one `fail` entry is appended per applied expiry write.
//! - The sweep never aborts on a single period's failure.

use crate::config::DEFAULT_SWEEP_BATCH_SIZE;
use crate::error::{EngineError, EngineResult};
use crate::model::entry::{Entry, EntryOutcome};
use crate::model::obligation::Obligation;
use crate::model::period::{Period, PeriodId};
use crate::model::recurrence::{is_expired, Calendar};
use crate::repo::{
    PeriodMutation, PeriodPredicate, PeriodStore, RepoError, SweepCursor, SweepScope,
};
use crate::service::MAX_CONFLICT_RETRIES;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use std::time::Instant;

/// Counters of one sweep run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Candidate periods inspected.
    pub scanned: u32,
    /// Periods this run moved to `expired`.
    pub expired: u32,
    /// Candidates another writer finalized first.
    pub lost_races: u32,
    /// Candidates that failed and were left for the next run.
    pub failed: u32,
}

/// Result of a completion write against one period.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionWrite {
    /// Count increased; the period is still pending.
    Progressed(Period),
    /// The period reached its target and is now `success`.
    Finalized(Period),
    /// The period changed underneath the caller.
    Lost,
}

enum Resolution {
    Ready(Period),
    LostRace,
}

/// Lifecycle service over a `PeriodStore`.
pub struct PeriodLifecycleService<S: PeriodStore> {
    store: S,
    calendar: Calendar,
    sweep_batch_size: u32,
}

impl<S: PeriodStore> PeriodLifecycleService<S> {
    pub fn new(store: S, calendar: Calendar) -> Self {
        Self {
            store,
            calendar,
            sweep_batch_size: DEFAULT_SWEEP_BATCH_SIZE,
        }
    }

    /// Overrides how many periods one sweep batch loads. Zero is treated as one.
    pub fn with_sweep_batch_size(mut self, batch_size: u32) -> Self {
        self.sweep_batch_size = batch_size.max(1);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn calendar(&self) -> &Calendar {
        &self.calendar
    }

    /// Returns the period covering `now`, creating one when needed.
    ///
    /// An elapsed active period is expired first. The returned period may be
    /// finalized when it still covers `now` (a daily already completed today).
    /// Returns `Ok(None)` without writing for archived obligations.
    ///
    /// # Errors
    /// - `ConcurrentModification` when creation loses the race twice.
    pub fn get_or_create_active_period(
        &self,
        obligation: &Obligation,
        now: DateTime<Utc>,
    ) -> EngineResult<Option<Period>> {
        if obligation.is_archived() {
            debug!(
                "event=period_resolve module=service status=skip reason=archived obligation_id={}",
                obligation.id
            );
            return Ok(None);
        }

        let mut attempt = 0;
        loop {
            match self.resolve_period(obligation, now)? {
                Resolution::Ready(period) => return Ok(Some(period)),
                Resolution::LostRace if attempt < MAX_CONFLICT_RETRIES => {
                    attempt += 1;
                    info!(
                        "event=period_conflict module=service status=retry op=create obligation_id={} attempt={}",
                        obligation.id, attempt
                    );
                }
                Resolution::LostRace => {
                    warn!(
                        "event=period_conflict module=service status=conflict op=create obligation_id={}",
                        obligation.id
                    );
                    return Err(EngineError::ConcurrentModification {
                        entity: "obligation",
                        id: obligation.id,
                    });
                }
            }
        }
    }

    fn resolve_period(&self, obligation: &Obligation, now: DateTime<Utc>) -> EngineResult<Resolution> {
        if let Some(active) = self.store.get_active_period(obligation.id)? {
            if !is_expired(&active, now) {
                return Ok(Resolution::Ready(active));
            }
            // Losing this write means another caller already finalized it.
            self.expire_period(obligation, &active, now)?;
        }

        let latest = self.store.latest_period(obligation.id)?;
        if let Some(latest) = &latest {
            if latest.covers(now) {
                return Ok(Resolution::Ready(latest.clone()));
            }
        }

        let mut window = obligation.recurrence.compute_window(now, &self.calendar);
        if let Some(previous_end) = latest.as_ref().and_then(|period| period.end_instant) {
            if window.start < previous_end {
                window.start = previous_end;
            }
        }
        if window.end.is_some_and(|end| end <= window.start) {
            // Recurrence was edited to a shorter cadence; keep serving the last period.
            if let Some(latest) = latest {
                return Ok(Resolution::Ready(latest));
            }
        }

        let period = Period::open(obligation, window);
        match self.store.insert_active_period(&period) {
            Ok(()) => {
                info!(
                    "event=period_create module=service status=ok obligation_id={} period_id={} cadence={} start_ms={} end_ms={}",
                    obligation.id,
                    period.id,
                    period.period_type,
                    period.start_instant.timestamp_millis(),
                    period
                        .end_instant
                        .map_or_else(|| "none".to_string(), |end| end.timestamp_millis().to_string())
                );
                Ok(Resolution::Ready(period))
            }
            Err(RepoError::Conflict(_)) => Ok(Resolution::LostRace),
            Err(err) => Err(err.into()),
        }
    }

    /// Moves `period` to `expired` if it is still pending.
    ///
    /// Returns whether this call applied the write. The winner appends the
    /// period's `fail` entry.
    pub fn expire_period(
        &self,
        obligation: &Obligation,
        period: &Period,
        now: DateTime<Utc>,
    ) -> EngineResult<bool> {
        let applied = self.store.conditional_update(
            period.id,
            PeriodPredicate::pending(),
            PeriodMutation::Expire { at: now },
        )?;
        if !applied {
            debug!(
                "event=period_expire module=service status=conflict obligation_id={} period_id={}",
                obligation.id, period.id
            );
            return Ok(false);
        }

        let miss = Entry::record(obligation, Some(period.id), now, EntryOutcome::Fail);
        self.store.append_entry(&miss)?;
        info!(
            "event=period_expire module=service status=ok obligation_id={} period_id={} completion_count={}",
            obligation.id, period.id, period.completion_count
        );
        Ok(true)
    }

    /// Expires every active period in `scope` whose window ended by `now`.
    ///
    /// Candidates are paged in `(end, id)` order past the last row seen; a
    /// failing candidate is logged, counted and skipped. Only a failure to
    /// list candidates aborts the run.
    pub fn finalize_expired_periods(
        &self,
        scope: SweepScope,
        now: DateTime<Utc>,
    ) -> EngineResult<SweepReport> {
        let started_at = Instant::now();
        let mut report = SweepReport::default();
        let mut cursor: Option<SweepCursor> = None;

        loop {
            let batch = self
                .store
                .list_expirable_periods(scope, now, cursor, self.sweep_batch_size)?;
            let Some(last) = batch.last() else {
                break;
            };
            let next_cursor = last.end_instant.map(|end_at| SweepCursor {
                end_at,
                period_id: last.id,
            });

            for period in &batch {
                report.scanned += 1;
                if !is_expired(period, now) {
                    continue;
                }

                match self.sweep_one(period, now) {
                    Ok(true) => report.expired += 1,
                    Ok(false) => report.lost_races += 1,
                    Err(err) => {
                        report.failed += 1;
                        warn!(
                            "event=sweep_item_failed module=service status=error obligation_id={} period_id={} error={}",
                            period.obligation_id, period.id, err
                        );
                    }
                }
            }

            match next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        info!(
            "event=sweep_run module=service status=ok scope={} scanned={} expired={} lost_races={} failed={} duration_ms={}",
            scope_label(scope),
            report.scanned,
            report.expired,
            report.lost_races,
            report.failed,
            started_at.elapsed().as_millis()
        );
        Ok(report)
    }

    fn sweep_one(&self, period: &Period, now: DateTime<Utc>) -> EngineResult<bool> {
        let obligation = self
            .store
            .get_obligation(period.obligation_id)?
            .ok_or(EngineError::ObligationNotFound(period.obligation_id))?;
        self.expire_period(&obligation, period, now)
    }

    /// Counts one completion against a pending `period`.
    ///
    /// The write is guarded on the observed `completion_count`; the write that
    /// reaches the target also finalizes the period as `success`. Completing
    /// an always-available period closes its window at `now`.
    pub fn record_completion(
        &self,
        period: &Period,
        now: DateTime<Utc>,
    ) -> EngineResult<CompletionWrite> {
        if period.is_finalized() || is_expired(period, now) {
            return Ok(CompletionWrite::Lost);
        }

        let completion_count = period.completion_count.saturating_add(1);
        let predicate = PeriodPredicate::pending_at_count(period.completion_count);
        let finalizes = period.next_completion_finalizes();
        let mutation = if finalizes {
            PeriodMutation::Succeed {
                completion_count,
                at: now,
                close_window: !period.period_type.is_windowed(),
            }
        } else {
            PeriodMutation::Progress { completion_count }
        };

        if !self.store.conditional_update(period.id, predicate, mutation)? {
            info!(
                "event=period_conflict module=service status=conflict op=complete obligation_id={} period_id={} observed_count={}",
                period.obligation_id, period.id, period.completion_count
            );
            return Ok(CompletionWrite::Lost);
        }

        let updated = self.reload(period.id)?;
        if finalizes {
            info!(
                "event=period_complete module=service status=ok obligation_id={} period_id={} completion_count={}",
                updated.obligation_id, updated.id, updated.completion_count
            );
            Ok(CompletionWrite::Finalized(updated))
        } else {
            debug!(
                "event=period_progress module=service status=ok obligation_id={} period_id={} completion_count={} target={}",
                updated.obligation_id,
                updated.id,
                updated.completion_count,
                updated.required_completions()
            );
            Ok(CompletionWrite::Progressed(updated))
        }
    }

    /// Marks a still-pending period `success` regardless of its count target.
    ///
    /// Returns whether this call applied the write. Callers check archival,
    /// elapsed windows and finalized outcomes first.
    pub(crate) fn force_success(&self, period: &Period, now: DateTime<Utc>) -> EngineResult<bool> {
        let mutation = PeriodMutation::Succeed {
            completion_count: period
                .completion_count
                .saturating_add(1)
                .max(period.required_completions()),
            at: now,
            close_window: !period.period_type.is_windowed(),
        };
        let applied = self.store.conditional_update(
            period.id,
            PeriodPredicate::pending_at_count(period.completion_count),
            mutation,
        )?;
        if applied {
            info!(
                "event=period_complete module=service status=ok op=finalize obligation_id={} period_id={}",
                period.obligation_id, period.id
            );
        }
        Ok(applied)
    }

    pub(crate) fn reload(&self, period_id: PeriodId) -> EngineResult<Period> {
        self.store
            .get_period(period_id)?
            .ok_or(EngineError::PeriodNotFound(period_id))
    }
}

fn scope_label(scope: SweepScope) -> String {
    match scope {
        SweepScope::All => "all".to_string(),
        SweepScope::Owner(owner_id) => format!("owner:{owner_id}"),
        SweepScope::Obligation(obligation_id) => format!("obligation:{obligation_id}"),
    }
}
