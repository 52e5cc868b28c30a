//! Streak calculator and completion statistics.
//!
//! # Responsibility
//! - Derive current/longest streaks from finalized period history.
//! - Fall back to the entry log when an obligation has no retained periods.
//! - Summarize period outcomes into `CompletionStats`.
//!
//! # Invariants
//! - The period, not the entry, is the streak unit.
//! - A run breaks on an `expired` period or on a gap between windows.
//! - Streaks are derived on demand and never persisted.

use crate::error::{EngineError, EngineResult};
use crate::model::entry::{Entry, EntryOutcome};
use crate::model::obligation::ObligationId;
use crate::model::period::{Period, PeriodOutcome};
use crate::model::recurrence::{Calendar, RecurrenceRule, Window};
use crate::repo::PeriodStore;
use chrono::{DateTime, NaiveDate, Utc};
use log::debug;
use serde::Serialize;
use std::time::Instant;

/// Derived streak view of one obligation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Streak {
    pub current_streak: u32,
    pub longest_streak: u32,
    pub last_completed_date: Option<NaiveDate>,
    /// `last_completed_date` is today under the engine calendar.
    pub is_active_today: bool,
}

/// Aggregate period outcomes of one obligation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CompletionStats {
    pub total_periods: u32,
    pub successful_periods: u32,
    pub expired_periods: u32,
    /// Success entries, including ad-hoc ones.
    pub total_completions: u32,
    /// `successful / (successful + expired)`; `0.0` with no finalized period.
    pub completion_rate: f64,
}

/// Current and longest run lengths.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreakRuns {
    pub current: u32,
    pub longest: u32,
}

pub struct StreakService<S: PeriodStore> {
    store: S,
    calendar: Calendar,
}

impl<S: PeriodStore> StreakService<S> {
    pub fn new(store: S, calendar: Calendar) -> Self {
        Self { store, calendar }
    }

    /// Computes the streak of `obligation_id` as seen at `now`.
    ///
    /// Archived obligations keep their history and still report a streak.
    pub fn get_streak(&self, obligation_id: ObligationId, now: DateTime<Utc>) -> EngineResult<Streak> {
        let started_at = Instant::now();
        let obligation = self
            .store
            .get_obligation(obligation_id)?
            .ok_or(EngineError::ObligationNotFound(obligation_id))?;

        let periods = self.store.list_periods(obligation_id)?;
        let (runs, source) = if periods.is_empty() {
            let entries = self.store.list_entries(obligation_id)?;
            (
                entry_streak(&entries, obligation.recurrence, &self.calendar, now),
                "entries",
            )
        } else {
            (period_streak(&periods, &self.calendar, now), "periods")
        };

        let today = self.calendar.date_of(now);
        let streak = Streak {
            current_streak: runs.current,
            longest_streak: runs.longest,
            last_completed_date: obligation.last_completed_date,
            is_active_today: obligation.last_completed_date == Some(today),
        };
        debug!(
            "event=streak_compute module=service status=ok obligation_id={} source={} current={} longest={} duration_ms={}",
            obligation_id,
            source,
            streak.current_streak,
            streak.longest_streak,
            started_at.elapsed().as_millis()
        );
        Ok(streak)
    }

    pub fn get_stats(&self, obligation_id: ObligationId) -> EngineResult<CompletionStats> {
        if self.store.get_obligation(obligation_id)?.is_none() {
            return Err(EngineError::ObligationNotFound(obligation_id));
        }
        let periods = self.store.list_periods(obligation_id)?;
        let entries = self.store.list_entries(obligation_id)?;
        Ok(completion_stats(&periods, &entries))
    }
}

/// Runs over finalized periods ordered by start.
///
/// The current run is zero when the latest finalized period is not a
/// success, or when the window after it has already elapsed unmet.
pub fn period_streak(periods: &[Period], calendar: &Calendar, now: DateTime<Utc>) -> StreakRuns {
    let mut runs = StreakRuns::default();
    let mut run = 0u32;
    let mut previous: Option<&Period> = None;

    for period in periods.iter().filter(|period| period.is_finalized()) {
        match period.outcome {
            PeriodOutcome::Success => {
                let extends = previous.is_some_and(|prev| {
                    prev.outcome == PeriodOutcome::Success && periods_touch(prev, period)
                });
                run = if extends { run + 1 } else { 1 };
                runs.longest = runs.longest.max(run);
            }
            PeriodOutcome::Expired | PeriodOutcome::Pending => run = 0,
        }
        previous = Some(period);
    }

    if let Some(last) = previous {
        let still_open = match last.end_instant {
            Some(end) => last
                .period_type
                .following_window_end(end, calendar)
                .map_or(true, |following_end| now < following_end),
            None => true,
        };
        if last.outcome == PeriodOutcome::Success && still_open {
            runs.current = run;
        }
    }
    runs
}

fn periods_touch(earlier: &Period, later: &Period) -> bool {
    if !later.period_type.is_windowed() {
        return true;
    }
    earlier
        .end_instant
        .map_or(true, |end| later.start_instant <= end)
}

/// Runs over success entries bucketed into the windows of `rule`.
///
/// Entries are walked in time order; a bucket opens at the first entry
/// outside the current one, so several entries inside one window count once.
/// Unbounded cadences close each bucket at its completion.
pub fn entry_streak(
    entries: &[Entry],
    rule: RecurrenceRule,
    calendar: &Calendar,
    now: DateTime<Utc>,
) -> StreakRuns {
    let mut completions: Vec<DateTime<Utc>> = entries
        .iter()
        .filter(|entry| entry.outcome == EntryOutcome::Success)
        .map(|entry| entry.completed_at)
        .collect();
    completions.sort_unstable();

    let mut runs = StreakRuns::default();
    let mut run = 0u32;
    let mut bucket: Option<Window> = None;
    for completed_at in completions {
        if rule.is_windowed() && bucket.is_some_and(|current| current.contains(completed_at)) {
            continue;
        }
        let window = rule.compute_window(completed_at, calendar);
        let extends = bucket.is_some_and(|previous| {
            previous.end.map_or(true, |previous_end| window.start <= previous_end)
        });
        run = if extends { run + 1 } else { 1 };
        runs.longest = runs.longest.max(run);
        bucket = Some(window);
    }

    let still_open = match bucket {
        Some(Window { end: Some(end), .. }) => rule
            .following_window_end(end, calendar)
            .map_or(true, |following_end| now < following_end),
        Some(Window { end: None, .. }) => true,
        None => false,
    };
    if still_open {
        runs.current = run;
    }
    runs
}

pub fn completion_stats(periods: &[Period], entries: &[Entry]) -> CompletionStats {
    let count = |outcome: PeriodOutcome| {
        periods
            .iter()
            .filter(|period| period.outcome == outcome)
            .count() as u32
    };
    let successful_periods = count(PeriodOutcome::Success);
    let expired_periods = count(PeriodOutcome::Expired);
    let finalized = successful_periods + expired_periods;

    CompletionStats {
        total_periods: periods.len() as u32,
        successful_periods,
        expired_periods,
        total_completions: entries
            .iter()
            .filter(|entry| entry.outcome == EntryOutcome::Success)
            .count() as u32,
        completion_rate: if finalized == 0 {
            0.0
        } else {
            f64::from(successful_periods) / f64::from(finalized)
        },
    }
}
