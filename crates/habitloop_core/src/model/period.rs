//! Period domain model.
//!
//! # Responsibility
//! - Define one bounded window in which an obligation may be completed.
//! - Expose the state machine helpers used by the lifecycle services.
//!
//! # Invariants
//! - At most one period per obligation has `is_active = true` (I1).
//! - Periods of one obligation never overlap and are ordered by start (I2).
//! - `pending` is the only non-terminal outcome; `success` and `expired`
//!   are absorbing and always carry `is_active = false`.

use crate::model::obligation::{Obligation, ObligationId};
use crate::model::recurrence::{RecurrenceRule, Window};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable period identifier.
pub type PeriodId = Uuid;

/// Period outcome state.
///
/// `pending --(target reached)--> success`, `pending --(window elapsed)--> expired`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodOutcome {
    Pending,
    Success,
    Expired,
}

impl PeriodOutcome {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    pub id: PeriodId,
    pub obligation_id: ObligationId,
    /// Recurrence rule in force when the period was opened.
    pub period_type: RecurrenceRule,
    pub start_instant: DateTime<Utc>,
    /// `None` for always-available periods that are still open.
    pub end_instant: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub completion_count: u32,
    pub target: Option<u32>,
    pub outcome: PeriodOutcome,
    pub finalized_at: Option<DateTime<Utc>>,
}

impl Period {
    /// Opens a pending period for `obligation` over `window`.
    pub fn open(obligation: &Obligation, window: Window) -> Self {
        Self {
            id: Uuid::new_v4(),
            obligation_id: obligation.id,
            period_type: obligation.recurrence,
            start_instant: window.start,
            end_instant: window.end,
            is_active: true,
            completion_count: 0,
            target: obligation.target,
            outcome: PeriodOutcome::Pending,
            finalized_at: None,
        }
    }

    pub fn window(&self) -> Window {
        Window {
            start: self.start_instant,
            end: self.end_instant,
        }
    }

    /// Whether `instant` falls inside `[start, end)`.
    pub fn covers(&self, instant: DateTime<Utc>) -> bool {
        self.window().contains(instant)
    }

    pub fn is_finalized(&self) -> bool {
        !self.is_active
    }

    /// Completions needed to reach `success`.
    pub fn required_completions(&self) -> u32 {
        self.target.unwrap_or(1).max(1)
    }

    /// Whether one more completion satisfies the target.
    pub fn next_completion_finalizes(&self) -> bool {
        self.completion_count.saturating_add(1) >= self.required_completions()
    }
}
