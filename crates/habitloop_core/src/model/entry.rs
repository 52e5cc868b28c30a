//! Completion log entry model.
//!
//! # Invariants
//! - Entries are append-only; the core never mutates or deletes them.
//! - Difficulty and tags are snapshots taken when the entry is written.
//! - `period_id` is `None` only for ad-hoc completions outside tracked windows.

use crate::model::obligation::{Difficulty, Obligation, ObligationId};
use crate::model::period::PeriodId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type EntryId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryOutcome {
    Success,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub id: EntryId,
    pub obligation_id: ObligationId,
    pub period_id: Option<PeriodId>,
    pub completed_at: DateTime<Utc>,
    pub outcome: EntryOutcome,
    pub difficulty: Difficulty,
    pub tags: Vec<String>,
}

impl Entry {
    /// Records an outcome for `obligation`, snapshotting difficulty and tags.
    pub fn record(
        obligation: &Obligation,
        period_id: Option<PeriodId>,
        completed_at: DateTime<Utc>,
        outcome: EntryOutcome,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            obligation_id: obligation.id,
            period_id,
            completed_at,
            outcome,
            difficulty: obligation.difficulty,
            tags: obligation.tags.clone(),
        }
    }
}
