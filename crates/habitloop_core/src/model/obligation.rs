//! Obligation domain model.
//!
//! # Responsibility
//! - Define the habit/daily record that owns a chain of periods.
//! - Validate obligation shape before it reaches persistence.
//!
//! # Invariants
//! - `id` is stable and never reused for another obligation.
//! - Archived obligations never gain new periods.
//! - `target`, when set, is at least 1.
//! - A `Daily` obligation is always windowed (never `always`).

use crate::model::recurrence::RecurrenceRule;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;
use uuid::Uuid;

/// Stable obligation identifier.
pub type ObligationId = Uuid;

/// Identifier of the user owning an obligation. Resolved outside the core.
pub type OwnerId = Uuid;

/// Closed set of obligation categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObligationKind {
    /// Repeatable, resettable action.
    Habit,
    /// Scheduled routine due on a cadence.
    Daily,
}

/// Lifecycle state of an obligation itself (not of its periods).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObligationStatus {
    Active,
    Archived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Trivial,
    #[default]
    Easy,
    Medium,
    Hard,
}

/// Validation failures for obligation writes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ObligationValidationError {
    #[error("obligation title must not be blank")]
    BlankTitle,
    #[error("obligation target must be at least 1")]
    ZeroTarget,
    #[error("daily obligations require a windowed cadence, got `{0}`")]
    UnboundedDaily(RecurrenceRule),
}

/// Habit or daily tracked by the lifecycle engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Obligation {
    pub id: ObligationId,
    pub owner_id: OwnerId,
    pub kind: ObligationKind,
    pub title: String,
    pub recurrence: RecurrenceRule,
    /// Completions needed per period. `None` means single-shot.
    pub target: Option<u32>,
    pub difficulty: Difficulty,
    pub status: ObligationStatus,
    /// Normalized lowercase, deduplicated.
    pub tags: Vec<String>,
    pub last_completed_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

impl Obligation {
    /// Creates an active obligation with a generated id and no history.
    pub fn new(
        owner_id: OwnerId,
        kind: ObligationKind,
        title: impl Into<String>,
        recurrence: RecurrenceRule,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id,
            kind,
            title: title.into(),
            recurrence,
            target: None,
            difficulty: Difficulty::default(),
            status: ObligationStatus::Active,
            tags: Vec::new(),
            last_completed_date: None,
            created_at,
        }
    }

    pub fn with_target(mut self, target: u32) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_difficulty(mut self, difficulty: Difficulty) -> Self {
        self.difficulty = difficulty;
        self
    }

    pub fn with_tags<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        self.tags = normalize_tags(tags);
        self
    }

    pub fn is_archived(&self) -> bool {
        self.status == ObligationStatus::Archived
    }

    /// Single-shot obligations finalize on their first completion.
    pub fn is_single_shot(&self) -> bool {
        self.target.map_or(true, |target| target <= 1)
    }

    pub fn validate(&self) -> Result<(), ObligationValidationError> {
        if self.title.trim().is_empty() {
            return Err(ObligationValidationError::BlankTitle);
        }
        if self.target == Some(0) {
            return Err(ObligationValidationError::ZeroTarget);
        }
        if self.kind == ObligationKind::Daily && !self.recurrence.is_windowed() {
            return Err(ObligationValidationError::UnboundedDaily(self.recurrence));
        }
        Ok(())
    }
}

/// Normalizes one tag: trimmed and lowercased, `None` when blank.
pub fn normalize_tag(tag: &str) -> Option<String> {
    let trimmed = tag.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_lowercase())
    }
}

/// Normalizes, deduplicates and sorts tag values.
pub fn normalize_tags<I, T>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = T>,
    T: AsRef<str>,
{
    tags.into_iter()
        .filter_map(|tag| normalize_tag(tag.as_ref()))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
