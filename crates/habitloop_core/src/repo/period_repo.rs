//! Period repository contract and SQLite implementation.
//!
//! # Responsibility
//! - Insert new active periods under the one-active-per-obligation index.
//! - Apply period state transitions as conditional writes.
//! - Answer the lookups the lifecycle and sweep paths need.
//!
//! # Invariants
//! - `insert_active_period` fails with `RepoError::Conflict` when another
//!   active period exists for the obligation.
//! - `conditional_update` only touches rows that are still active and
//!   pending (and, when requested, still at the observed count); it reports
//!   whether the write landed instead of overwriting a concurrent winner.
//! - Period lists are ordered by `start_at ASC`.

use crate::model::obligation::{ObligationId, OwnerId};
use crate::model::period::{Period, PeriodId, PeriodOutcome};
use crate::model::recurrence::RecurrenceRule;
use crate::repo::store::{
    bool_to_int, instant_to_db, parse_bool, parse_count, parse_instant, parse_uuid,
    SqlitePeriodStore,
};
use crate::repo::{RepoError, RepoResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

const PERIOD_SELECT_SQL: &str = "SELECT
    p.uuid AS uuid,
    p.obligation_uuid AS obligation_uuid,
    p.period_type AS period_type,
    p.start_at AS start_at,
    p.end_at AS end_at,
    p.is_active AS is_active,
    p.completion_count AS completion_count,
    p.target AS target,
    p.outcome AS outcome,
    p.finalized_at AS finalized_at
FROM periods p";

/// Which active periods a sweep may finalize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepScope {
    All,
    Owner(OwnerId),
    Obligation(ObligationId),
}

/// Keyset position of a sweep: the last `(end_at, uuid)` already visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepCursor {
    pub end_at: DateTime<Utc>,
    pub period_id: PeriodId,
}

/// Precondition of a conditional period write.
///
/// The row must always still be `is_active = 1` and `outcome = 'pending'`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PeriodPredicate {
    /// When set, the row must still hold this `completion_count`.
    pub expected_count: Option<u32>,
}

impl PeriodPredicate {
    /// Matches any still-pending active period.
    pub fn pending() -> Self {
        Self::default()
    }

    /// Matches a still-pending active period at exactly `count` completions.
    pub fn pending_at_count(count: u32) -> Self {
        Self {
            expected_count: Some(count),
        }
    }
}

/// State change applied by a conditional period write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodMutation {
    /// `pending -> expired`.
    Expire { at: DateTime<Utc> },
    /// `pending -> success`, storing the final completion count.
    ///
    /// `close_window` moves `end_at` to `at` for unbounded periods.
    Succeed {
        completion_count: u32,
        at: DateTime<Utc>,
        close_window: bool,
    },
    /// Records progress toward a count target without finalizing.
    Progress { completion_count: u32 },
}

/// Repository interface for period records.
pub trait PeriodRepository {
    /// Inserts an active pending period.
    fn insert_active_period(&self, period: &Period) -> RepoResult<()>;
    fn get_period(&self, id: PeriodId) -> RepoResult<Option<Period>>;
    /// Returns the single active period of an obligation, if any.
    fn get_active_period(&self, obligation_id: ObligationId) -> RepoResult<Option<Period>>;
    /// Returns the period with the latest start, active or not.
    fn latest_period(&self, obligation_id: ObligationId) -> RepoResult<Option<Period>>;
    /// Lists every period of an obligation ordered by start.
    fn list_periods(&self, obligation_id: ObligationId) -> RepoResult<Vec<Period>>;
    /// Lists active periods whose window ended at or before `now`, ordered
    /// by `(end_at, uuid)` and strictly after `after` when given.
    fn list_expirable_periods(
        &self,
        scope: SweepScope,
        now: DateTime<Utc>,
        after: Option<SweepCursor>,
        limit: u32,
    ) -> RepoResult<Vec<Period>>;
    /// Applies `mutation` only when `predicate` still holds.
    ///
    /// Returns `true` when the write landed.
    fn conditional_update(
        &self,
        id: PeriodId,
        predicate: PeriodPredicate,
        mutation: PeriodMutation,
    ) -> RepoResult<bool>;
}

impl PeriodRepository for SqlitePeriodStore<'_> {
    fn insert_active_period(&self, period: &Period) -> RepoResult<()> {
        if !period.is_active || period.outcome != PeriodOutcome::Pending {
            return Err(RepoError::InvalidData(format!(
                "period {} must be active and pending on insert",
                period.id
            )));
        }

        self.conn.execute(
            "INSERT INTO periods (
                uuid,
                obligation_uuid,
                period_type,
                start_at,
                end_at,
                is_active,
                completion_count,
                target,
                outcome,
                finalized_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?7, 'pending', NULL);",
            params![
                period.id.to_string(),
                period.obligation_id.to_string(),
                period.period_type.to_string(),
                instant_to_db(period.start_instant),
                period.end_instant.map(instant_to_db),
                period.completion_count,
                period.target,
            ],
        )?;
        Ok(())
    }

    fn get_period(&self, id: PeriodId) -> RepoResult<Option<Period>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{PERIOD_SELECT_SQL} WHERE p.uuid = ?1;"))?;
        let mut rows = stmt.query([id.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_period_row(row)?));
        }
        Ok(None)
    }

    fn get_active_period(&self, obligation_id: ObligationId) -> RepoResult<Option<Period>> {
        let mut stmt = self.conn.prepare(&format!(
            "{PERIOD_SELECT_SQL}
             WHERE p.obligation_uuid = ?1
               AND p.is_active = 1;"
        ))?;
        let mut rows = stmt.query([obligation_id.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_period_row(row)?));
        }
        Ok(None)
    }

    fn latest_period(&self, obligation_id: ObligationId) -> RepoResult<Option<Period>> {
        let mut stmt = self.conn.prepare(&format!(
            "{PERIOD_SELECT_SQL}
             WHERE p.obligation_uuid = ?1
             ORDER BY p.start_at DESC, p.is_active DESC
             LIMIT 1;"
        ))?;
        let mut rows = stmt.query([obligation_id.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_period_row(row)?));
        }
        Ok(None)
    }

    fn list_periods(&self, obligation_id: ObligationId) -> RepoResult<Vec<Period>> {
        let mut stmt = self.conn.prepare(&format!(
            "{PERIOD_SELECT_SQL}
             WHERE p.obligation_uuid = ?1
             ORDER BY p.start_at ASC, p.is_active ASC;"
        ))?;
        let mut rows = stmt.query([obligation_id.to_string()])?;
        let mut periods = Vec::new();
        while let Some(row) = rows.next()? {
            periods.push(parse_period_row(row)?);
        }
        Ok(periods)
    }

    fn list_expirable_periods(
        &self,
        scope: SweepScope,
        now: DateTime<Utc>,
        after: Option<SweepCursor>,
        limit: u32,
    ) -> RepoResult<Vec<Period>> {
        let (owner_filter, obligation_filter) = match scope {
            SweepScope::All => (None, None),
            SweepScope::Owner(owner_id) => (Some(owner_id.to_string()), None),
            SweepScope::Obligation(obligation_id) => (None, Some(obligation_id.to_string())),
        };

        let mut stmt = self.conn.prepare(&format!(
            "{PERIOD_SELECT_SQL}
             INNER JOIN obligations o ON o.uuid = p.obligation_uuid
             WHERE p.is_active = 1
               AND p.end_at IS NOT NULL
               AND p.end_at <= ?1
               AND (?2 IS NULL OR o.owner_uuid = ?2)
               AND (?3 IS NULL OR p.obligation_uuid = ?3)
               AND (?4 IS NULL OR p.end_at > ?4 OR (p.end_at = ?4 AND p.uuid > ?5))
             ORDER BY p.end_at ASC, p.uuid ASC
             LIMIT ?6;"
        ))?;
        let mut rows = stmt.query(params![
            instant_to_db(now),
            owner_filter,
            obligation_filter,
            after.map(|cursor| instant_to_db(cursor.end_at)),
            after.map(|cursor| cursor.period_id.to_string()),
            i64::from(limit),
        ])?;
        let mut periods = Vec::new();
        while let Some(row) = rows.next()? {
            periods.push(parse_period_row(row)?);
        }
        Ok(periods)
    }

    fn conditional_update(
        &self,
        id: PeriodId,
        predicate: PeriodPredicate,
        mutation: PeriodMutation,
    ) -> RepoResult<bool> {
        let changed = match mutation {
            PeriodMutation::Expire { at } => self.conn.execute(
                "UPDATE periods
                 SET is_active = 0,
                     outcome = 'expired',
                     finalized_at = ?2
                 WHERE uuid = ?1
                   AND is_active = 1
                   AND outcome = 'pending'
                   AND (?3 IS NULL OR completion_count = ?3);",
                params![id.to_string(), instant_to_db(at), predicate.expected_count],
            )?,
            PeriodMutation::Succeed {
                completion_count,
                at,
                close_window,
            } => self.conn.execute(
                "UPDATE periods
                 SET is_active = 0,
                     outcome = 'success',
                     completion_count = ?2,
                     finalized_at = ?3,
                     end_at = CASE
                         WHEN ?4 = 1 AND end_at IS NULL THEN MAX(?3, start_at)
                         ELSE end_at
                     END
                 WHERE uuid = ?1
                   AND is_active = 1
                   AND outcome = 'pending'
                   AND (?5 IS NULL OR completion_count = ?5);",
                params![
                    id.to_string(),
                    completion_count,
                    instant_to_db(at),
                    bool_to_int(close_window),
                    predicate.expected_count,
                ],
            )?,
            PeriodMutation::Progress { completion_count } => self.conn.execute(
                "UPDATE periods
                 SET completion_count = ?2
                 WHERE uuid = ?1
                   AND is_active = 1
                   AND outcome = 'pending'
                   AND (?3 IS NULL OR completion_count = ?3);",
                params![id.to_string(), completion_count, predicate.expected_count],
            )?,
        };

        Ok(changed == 1)
    }
}

fn parse_period_row(row: &Row<'_>) -> RepoResult<Period> {
    let uuid_text: String = row.get("uuid")?;
    let obligation_text: String = row.get("obligation_uuid")?;

    let period_type_text: String = row.get("period_type")?;
    let period_type = period_type_text
        .parse::<RecurrenceRule>()
        .map_err(|source| RepoError::InvalidRecurrence {
            column: "periods.period_type",
            source,
        })?;

    let outcome_text: String = row.get("outcome")?;
    let outcome = parse_outcome(&outcome_text).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid outcome `{outcome_text}` in periods.outcome"))
    })?;

    let end_instant = row
        .get::<_, Option<i64>>("end_at")?
        .map(|value| parse_instant(value, "periods.end_at"))
        .transpose()?;
    let finalized_at = row
        .get::<_, Option<i64>>("finalized_at")?
        .map(|value| parse_instant(value, "periods.finalized_at"))
        .transpose()?;
    let target = row
        .get::<_, Option<i64>>("target")?
        .map(|value| parse_count(value, "periods.target"))
        .transpose()?;

    Ok(Period {
        id: parse_uuid(&uuid_text, "periods.uuid")?,
        obligation_id: parse_uuid(&obligation_text, "periods.obligation_uuid")?,
        period_type,
        start_instant: parse_instant(row.get("start_at")?, "periods.start_at")?,
        end_instant,
        is_active: parse_bool(row.get("is_active")?, "periods.is_active")?,
        completion_count: parse_count(row.get("completion_count")?, "periods.completion_count")?,
        target,
        outcome,
        finalized_at,
    })
}

fn parse_outcome(value: &str) -> Option<PeriodOutcome> {
    match value {
        "pending" => Some(PeriodOutcome::Pending),
        "success" => Some(PeriodOutcome::Success),
        "expired" => Some(PeriodOutcome::Expired),
        _ => None,
    }
}
