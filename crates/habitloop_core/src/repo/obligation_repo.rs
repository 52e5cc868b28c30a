//! Obligation repository contract and SQLite implementation.
//!
//! # Responsibility
//! - Persist obligations and their tag sets.
//! - Provide the `lastCompletedDate` and status writes used by services.
//!
//! # Invariants
//! - Write paths call `Obligation::validate()` before SQL mutations.
//! - An obligation row and its tags are written in one transaction.
//! - Read paths reject invalid persisted state instead of masking it.

use crate::model::obligation::{
    Difficulty, Obligation, ObligationId, ObligationKind, ObligationStatus, OwnerId,
};
use crate::model::recurrence::RecurrenceRule;
use crate::repo::store::{
    date_to_db, instant_to_db, parse_count, parse_date, parse_instant, parse_uuid,
    SqlitePeriodStore,
};
use crate::repo::{RepoError, RepoResult};
use chrono::NaiveDate;
use rusqlite::types::Value;
use rusqlite::{
    params, params_from_iter, Connection, OptionalExtension, Row, Transaction, TransactionBehavior,
};

const OBLIGATION_SELECT_SQL: &str = "SELECT
    uuid,
    owner_uuid,
    kind,
    title,
    recurrence,
    target,
    difficulty,
    status,
    last_completed_date,
    created_at
FROM obligations";

/// Filter options for listing obligations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObligationListQuery {
    pub owner_id: Option<OwnerId>,
    pub include_archived: bool,
}

/// Repository interface for obligation records.
pub trait ObligationRepository {
    /// Inserts a validated obligation with its tags.
    fn create_obligation(&self, obligation: &Obligation) -> RepoResult<ObligationId>;
    /// Loads one obligation, archived or not.
    fn get_obligation(&self, id: ObligationId) -> RepoResult<Option<Obligation>>;
    /// Lists obligations ordered by creation time.
    fn list_obligations(&self, query: &ObligationListQuery) -> RepoResult<Vec<Obligation>>;
    /// Archives or restores an obligation.
    fn set_obligation_status(&self, id: ObligationId, status: ObligationStatus)
        -> RepoResult<()>;
    /// Moves `last_completed_date` forward to `date`.
    ///
    /// Returns `false` without writing when the stored date is already the
    /// same or later.
    fn set_last_completed_date(&self, id: ObligationId, date: NaiveDate) -> RepoResult<bool>;
}

impl ObligationRepository for SqlitePeriodStore<'_> {
    fn create_obligation(&self, obligation: &Obligation) -> RepoResult<ObligationId> {
        obligation.validate()?;

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT INTO obligations (
                uuid,
                owner_uuid,
                kind,
                title,
                recurrence,
                target,
                difficulty,
                status,
                last_completed_date,
                created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10);",
            params![
                obligation.id.to_string(),
                obligation.owner_id.to_string(),
                kind_to_db(obligation.kind),
                obligation.title.as_str(),
                obligation.recurrence.to_string(),
                obligation.target,
                difficulty_to_db(obligation.difficulty),
                status_to_db(obligation.status),
                obligation.last_completed_date.map(date_to_db),
                instant_to_db(obligation.created_at),
            ],
        )?;
        for tag in &obligation.tags {
            tx.execute(
                "INSERT OR IGNORE INTO obligation_tags (obligation_uuid, tag) VALUES (?1, ?2);",
                params![obligation.id.to_string(), tag.as_str()],
            )?;
        }
        tx.commit()?;

        Ok(obligation.id)
    }

    fn get_obligation(&self, id: ObligationId) -> RepoResult<Option<Obligation>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{OBLIGATION_SELECT_SQL} WHERE uuid = ?1;"))?;
        let mut rows = stmt.query([id.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_obligation_row(self.conn, row)?));
        }
        Ok(None)
    }

    fn list_obligations(&self, query: &ObligationListQuery) -> RepoResult<Vec<Obligation>> {
        let mut sql = format!("{OBLIGATION_SELECT_SQL} WHERE 1 = 1");
        let mut bind_values: Vec<Value> = Vec::new();

        if !query.include_archived {
            sql.push_str(" AND status = 'active'");
        }
        if let Some(owner_id) = query.owner_id {
            sql.push_str(" AND owner_uuid = ?");
            bind_values.push(Value::Text(owner_id.to_string()));
        }
        sql.push_str(" ORDER BY created_at ASC, uuid ASC");

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut obligations = Vec::new();
        while let Some(row) = rows.next()? {
            obligations.push(parse_obligation_row(self.conn, row)?);
        }
        Ok(obligations)
    }

    fn set_obligation_status(
        &self,
        id: ObligationId,
        status: ObligationStatus,
    ) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE obligations
             SET status = ?2,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE uuid = ?1;",
            params![id.to_string(), status_to_db(status)],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound {
                entity: "obligation",
                id,
            });
        }
        Ok(())
    }

    fn set_last_completed_date(&self, id: ObligationId, date: NaiveDate) -> RepoResult<bool> {
        // ISO dates compare correctly as text.
        let changed = self.conn.execute(
            "UPDATE obligations
             SET last_completed_date = ?2,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE uuid = ?1
               AND (last_completed_date IS NULL OR last_completed_date < ?2);",
            params![id.to_string(), date_to_db(date)],
        )?;
        if changed == 1 {
            return Ok(true);
        }

        let exists = self
            .conn
            .query_row(
                "SELECT 1 FROM obligations WHERE uuid = ?1;",
                [id.to_string()],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        if !exists {
            return Err(RepoError::NotFound {
                entity: "obligation",
                id,
            });
        }
        Ok(false)
    }
}

fn parse_obligation_row(conn: &Connection, row: &Row<'_>) -> RepoResult<Obligation> {
    let uuid_text: String = row.get("uuid")?;
    let id = parse_uuid(&uuid_text, "obligations.uuid")?;
    let owner_text: String = row.get("owner_uuid")?;
    let owner_id = parse_uuid(&owner_text, "obligations.owner_uuid")?;

    let kind_text: String = row.get("kind")?;
    let kind = parse_kind(&kind_text).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid kind `{kind_text}` in obligations.kind"))
    })?;

    let recurrence_text: String = row.get("recurrence")?;
    let recurrence = recurrence_text
        .parse::<RecurrenceRule>()
        .map_err(|source| RepoError::InvalidRecurrence {
            column: "obligations.recurrence",
            source,
        })?;

    let difficulty_text: String = row.get("difficulty")?;
    let difficulty = parse_difficulty(&difficulty_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid difficulty `{difficulty_text}` in obligations.difficulty"
        ))
    })?;

    let status_text: String = row.get("status")?;
    let status = parse_status(&status_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid status `{status_text}` in obligations.status"
        ))
    })?;

    let target = row
        .get::<_, Option<i64>>("target")?
        .map(|value| parse_count(value, "obligations.target"))
        .transpose()?;
    let last_completed_date = row
        .get::<_, Option<String>>("last_completed_date")?
        .map(|value| parse_date(&value, "obligations.last_completed_date"))
        .transpose()?;

    let obligation = Obligation {
        id,
        owner_id,
        kind,
        title: row.get("title")?,
        recurrence,
        target,
        difficulty,
        status,
        tags: load_tags(conn, &uuid_text)?,
        last_completed_date,
        created_at: parse_instant(row.get("created_at")?, "obligations.created_at")?,
    };
    obligation.validate()?;
    Ok(obligation)
}

fn load_tags(conn: &Connection, obligation_uuid: &str) -> RepoResult<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT tag
         FROM obligation_tags
         WHERE obligation_uuid = ?1
         ORDER BY tag ASC;",
    )?;
    let mut rows = stmt.query([obligation_uuid])?;
    let mut tags = Vec::new();
    while let Some(row) = rows.next()? {
        tags.push(row.get(0)?);
    }
    Ok(tags)
}

fn kind_to_db(kind: ObligationKind) -> &'static str {
    match kind {
        ObligationKind::Habit => "habit",
        ObligationKind::Daily => "daily",
    }
}

fn parse_kind(value: &str) -> Option<ObligationKind> {
    match value {
        "habit" => Some(ObligationKind::Habit),
        "daily" => Some(ObligationKind::Daily),
        _ => None,
    }
}

fn status_to_db(status: ObligationStatus) -> &'static str {
    match status {
        ObligationStatus::Active => "active",
        ObligationStatus::Archived => "archived",
    }
}

fn parse_status(value: &str) -> Option<ObligationStatus> {
    match value {
        "active" => Some(ObligationStatus::Active),
        "archived" => Some(ObligationStatus::Archived),
        _ => None,
    }
}

pub(crate) fn difficulty_to_db(difficulty: Difficulty) -> &'static str {
    match difficulty {
        Difficulty::Trivial => "trivial",
        Difficulty::Easy => "easy",
        Difficulty::Medium => "medium",
        Difficulty::Hard => "hard",
    }
}

pub(crate) fn parse_difficulty(value: &str) -> Option<Difficulty> {
    match value {
        "trivial" => Some(Difficulty::Trivial),
        "easy" => Some(Difficulty::Easy),
        "medium" => Some(Difficulty::Medium),
        "hard" => Some(Difficulty::Hard),
        _ => None,
    }
}
