//! Append-only completion log persistence.
//!
//! # Invariants
//! - Entries are inserted once and never updated or deleted by the core.
//! - Tags are stored as a JSON array snapshot.

use crate::model::entry::{Entry, EntryOutcome};
use crate::model::obligation::ObligationId;
use crate::repo::obligation_repo::{difficulty_to_db, parse_difficulty};
use crate::repo::store::{instant_to_db, parse_instant, parse_uuid, SqlitePeriodStore};
use crate::repo::{RepoError, RepoResult};
use rusqlite::{params, Row};

/// Repository interface for the completion log.
pub trait EntryRepository {
    fn append_entry(&self, entry: &Entry) -> RepoResult<()>;
    /// Lists an obligation's entries ordered by completion time.
    fn list_entries(&self, obligation_id: ObligationId) -> RepoResult<Vec<Entry>>;
}

impl EntryRepository for SqlitePeriodStore<'_> {
    fn append_entry(&self, entry: &Entry) -> RepoResult<()> {
        let tags = serde_json::to_string(&entry.tags)
            .map_err(|err| RepoError::InvalidData(format!("entry tags not encodable: {err}")))?;

        self.conn.execute(
            "INSERT INTO entries (
                uuid,
                obligation_uuid,
                period_uuid,
                completed_at,
                outcome,
                difficulty,
                tags
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
            params![
                entry.id.to_string(),
                entry.obligation_id.to_string(),
                entry.period_id.map(|id| id.to_string()),
                instant_to_db(entry.completed_at),
                outcome_to_db(entry.outcome),
                difficulty_to_db(entry.difficulty),
                tags,
            ],
        )?;
        Ok(())
    }

    fn list_entries(&self, obligation_id: ObligationId) -> RepoResult<Vec<Entry>> {
        let mut stmt = self.conn.prepare(
            "SELECT uuid, obligation_uuid, period_uuid, completed_at, outcome, difficulty, tags
             FROM entries
             WHERE obligation_uuid = ?1
             ORDER BY completed_at ASC, uuid ASC;",
        )?;
        let mut rows = stmt.query([obligation_id.to_string()])?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            entries.push(parse_entry_row(row)?);
        }
        Ok(entries)
    }
}

fn parse_entry_row(row: &Row<'_>) -> RepoResult<Entry> {
    let uuid_text: String = row.get("uuid")?;
    let obligation_text: String = row.get("obligation_uuid")?;
    let period_id = row
        .get::<_, Option<String>>("period_uuid")?
        .map(|value| parse_uuid(&value, "entries.period_uuid"))
        .transpose()?;

    let outcome_text: String = row.get("outcome")?;
    let outcome = match outcome_text.as_str() {
        "success" => EntryOutcome::Success,
        "fail" => EntryOutcome::Fail,
        other => {
            return Err(RepoError::InvalidData(format!(
                "invalid outcome `{other}` in entries.outcome"
            )))
        }
    };

    let difficulty_text: String = row.get("difficulty")?;
    let difficulty = parse_difficulty(&difficulty_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid difficulty `{difficulty_text}` in entries.difficulty"
        ))
    })?;

    let tags_text: String = row.get("tags")?;
    let tags: Vec<String> = serde_json::from_str(&tags_text)
        .map_err(|err| RepoError::InvalidData(format!("{err} in entries.tags")))?;

    Ok(Entry {
        id: parse_uuid(&uuid_text, "entries.uuid")?,
        obligation_id: parse_uuid(&obligation_text, "entries.obligation_uuid")?,
        period_id,
        completed_at: parse_instant(row.get("completed_at")?, "entries.completed_at")?,
        outcome,
        difficulty,
        tags,
    })
}

fn outcome_to_db(outcome: EntryOutcome) -> &'static str {
    match outcome {
        EntryOutcome::Success => "success",
        EntryOutcome::Fail => "fail",
    }
}
