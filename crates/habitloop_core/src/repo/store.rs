//! SQLite-backed `PeriodStore`.
//!
//! # Responsibility
//! - Own the connection handle shared by the obligation/period/entry
//!   repository implementations.
//! - Verify that a connection is migrated before any query runs.
//! - Provide column codecs shared by the repository files.
//!
//! # Invariants
//! - Instants are stored as UTC epoch milliseconds.
//! - Calendar dates are stored as `YYYY-MM-DD` text.
//! - The store holds no in-memory state across calls; every guard lives in SQL.

use crate::db::migrations::latest_version;
use crate::repo::{RepoError, RepoResult};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::Connection;
use uuid::Uuid;

const REQUIRED_COLUMNS: &[(&str, &[&str])] = &[
    (
        "obligations",
        &[
            "uuid",
            "owner_uuid",
            "kind",
            "title",
            "recurrence",
            "target",
            "difficulty",
            "status",
            "last_completed_date",
            "created_at",
        ],
    ),
    ("obligation_tags", &["obligation_uuid", "tag"]),
    (
        "periods",
        &[
            "uuid",
            "obligation_uuid",
            "period_type",
            "start_at",
            "end_at",
            "is_active",
            "completion_count",
            "target",
            "outcome",
            "finalized_at",
        ],
    ),
    (
        "entries",
        &[
            "uuid",
            "obligation_uuid",
            "period_uuid",
            "completed_at",
            "outcome",
            "difficulty",
            "tags",
        ],
    ),
];

/// SQLite-backed store for obligations, periods and entries.
///
/// Cheap to copy: it only borrows the connection.
#[derive(Debug, Clone, Copy)]
pub struct SqlitePeriodStore<'conn> {
    pub(crate) conn: &'conn Connection,
}

impl<'conn> SqlitePeriodStore<'conn> {
    /// Creates a store from a migrated connection.
    ///
    /// # Errors
    /// - `UninitializedConnection` when migrations have not been applied.
    /// - `MissingRequiredTable`/`MissingRequiredColumn` on schema drift.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_store_connection_ready(conn)?;
        Ok(Self { conn })
    }
}

fn ensure_store_connection_ready(conn: &Connection) -> RepoResult<()> {
    let expected_version = latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(RepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    for &(table, columns) in REQUIRED_COLUMNS {
        if !table_exists(conn, table)? {
            return Err(RepoError::MissingRequiredTable(table));
        }
        for &column in columns {
            if !table_has_column(conn, table, column)? {
                return Err(RepoError::MissingRequiredColumn { table, column });
            }
        }
    }

    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> RepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> RepoResult<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table});"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let current: String = row.get(1)?;
        if current == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub(crate) fn parse_uuid(value: &str, column: &'static str) -> RepoResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid uuid `{value}` in {column}")))
}

pub(crate) fn instant_to_db(instant: DateTime<Utc>) -> i64 {
    instant.timestamp_millis()
}

pub(crate) fn parse_instant(value: i64, column: &'static str) -> RepoResult<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(value).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid epoch millis `{value}` in {column}"))
    })
}

pub(crate) fn date_to_db(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub(crate) fn parse_date(value: &str, column: &'static str) -> RepoResult<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| RepoError::InvalidData(format!("invalid date `{value}` in {column}")))
}

pub(crate) fn parse_count(value: i64, column: &'static str) -> RepoResult<u32> {
    u32::try_from(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid count `{value}` in {column}")))
}

pub(crate) fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}

pub(crate) fn parse_bool(value: i64, column: &'static str) -> RepoResult<bool> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(RepoError::InvalidData(format!(
            "invalid boolean `{other}` in {column}"
        ))),
    }
}
