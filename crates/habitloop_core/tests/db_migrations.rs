use habitloop_core::db::migrations::latest_version;
use habitloop_core::db::{open_db, open_db_in_memory, DbError};
use habitloop_core::{RepoError, SqlitePeriodStore};
use rusqlite::Connection;

#[test]
fn open_db_in_memory_applies_all_migrations() {
    let conn = open_db_in_memory().unwrap();

    assert_eq!(schema_version(&conn), latest_version());
    assert_table_exists(&conn, "obligations");
    assert_table_exists(&conn, "obligation_tags");
    assert_table_exists(&conn, "periods");
    assert_table_exists(&conn, "entries");
}

#[test]
fn opening_same_database_twice_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("habitloop.db");

    let conn_first = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_first), latest_version());
    drop(conn_first);

    let conn_second = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_second), latest_version());
    assert_table_exists(&conn_second, "periods");
}

#[test]
fn file_database_uses_wal_journal() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open_db(dir.path().join("wal.db")).unwrap();
    let mode: String = conn
        .query_row("PRAGMA journal_mode;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(mode.to_ascii_lowercase(), "wal");
}

#[test]
fn opening_database_with_newer_schema_version_returns_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    let err = open_db(&path).unwrap_err();
    match err {
        DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        } => {
            assert_eq!(db_version, 999);
            assert_eq!(latest_supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn store_rejects_unmigrated_connection() {
    let conn = Connection::open_in_memory().unwrap();
    let err = SqlitePeriodStore::try_new(&conn).unwrap_err();
    match err {
        RepoError::UninitializedConnection {
            expected_version,
            actual_version,
        } => {
            assert_eq!(expected_version, latest_version());
            assert_eq!(actual_version, 0);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn store_rejects_schema_drift() {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch(&format!(
        "CREATE TABLE obligations (uuid TEXT PRIMARY KEY);
         PRAGMA user_version = {};",
        latest_version()
    ))
    .unwrap();

    let err = SqlitePeriodStore::try_new(&conn).unwrap_err();
    assert!(matches!(
        err,
        RepoError::MissingRequiredColumn {
            table: "obligations",
            column: "owner_uuid"
        }
    ));
}

#[test]
fn second_active_period_is_rejected_by_storage() {
    let conn = open_db_in_memory().unwrap();
    conn.execute_batch(
        "INSERT INTO obligations (uuid, owner_uuid, kind, title, recurrence, difficulty, status, created_at)
         VALUES ('o1', 'u1', 'daily', 'Read', 'daily', 'easy', 'active', 0);
         INSERT INTO periods (uuid, obligation_uuid, period_type, start_at, end_at, is_active, outcome)
         VALUES ('p1', 'o1', 'daily', 0, 86400000, 1, 'pending');",
    )
    .unwrap();

    let second = conn.execute(
        "INSERT INTO periods (uuid, obligation_uuid, period_type, start_at, end_at, is_active, outcome)
         VALUES ('p2', 'o1', 'daily', 86400000, 172800000, 1, 'pending');",
        [],
    );
    assert!(second.is_err());

    let finalized = conn.execute(
        "INSERT INTO periods (uuid, obligation_uuid, period_type, start_at, end_at, is_active, outcome)
         VALUES ('p0', 'o1', 'daily', -86400000, 0, 0, 'expired');",
        [],
    );
    assert_eq!(finalized.unwrap(), 1);
}

fn schema_version(conn: &Connection) -> u32 {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap()
}

fn assert_table_exists(conn: &Connection, table_name: &str) {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table_name],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(exists, 1, "table {table_name} does not exist");
}
