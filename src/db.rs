use std::path::Path;
use std::time::Duration;

use rusqlite::Connection;

use crate::error::Result;
use crate::models::RowIdentity;

pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS ingest_runs (
    id INTEGER PRIMARY KEY,
    filename TEXT NOT NULL,
    destination_table TEXT NOT NULL,
    checksum TEXT NOT NULL,
    column_map_version TEXT NOT NULL,
    rows_inserted INTEGER NOT NULL,
    rows_updated INTEGER NOT NULL,
    rows_unchanged INTEGER NOT NULL,
    rows_rejected INTEGER NOT NULL,
    date_range_start TEXT,
    date_range_end TEXT,
    ingested_at TEXT DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);
";

/// Persisted columns of a destination table, in insert order. `row_identity`
/// is the merge key; every other column is overwritten on update.
pub const COLUMNS: &[&str] = &[
    "row_identity",
    "date",
    "amount",
    "type",
    "confirmation_code",
    "payout_scheduled_date",
    "booking_date",
    "start_date",
    "end_date",
    "listing_name",
    "guest",
    "details",
    "reference_code",
    "currency",
    "total_income",
    "passthrough",
];

/// DDL for a destination table. `table` must already be a validated
/// identifier.
pub fn table_ddl(table: &str) -> String {
    let identity_len = RowIdentity::LEN;
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (
    row_identity TEXT PRIMARY KEY CHECK (length(row_identity) = {identity_len}),
    date TEXT NOT NULL,
    amount TEXT NOT NULL,
    type TEXT NOT NULL DEFAULT '',
    confirmation_code TEXT,
    payout_scheduled_date TEXT,
    booking_date TEXT,
    start_date TEXT,
    end_date TEXT,
    listing_name TEXT NOT NULL DEFAULT '',
    guest TEXT NOT NULL DEFAULT '',
    details TEXT NOT NULL DEFAULT '',
    reference_code TEXT NOT NULL DEFAULT '',
    currency TEXT NOT NULL DEFAULT '',
    total_income TEXT NOT NULL DEFAULT '0',
    passthrough TEXT NOT NULL DEFAULT '{{}}',
    first_seen_at TEXT DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    updated_at TEXT DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);
CREATE INDEX IF NOT EXISTS {table}_date_idx ON {table}(date);"
    )
}

pub fn get_connection(db_path: &Path, busy_timeout: Duration) -> Result<Connection> {
    if let Some(dir) = db_path.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)?;
        }
    }
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(busy_timeout)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_db(conn: &Connection, table: &str) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    conn.execute_batch(&table_ddl(table))?;
    Ok(())
}

pub fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let mut stmt =
        conn.prepare("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1")?;
    Ok(stmt.exists([table])?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> (tempfile::TempDir, Connection) {
        let dir = tempfile::tempdir().unwrap();
        let conn = get_connection(&dir.path().join("test.db"), Duration::from_secs(1)).unwrap();
        init_db(&conn, "earnings").unwrap();
        (dir, conn)
    }

    #[test]
    fn test_init_db_creates_tables() {
        let (_dir, conn) = test_db();
        assert!(table_exists(&conn, "earnings").unwrap());
        assert!(table_exists(&conn, "ingest_runs").unwrap());
        assert!(!table_exists(&conn, "transactions").unwrap());
    }

    #[test]
    fn test_init_db_is_idempotent() {
        let (_dir, conn) = test_db();
        init_db(&conn, "earnings").unwrap();
    }

    #[test]
    fn test_destination_columns_match_ddl() {
        let (_dir, conn) = test_db();
        let cols: Vec<String> = conn
            .prepare("SELECT name FROM pragma_table_info('earnings')")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();
        for expected in COLUMNS {
            assert!(cols.contains(&expected.to_string()), "missing column: {expected}");
        }
    }

    #[test]
    fn test_row_identity_is_unique_and_fixed_length() {
        let (_dir, conn) = test_db();
        let id = "a".repeat(64);
        conn.execute(
            "INSERT INTO earnings (row_identity, date, amount) VALUES (?1, '2023-07-04', '1')",
            [&id],
        )
        .unwrap();
        assert!(conn
            .execute(
                "INSERT INTO earnings (row_identity, date, amount) VALUES (?1, '2023-07-04', '1')",
                [&id],
            )
            .is_err());
        assert!(conn
            .execute(
                "INSERT INTO earnings (row_identity, date, amount) VALUES ('short', '2023-07-04', '1')",
                [],
            )
            .is_err());
    }
}
