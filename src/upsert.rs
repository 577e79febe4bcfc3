use std::collections::BTreeMap;

use chrono::NaiveDate;
use log::debug;
use rusqlite::{params, Connection, Transaction, TransactionBehavior};

use crate::db::{table_ddl, COLUMNS, SCHEMA};
use crate::error::{IngestError, Result};
use crate::models::{RowIdentity, WarehouseRow};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeCounts {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Rows dropped because a later row in the same batch had the same identity.
    pub collapsed: usize,
}

/// Ledger details stored alongside a successful merge.
pub struct RunInfo<'a> {
    pub filename: &'a str,
    pub checksum: &'a str,
    pub column_map_version: &'a str,
    pub rows_rejected: usize,
}

fn iso(date: Option<NaiveDate>) -> Option<String> {
    date.map(|d| d.format("%Y-%m-%d").to_string())
}

/// Values in `COLUMNS` order.
fn row_values(row: &WarehouseRow) -> Vec<Option<String>> {
    let r = &row.record;
    vec![
        Some(row.identity.as_str().to_string()),
        iso(Some(r.date)),
        Some(r.amount.normalize().to_string()),
        Some(r.kind.clone()),
        r.confirmation_code.clone(),
        iso(r.payout_scheduled_date),
        iso(r.booking_date),
        iso(r.start_date),
        iso(r.end_date),
        Some(r.listing_name.clone()),
        Some(r.guest.clone()),
        Some(r.details.clone()),
        Some(r.reference_code.clone()),
        Some(r.currency.clone()),
        Some(r.total_income.normalize().to_string()),
        Some(serde_json::to_string(&r.passthrough).unwrap_or_else(|_| "{}".to_string())),
    ]
}

/// `lhs.col IS NOT rhs.col OR …` over every non-key column.
fn differs(lhs: &str, rhs: &str) -> String {
    COLUMNS[1..]
        .iter()
        .map(|c| format!("{lhs}.{c} IS NOT {rhs}.{c}"))
        .collect::<Vec<_>>()
        .join(" OR ")
}

/// Keep the last row per identity, preserving nothing else about order.
fn collapse(rows: Vec<WarehouseRow>) -> (Vec<WarehouseRow>, usize) {
    let total = rows.len();
    let mut by_identity: BTreeMap<RowIdentity, WarehouseRow> = BTreeMap::new();
    for row in rows {
        by_identity.insert(row.identity.clone(), row);
    }
    let collapsed = total - by_identity.len();
    (by_identity.into_values().collect(), collapsed)
}

fn stage(tx: &Transaction, rows: &[WarehouseRow]) -> rusqlite::Result<()> {
    let defs: Vec<String> = COLUMNS
        .iter()
        .enumerate()
        .map(|(i, c)| if i == 0 { format!("{c} TEXT PRIMARY KEY") } else { format!("{c} TEXT") })
        .collect();
    tx.execute_batch(&format!(
        "DROP TABLE IF EXISTS temp.merge_staging; CREATE TEMP TABLE merge_staging ({});",
        defs.join(", ")
    ))?;

    let placeholders: Vec<String> = (1..=COLUMNS.len()).map(|i| format!("?{i}")).collect();
    let mut stmt = tx.prepare(&format!(
        "INSERT INTO temp.merge_staging ({}) VALUES ({})",
        COLUMNS.join(", "),
        placeholders.join(", ")
    ))?;
    for row in rows {
        stmt.execute(rusqlite::params_from_iter(row_values(row)))?;
    }
    Ok(())
}

fn count_changes(tx: &Transaction, table: &str) -> rusqlite::Result<(usize, usize)> {
    let sql = format!(
        "SELECT \
            COALESCE(SUM(CASE WHEN t.row_identity IS NULL THEN 1 ELSE 0 END), 0), \
            COALESCE(SUM(CASE WHEN t.row_identity IS NOT NULL AND ({}) THEN 1 ELSE 0 END), 0) \
         FROM temp.merge_staging s LEFT JOIN {table} t ON t.row_identity = s.row_identity",
        differs("t", "s")
    );
    tx.query_row(&sql, [], |r| {
        Ok((r.get::<_, i64>(0)? as usize, r.get::<_, i64>(1)? as usize))
    })
}

fn merge_staged(tx: &Transaction, table: &str) -> rusqlite::Result<usize> {
    let cols = COLUMNS.join(", ");
    let assignments: Vec<String> = COLUMNS[1..]
        .iter()
        .map(|c| format!("{c} = excluded.{c}"))
        .collect();
    // `WHERE true` keeps SQLite from reading ON CONFLICT as a join clause.
    let sql = format!(
        "INSERT INTO {table} ({cols}) SELECT {cols} FROM temp.merge_staging WHERE true \
         ON CONFLICT(row_identity) DO UPDATE SET {}, \
            updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') \
         WHERE {}",
        assignments.join(", "),
        differs(table, "excluded")
    );
    tx.execute(&sql, [])
}

fn record_run(
    tx: &Transaction,
    table: &str,
    run: &RunInfo,
    counts: &MergeCounts,
    rows: &[WarehouseRow],
) -> rusqlite::Result<()> {
    let min_date = iso(rows.iter().map(|r| r.record.date).min());
    let max_date = iso(rows.iter().map(|r| r.record.date).max());
    tx.execute(
        "INSERT INTO ingest_runs (filename, destination_table, checksum, column_map_version, \
            rows_inserted, rows_updated, rows_unchanged, rows_rejected, date_range_start, date_range_end) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            run.filename,
            table,
            run.checksum,
            run.column_map_version,
            counts.inserted as i64,
            counts.updated as i64,
            counts.unchanged as i64,
            run.rows_rejected as i64,
            min_date,
            max_date,
        ],
    )?;
    Ok(())
}

/// Merge a batch into `table` as one IMMEDIATE transaction: existing
/// identities are overwritten when any column differs, new identities are
/// inserted. Either the whole batch and its ledger entry commit, or nothing
/// does. `table` must be a validated identifier.
pub fn merge(
    conn: &mut Connection,
    table: &str,
    rows: Vec<WarehouseRow>,
    run: &RunInfo,
) -> Result<MergeCounts> {
    let (rows, collapsed) = collapse(rows);
    let fail = |source: rusqlite::Error| IngestError::Upsert {
        table: table.to_string(),
        source,
    };

    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(fail)?;

    let counts = (|| -> rusqlite::Result<MergeCounts> {
        tx.execute_batch(SCHEMA)?;
        tx.execute_batch(&table_ddl(table))?;
        stage(&tx, &rows)?;
        let (inserted, updated) = count_changes(&tx, table)?;
        let counts = MergeCounts {
            inserted,
            updated,
            unchanged: rows.len() - inserted - updated,
            collapsed,
        };
        let written = merge_staged(&tx, table)?;
        if written != inserted + updated {
            debug!("merge wrote {written} rows, expected {}", inserted + updated);
        }
        record_run(&tx, table, run, &counts, &rows)?;
        tx.execute_batch("DROP TABLE temp.merge_staging;")?;
        Ok(counts)
    })()
    .map_err(fail)?;

    tx.commit().map_err(fail)?;
    Ok(counts)
}
