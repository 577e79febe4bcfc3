use comfy_table::{Cell, Table};

use crate::cli::Destination;
use crate::db::{get_connection, table_exists};
use crate::error::Result;
use crate::fmt::format_bytes;

pub fn run(runs: usize, destination: &Destination) -> Result<()> {
    let config = destination.resolve()?;

    println!("Database:  {}", config.db_path.display());
    println!("Table:     {}", config.table);
    println!("Columns:   {}", config.column_map_version);

    if !config.db_path.exists() {
        println!();
        println!("Database not found. Run `earnings-ingest init` or ingest a file first.");
        return Ok(());
    }
    let size = std::fs::metadata(&config.db_path)?.len();
    println!("DB size:   {}", format_bytes(size));

    let conn = get_connection(&config.db_path, config.busy_timeout)?;
    if !table_exists(&conn, &config.table)? {
        println!();
        println!("Table {} does not exist yet.", config.table);
        return Ok(());
    }

    let (rows, first, last): (i64, Option<String>, Option<String>) = conn.query_row(
        &format!("SELECT count(*), min(date), max(date) FROM {}", config.table),
        [],
        |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
    )?;
    let codeless: i64 = conn.query_row(
        &format!(
            "SELECT count(*) FROM {} WHERE confirmation_code IS NULL",
            config.table
        ),
        [],
        |r| r.get(0),
    )?;
    println!();
    println!("Rows:          {rows}");
    println!("Without code:  {codeless}");
    println!(
        "Date range:    {} .. {}",
        first.as_deref().unwrap_or("-"),
        last.as_deref().unwrap_or("-")
    );

    if !table_exists(&conn, "ingest_runs")? {
        return Ok(());
    }
    let mut stmt = conn.prepare(
        "SELECT ingested_at, filename, rows_inserted, rows_updated, rows_unchanged, rows_rejected \
         FROM ingest_runs WHERE destination_table = ?1 ORDER BY id DESC LIMIT ?2",
    )?;
    let recent: Vec<(String, String, i64, i64, i64, i64)> = stmt
        .query_map(rusqlite::params![config.table, runs as i64], |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut table = Table::new();
    table.set_header(vec!["Ingested", "File", "Inserted", "Updated", "Unchanged", "Rejected"]);
    for (at, file, inserted, updated, unchanged, rejected) in recent {
        table.add_row(vec![
            Cell::new(at),
            Cell::new(file),
            Cell::new(inserted),
            Cell::new(updated),
            Cell::new(unchanged),
            Cell::new(rejected),
        ]);
    }
    println!();
    println!("Recent runs\n{table}");
    Ok(())
}
