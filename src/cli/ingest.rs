use std::path::PathBuf;

use log::info;

use crate::cli::Destination;
use crate::db::{get_connection, init_db};
use crate::error::{IngestError, Result};
use crate::ingest::{handle_path, IngestReport};

/// Every file runs on its own thread with its own connection; the
/// database serializes overlapping merges.
pub fn run(files: &[PathBuf], destination: &Destination) -> Result<()> {
    let config = destination.resolve()?;
    info!(
        "Ingesting {} file(s) into {}:{}",
        files.len(),
        config.db_path.display(),
        config.table
    );

    // Create the database, WAL mode and table once, before invocations race for them.
    get_connection(&config.db_path, config.busy_timeout)
        .and_then(|conn| init_db(&conn, &config.table))
        .map_err(|e| e.at_destination(&config.table, &config.db_path))?;

    let reports: Vec<IngestReport> = std::thread::scope(|s| {
        let handles: Vec<_> = files
            .iter()
            .map(|file| {
                let config = &config;
                s.spawn(move || handle_path(file, config))
            })
            .collect();
        handles
            .into_iter()
            .zip(files)
            .map(|(h, file)| {
                h.join().unwrap_or_else(|_| {
                    IngestReport::failed(
                        &file.to_string_lossy(),
                        &IngestError::Other("ingestion thread panicked".to_string()),
                    )
                })
            })
            .collect()
    });

    for report in &reports {
        let line = serde_json::to_string(report).map_err(|e| IngestError::Other(e.to_string()))?;
        println!("{line}");
    }

    let failed = reports.iter().filter(|r| r.is_failed()).count();
    if failed > 0 {
        return Err(IngestError::Other(format!(
            "{failed} of {} file(s) failed",
            reports.len()
        )));
    }
    Ok(())
}
