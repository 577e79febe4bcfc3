use std::path::Path;

use csv::StringRecord;
use encoding_rs_io::DecodeReaderBytesBuilder;
use log::{error, info, warn};
use rusqlite::Connection;
use serde::Serialize;

use crate::db::get_connection;
use crate::error::{IngestError, Result};
use crate::identity::{assign, file_checksum};
use crate::mapper::{map_headers, ColumnMapping};
use crate::models::CanonicalRecord;
use crate::normalizer::{normalize_record, NormalizationError};
use crate::settings::IngestConfig;
use crate::upsert::{merge, RunInfo};

/// Progress of one file. `Merged`, `Failed` and `Skipped` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Received,
    Mapped,
    Normalized,
    Hashed,
    Merged,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct Failure {
    pub kind: &'static str,
    pub message: String,
    pub retryable: bool,
}

/// Result record handed back to the invoking layer.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub file: String,
    pub stage: Stage,
    pub rows_inserted: usize,
    pub rows_updated: usize,
    pub rows_unchanged: usize,
    pub rows_collapsed: usize,
    pub rows_rejected: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rejections: Vec<NormalizationError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Failure>,
}

impl IngestReport {
    fn new(file: &str) -> Self {
        Self {
            file: file.to_string(),
            stage: Stage::Received,
            rows_inserted: 0,
            rows_updated: 0,
            rows_unchanged: 0,
            rows_collapsed: 0,
            rows_rejected: 0,
            rejections: Vec::new(),
            error: None,
        }
    }

    pub fn failed(file: &str, err: &IngestError) -> Self {
        let mut report = Self::new(file);
        report.fail(err);
        report
    }

    pub fn is_failed(&self) -> bool {
        self.stage == Stage::Failed
    }

    fn advance(&mut self, stage: Stage) {
        info!("{}: {:?} -> {:?}", self.file, self.stage, stage);
        self.stage = stage;
    }

    fn fail(&mut self, err: &IngestError) {
        error!("{}: failed at {:?}: {err}", self.file, self.stage);
        self.stage = Stage::Failed;
        self.rows_inserted = 0;
        self.rows_updated = 0;
        self.rows_unchanged = 0;
        self.rows_collapsed = 0;
        self.error = Some(Failure {
            kind: err.kind(),
            message: err.to_string(),
            retryable: err.is_retryable(),
        });
    }
}

pub fn is_csv_name(name: &str) -> bool {
    name.to_ascii_lowercase().ends_with(".csv")
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

fn read_csv(bytes: &[u8], config: &IngestConfig) -> Result<(StringRecord, Vec<csv::Result<StringRecord>>)> {
    let decoded = DecodeReaderBytesBuilder::new()
        .encoding(Some(config.encoding))
        .build(bytes);
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(decoded);
    let headers = rdr.headers()?.clone();
    Ok((headers, rdr.records().collect()))
}

fn normalize_all(
    records: Vec<csv::Result<StringRecord>>,
    mapping: &ColumnMapping,
    report: &mut IngestReport,
) -> Vec<CanonicalRecord> {
    let mut out = Vec::with_capacity(records.len());
    for (i, result) in records.into_iter().enumerate() {
        // Header is line 1; fall back to counting when the reader has no position.
        let fallback_line = i as u64 + 2;
        let rejection = match result {
            Ok(record) => {
                let line = record.position().map_or(fallback_line, |p| p.line());
                match normalize_record(&record, mapping, line) {
                    Ok(canonical) => {
                        out.push(canonical);
                        continue;
                    }
                    Err(e) => e,
                }
            }
            Err(e) => NormalizationError {
                line: e.position().map_or(fallback_line, |p| p.line()),
                field: "record",
                value: String::new(),
                reason: e.to_string(),
            },
        };
        warn!("{}: rejected {rejection}", report.file);
        report.rejections.push(rejection);
    }
    report.rows_rejected = report.rejections.len();
    out
}

fn run(conn: &mut Connection, bytes: &[u8], config: &IngestConfig, report: &mut IngestReport) -> Result<()> {
    let (headers, records) = read_csv(bytes, config)?;
    let mapping = map_headers(&headers, config.column_map_version)?;
    if mapping.passthrough_count() > 0 {
        info!(
            "{}: {} unrecognised column(s) kept as passthrough",
            report.file,
            mapping.passthrough_count()
        );
    }
    report.advance(Stage::Mapped);

    let canonical = normalize_all(records, &mapping, report);
    report.advance(Stage::Normalized);

    let rows = assign(canonical);
    report.advance(Stage::Hashed);

    let checksum = file_checksum(bytes);
    let run_info = RunInfo {
        filename: &report.file,
        checksum: &checksum,
        column_map_version: config.column_map_version.key(),
        rows_rejected: report.rows_rejected,
    };
    let counts = merge(conn, &config.table, rows, &run_info)?;
    report.rows_inserted = counts.inserted;
    report.rows_updated = counts.updated;
    report.rows_unchanged = counts.unchanged;
    report.rows_collapsed = counts.collapsed;
    report.advance(Stage::Merged);
    Ok(())
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Ingest one file's bytes. Never returns an error: failures are reported
/// in the returned record so the caller can decide whether to retry.
pub fn handle(conn: &mut Connection, file: &str, bytes: &[u8], config: &IngestConfig) -> IngestReport {
    let mut report = IngestReport::new(file);
    info!("{file}: received {} bytes for {}", bytes.len(), config.table);
    if let Err(e) = run(conn, bytes, config, &mut report) {
        report.fail(&e);
    } else {
        info!(
            "{file}: {} inserted, {} updated, {} unchanged, {} rejected",
            report.rows_inserted, report.rows_updated, report.rows_unchanged, report.rows_rejected
        );
    }
    report
}

/// Ingest a file reference: a path, or `-` for stdin. Non-CSV names are
/// skipped without being read. Opens its own connection, so separate calls
/// share nothing.
pub fn handle_path(path: &Path, config: &IngestConfig) -> IngestReport {
    let name = path.to_string_lossy().to_string();
    let is_stdin = path == Path::new("-");
    if !is_stdin && !is_csv_name(&name) {
        info!("{name}: not a CSV file, skipping");
        let mut report = IngestReport::new(&name);
        report.stage = Stage::Skipped;
        return report;
    }

    let opened = (|| -> Result<(Connection, Vec<u8>)> {
        let bytes = if is_stdin {
            let mut buf = Vec::new();
            std::io::Read::read_to_end(&mut std::io::stdin().lock(), &mut buf)?;
            buf
        } else {
            std::fs::read(path)?
        };
        let conn = get_connection(&config.db_path, config.busy_timeout)
            .map_err(|e| e.at_destination(&config.table, &config.db_path))?;
        Ok((conn, bytes))
    })();

    match opened {
        Ok((mut conn, bytes)) => handle(&mut conn, &name, &bytes, config),
        Err(e) => IngestReport::failed(&name, &e),
    }
}
