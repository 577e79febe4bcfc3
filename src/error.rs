use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Missing required column(s): {}", missing.join(", "))]
    Schema { missing: Vec<&'static str> },

    #[error("Merge into {table} failed: {source}")]
    Upsert {
        table: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Cannot open destination {}: {source}", path.display())]
    Destination {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl IngestError {
    /// Stable name of the error kind, reported to the invoking layer.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Schema { .. } => "SchemaError",
            Self::Upsert { .. } | Self::Destination { .. } => "UpsertError",
            Self::Db(_) => "DatabaseError",
            Self::Io(_) | Self::Csv(_) => "ReadError",
            Self::Config(_) => "ConfigError",
            Self::Other(_) => "InternalError",
        }
    }

    /// Whether re-running the same file can succeed without any change to it.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Upsert { .. } | Self::Destination { .. } | Self::Db(_) | Self::Io(_)
        )
    }

    /// Failures while opening the destination count as merge failures.
    pub fn at_destination(self, table: &str, path: &Path) -> Self {
        match self {
            Self::Db(source) => Self::Upsert {
                table: table.to_string(),
                source,
            },
            Self::Io(source) => Self::Destination {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
