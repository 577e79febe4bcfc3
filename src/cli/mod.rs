pub mod ingest;
pub mod init;
pub mod status;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::error::Result;
use crate::settings::{load_settings, IngestConfig, Overrides};

#[derive(Parser)]
#[command(
    name = "earnings-ingest",
    version,
    about = "Normalize rental earnings exports and merge them into a warehouse table."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Destination and layout options shared by every command.
#[derive(Args, Debug, Clone, Default)]
pub struct Destination {
    /// Directory holding one database per dataset
    #[arg(long = "data-dir")]
    pub data_dir: Option<String>,
    /// Destination dataset (default: airbnb_management)
    #[arg(long)]
    pub dataset: Option<String>,
    /// Destination table (default: earnings_cleaned)
    #[arg(long)]
    pub table: Option<String>,
    /// Column translation table version: v1 (Japanese) or v2 (Japanese + English)
    #[arg(long = "column-map-version")]
    pub column_map_version: Option<String>,
}

impl Destination {
    fn overrides(&self) -> Overrides {
        Overrides {
            data_dir: self.data_dir.clone(),
            dataset: self.dataset.clone(),
            table: self.table.clone(),
            column_map_version: self.column_map_version.clone(),
        }
    }

    /// Settings file, then environment, then these flags.
    pub fn resolve(&self) -> Result<IngestConfig> {
        let mut settings = load_settings();
        settings.apply(&self.overrides());
        settings.resolve()
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Save settings and create the destination table.
    Init {
        #[command(flatten)]
        destination: Destination,
    },
    /// Ingest one or more earnings CSV files (`-` reads stdin).
    Ingest {
        /// Files to ingest; each is processed independently
        #[arg(required = true)]
        files: Vec<PathBuf>,
        #[command(flatten)]
        destination: Destination,
    },
    /// Show the destination table and recent ingestion runs.
    Status {
        /// Number of recent runs to list
        #[arg(long, default_value_t = 10)]
        runs: usize,
        #[command(flatten)]
        destination: Destination,
    },
}
