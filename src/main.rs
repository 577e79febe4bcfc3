mod cli;
mod db;
mod error;
mod fmt;
mod identity;
mod ingest;
mod mapper;
mod models;
mod normalizer;
mod settings;
mod upsert;

use std::sync::OnceLock;

use clap::Parser;
use log::LevelFilter;

use cli::{Cli, Commands};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if std::env::var("RUST_LOG").is_err() {
            builder.filter_module("earnings_ingest", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

fn main() {
    init_logging();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Init { destination } => cli::init::run(&destination),
        Commands::Ingest { files, destination } => cli::ingest::run(&files, &destination),
        Commands::Status { runs, destination } => cli::status::run(runs, &destination),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
