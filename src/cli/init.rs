use crate::cli::Destination;
use crate::db::{get_connection, init_db};
use crate::error::Result;
use crate::settings::{read_settings_file, save_settings, settings_path};

pub fn run(destination: &Destination) -> Result<()> {
    let config = destination.resolve()?;

    // Environment overrides apply to this run only; flags are persisted.
    let mut stored = read_settings_file();
    stored.apply(&destination.overrides());
    stored.resolve()?;
    save_settings(&stored)?;

    get_connection(&config.db_path, config.busy_timeout)
        .and_then(|conn| init_db(&conn, &config.table))
        .map_err(|e| e.at_destination(&config.table, &config.db_path))?;

    println!("Settings:  {}", settings_path().display());
    println!("Database:  {}", config.db_path.display());
    println!("Table:     {}", config.table);
    println!("Columns:   {}", config.column_map_version);
    Ok(())
}
