use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use encoding_rs::{Encoding, UTF_8};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{IngestError, Result};
use crate::mapper::ColumnMapVersion;

pub const CONFIG_ENV: &str = "EARNINGS_INGEST_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub data_dir: String,
    #[serde(default = "default_dataset")]
    pub destination_dataset: String,
    #[serde(default = "default_table")]
    pub destination_table: String,
    #[serde(default = "default_column_map_version")]
    pub column_map_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_encoding: Option<String>,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_dataset() -> String {
    "airbnb_management".to_string()
}

fn default_table() -> String {
    "earnings_cleaned".to_string()
}

fn default_column_map_version() -> String {
    ColumnMapVersion::default().key().to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir().to_string_lossy().to_string(),
            destination_dataset: default_dataset(),
            destination_table: default_table(),
            column_map_version: default_column_map_version(),
            input_encoding: None,
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".local")
        .join("share")
        .join("earnings-ingest")
}

pub fn settings_path() -> PathBuf {
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        return PathBuf::from(path);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("earnings-ingest")
        .join("settings.json")
}

/// The settings file alone, as `save_settings` would write it back.
pub fn read_settings_file() -> Settings {
    let path = settings_path();
    if !path.exists() {
        return Settings::default();
    }
    let content = std::fs::read_to_string(&path).unwrap_or_default();
    serde_json::from_str(&content).unwrap_or_else(|e| {
        log::warn!("Ignoring unreadable settings file {}: {e}", path.display());
        Settings::default()
    })
}

/// Settings file merged with `INGEST_*` environment overrides.
pub fn load_settings() -> Settings {
    let mut settings = read_settings_file();
    settings.apply_env(|key| std::env::var(key).ok());
    settings
}

pub fn save_settings(settings: &Settings) -> Result<()> {
    let path = settings_path();
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let json = serde_json::to_string_pretty(settings)
        .map_err(|e| IngestError::Config(e.to_string()))?;
    std::fs::write(path, format!("{json}\n"))?;
    Ok(())
}

/// Flag values that take precedence over the settings file and environment.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub data_dir: Option<String>,
    pub dataset: Option<String>,
    pub table: Option<String>,
    pub column_map_version: Option<String>,
}

impl Settings {
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("INGEST_DATA_DIR") {
            self.data_dir = v;
        }
        if let Some(v) = var("INGEST_DATASET_ID") {
            self.destination_dataset = v;
        }
        if let Some(v) = var("INGEST_TABLE_ID") {
            self.destination_table = v;
        }
        if let Some(v) = var("INGEST_COLUMN_MAP_VERSION") {
            self.column_map_version = v;
        }
    }

    pub fn apply(&mut self, overrides: &Overrides) {
        if let Some(v) = &overrides.data_dir {
            self.data_dir = shellexpand_path(v);
        }
        if let Some(v) = &overrides.dataset {
            self.destination_dataset = v.clone();
        }
        if let Some(v) = &overrides.table {
            self.destination_table = v.clone();
        }
        if let Some(v) = &overrides.column_map_version {
            self.column_map_version = v.clone();
        }
    }

    /// Validate and resolve into what one ingestion needs.
    pub fn resolve(&self) -> Result<IngestConfig> {
        let dataset = sql_identifier(&self.destination_dataset)?;
        let table = sql_identifier(&self.destination_table)?;
        let encoding = match &self.input_encoding {
            Some(label) => Encoding::for_label(label.trim().as_bytes())
                .ok_or_else(|| IngestError::Config(format!("Unknown encoding '{label}'")))?,
            None => UTF_8,
        };
        Ok(IngestConfig {
            db_path: PathBuf::from(&self.data_dir).join(format!("{dataset}.db")),
            table,
            column_map_version: self.column_map_version.parse()?,
            encoding,
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
        })
    }
}

#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// One SQLite file per destination dataset.
    pub db_path: PathBuf,
    pub table: String,
    pub column_map_version: ColumnMapVersion,
    pub encoding: &'static Encoding,
    pub busy_timeout: Duration,
}

fn identifier_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("valid identifier pattern"))
}

/// Dataset and table names are spliced into SQL and file names, so only
/// plain identifiers are accepted.
pub fn sql_identifier(name: &str) -> Result<String> {
    let name = name.trim();
    if identifier_re().is_match(name) && !name.to_ascii_lowercase().starts_with("sqlite_") {
        Ok(name.to_string())
    } else {
        Err(IngestError::Config(format!(
            "Invalid dataset/table name '{name}' (letters, digits and underscores only)"
        )))
    }
}

pub fn shellexpand_path(path: &str) -> String {
    if path.starts_with('~') {
        if let Some(home) = dirs::home_dir() {
            return path.replacen('~', &home.to_string_lossy(), 1);
        }
    }
    std::fs::canonicalize(path)
        .unwrap_or_else(|_| PathBuf::from(path))
        .to_string_lossy()
        .to_string()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_defaults() {
        let s = Settings::default();
        assert_eq!(s.destination_dataset, "airbnb_management");
        assert_eq!(s.destination_table, "earnings_cleaned");
        assert_eq!(s.column_map_version, "v2");
        assert_eq!(s.busy_timeout_ms, 5000);
        assert!(!s.data_dir.is_empty());
    }

    #[test]
    fn test_load_merges_with_defaults() {
        let json = r#"{"data_dir": "/tmp/test", "destination_table": "payouts"}"#;
        let s: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(s.destination_table, "payouts");
        assert_eq!(s.destination_dataset, "airbnb_management");
        assert_eq!(s.input_encoding, None);
    }

    #[test]
    fn test_env_then_flags_precedence() {
        let env: HashMap<&str, &str> = [
            ("INGEST_DATASET_ID", "from_env"),
            ("INGEST_TABLE_ID", "env_table"),
        ]
        .into_iter()
        .collect();
        let mut s = Settings::default();
        s.apply_env(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(s.destination_dataset, "from_env");
        assert_eq!(s.destination_table, "env_table");

        s.apply(&Overrides {
            table: Some("flag_table".to_string()),
            ..Default::default()
        });
        assert_eq!(s.destination_dataset, "from_env");
        assert_eq!(s.destination_table, "flag_table");
    }

    #[test]
    fn test_resolve_builds_db_path_per_dataset() {
        let s = Settings {
            data_dir: "/data".to_string(),
            ..Settings::default()
        };
        let cfg = s.resolve().unwrap();
        assert_eq!(cfg.db_path, PathBuf::from("/data/airbnb_management.db"));
        assert_eq!(cfg.table, "earnings_cleaned");
        assert_eq!(cfg.column_map_version, ColumnMapVersion::V2);
        assert_eq!(cfg.encoding, UTF_8);
    }

    #[test]
    fn test_resolve_rejects_bad_names() {
        for bad in ["../etc", "drop table", "1abc", "", "sqlite_master"] {
            let s = Settings {
                destination_table: bad.to_string(),
                ..Settings::default()
            };
            assert!(s.resolve().is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn test_resolve_encoding_and_version() {
        let mut s = Settings {
            input_encoding: Some("shift_jis".to_string()),
            column_map_version: "v1".to_string(),
            ..Settings::default()
        };
        let cfg = s.resolve().unwrap();
        assert_eq!(cfg.encoding, encoding_rs::SHIFT_JIS);
        assert_eq!(cfg.column_map_version, ColumnMapVersion::V1);

        s.input_encoding = Some("klingon".to_string());
        assert_eq!(s.resolve().unwrap_err().kind(), "ConfigError");
    }
}
