use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use csv::StringRecord;

use crate::error::{IngestError, Result};
use crate::models::Field;

// ---------------------------------------------------------------------------
// Translation tables
// ---------------------------------------------------------------------------

const V1_LABELS: &[(&str, Field)] = &[
    ("日付", Field::Date),
    ("入金予定日", Field::PayoutScheduledDate),
    ("種別", Field::Type),
    ("確認コード", Field::ConfirmationCode),
    ("予約日", Field::BookingDate),
    ("開始日", Field::StartDate),
    ("終了日", Field::EndDate),
    ("リスティング", Field::ListingName),
    ("金額", Field::Amount),
    ("総収入", Field::TotalIncome),
];

const V2_LABELS: &[(&str, Field)] = &[
    ("Date", Field::Date),
    ("Arriving by date", Field::PayoutScheduledDate),
    ("Type", Field::Type),
    ("Confirmation code", Field::ConfirmationCode),
    ("Booking date", Field::BookingDate),
    ("Start date", Field::StartDate),
    ("End date", Field::EndDate),
    ("Listing", Field::ListingName),
    ("Amount", Field::Amount),
    ("Gross earnings", Field::TotalIncome),
    ("Guest", Field::Guest),
    ("Details", Field::Details),
    ("Reference code", Field::ReferenceCode),
    ("Currency", Field::Currency),
    ("ゲスト", Field::Guest),
    ("詳細", Field::Details),
    ("参照コード", Field::ReferenceCode),
    ("通貨", Field::Currency),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColumnMapVersion {
    V1,
    #[default]
    V2,
}

impl ColumnMapVersion {
    pub fn key(&self) -> &'static str {
        match self {
            Self::V1 => "v1",
            Self::V2 => "v2",
        }
    }

    /// Labels recognised by this version, later versions extending earlier ones.
    fn tables(&self) -> &'static [&'static [(&'static str, Field)]] {
        match self {
            Self::V1 => &[V1_LABELS],
            Self::V2 => &[V1_LABELS, V2_LABELS],
        }
    }

    pub fn lookup(&self, header: &str) -> Option<Field> {
        self.tables()
            .iter()
            .flat_map(|t| t.iter())
            .find(|(label, _)| label.eq_ignore_ascii_case(header))
            .map(|(_, field)| *field)
    }
}

impl FromStr for ColumnMapVersion {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "v1" | "1" => Ok(Self::V1),
            "v2" | "2" => Ok(Self::V2),
            other => Err(IngestError::Config(format!(
                "Unknown column map version: {other}"
            ))),
        }
    }
}

impl fmt::Display for ColumnMapVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

// ---------------------------------------------------------------------------
// Header mapping
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Field(Field),
    /// Unrecognised column, kept under its source header.
    Passthrough(String),
}

/// Per-column canonical targets for one file's header row.
#[derive(Debug, Clone)]
pub struct ColumnMapping {
    targets: Vec<Target>,
}

impl ColumnMapping {
    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    pub fn position(&self, field: Field) -> Option<usize> {
        self.targets
            .iter()
            .position(|t| matches!(t, Target::Field(f) if *f == field))
    }

    pub fn passthrough_count(&self) -> usize {
        self.targets
            .iter()
            .filter(|t| matches!(t, Target::Passthrough(_)))
            .count()
    }
}

fn clean_header(raw: &str) -> &str {
    raw.trim_start_matches('\u{feff}').trim()
}

pub fn map_headers(headers: &StringRecord, version: ColumnMapVersion) -> Result<ColumnMapping> {
    let mut seen_fields = HashSet::new();
    let mut seen_names = HashSet::new();
    let mut targets = Vec::with_capacity(headers.len());

    for (i, raw) in headers.iter().enumerate() {
        let header = clean_header(raw);
        let field = version.lookup(header).filter(|f| seen_fields.insert(*f));
        let target = match field {
            Some(field) => Target::Field(field),
            None => {
                let mut name = if header.is_empty() {
                    format!("column_{}", i + 1)
                } else {
                    header.to_string()
                };
                if !seen_names.insert(name.clone()) {
                    name = format!("{name}_{}", i + 1);
                    seen_names.insert(name.clone());
                }
                Target::Passthrough(name)
            }
        };
        targets.push(target);
    }

    let missing: Vec<&'static str> = Field::REQUIRED
        .iter()
        .filter(|f| !seen_fields.contains(*f))
        .map(|f| f.key())
        .collect();
    if !missing.is_empty() {
        return Err(IngestError::Schema { missing });
    }

    Ok(ColumnMapping { targets })
}
