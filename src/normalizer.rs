use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use csv::StringRecord;
use log::{debug, warn};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::mapper::{ColumnMapping, Target};
use crate::models::{CanonicalRecord, Field};

/// A row-level failure. The row is excluded from the batch and counted;
/// the rest of the file continues.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizationError {
    pub line: u64,
    pub field: &'static str,
    pub value: String,
    pub reason: String,
}

impl fmt::Display for NormalizationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "line {}: {} {:?}: {}",
            self.line, self.field, self.value, self.reason
        )
    }
}

impl std::error::Error for NormalizationError {}

// ---------------------------------------------------------------------------
// Value parsers
// ---------------------------------------------------------------------------

const CURRENCY_SYMBOLS: &[char] = &['$', '¥', '￥', '円', '€', '£', '"', ',', '，'];

/// Parse `MM/DD/YYYY` (or already-canonical `YYYY-MM-DD`) into a date.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let parts: Vec<&str> = raw.split('/').collect();
    if parts.len() == 3 {
        let m: u32 = parts[0].trim().parse().ok()?;
        let d: u32 = parts[1].trim().parse().ok()?;
        let y: i32 = parts[2].trim().parse().ok()?;
        if parts[2].trim().len() != 4 {
            return None;
        }
        return NaiveDate::from_ymd_opt(y, m, d);
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()
}

/// Parse a money value, dropping currency markers and thousands separators
/// (commas or spaces). `(12.50)` is read as negative. Returns `None` when
/// nothing numeric is left.
pub fn parse_amount(raw: &str) -> Option<Decimal> {
    let stripped: String = raw
        .chars()
        .filter(|c| !CURRENCY_SYMBOLS.contains(c) && !c.is_whitespace())
        .map(|c| if c == '−' { '-' } else { c })
        .collect();
    let s = stripped.trim_matches(|c: char| c.is_ascii_alphabetic());
    if s.is_empty() {
        return None;
    }
    if let Some(inner) = s.strip_prefix('(').and_then(|v| v.strip_suffix(')')) {
        return Decimal::from_str(inner.trim()).ok().map(|d| -d);
    }
    Decimal::from_str(s).ok()
}

/// Money columns never reject a row: anything unreadable counts as zero.
pub fn amount_or_zero(raw: &str, field: Field, line: u64) -> Decimal {
    match parse_amount(raw) {
        Some(d) => d,
        None => {
            if !raw.trim().is_empty() {
                warn!("line {line}: {field} {raw:?} is not numeric, using 0");
            }
            Decimal::ZERO
        }
    }
}

fn optional_date(raw: &str, field: Field, line: u64) -> Option<NaiveDate> {
    let parsed = parse_date(raw);
    if parsed.is_none() && !raw.trim().is_empty() {
        debug!("line {line}: {field} {raw:?} is not a date, leaving it empty");
    }
    parsed
}

fn text(raw: &str) -> String {
    raw.trim().to_string()
}

fn present(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

// ---------------------------------------------------------------------------
// Record normalization
// ---------------------------------------------------------------------------

fn cell<'r>(record: &'r StringRecord, mapping: &ColumnMapping, field: Field) -> &'r str {
    mapping
        .position(field)
        .and_then(|i| record.get(i))
        .unwrap_or("")
}

/// Turn one CSV record into a canonical record. `line` is the 1-based
/// source line, used only for reporting.
pub fn normalize_record(
    record: &StringRecord,
    mapping: &ColumnMapping,
    line: u64,
) -> Result<CanonicalRecord, NormalizationError> {
    let get = |field: Field| cell(record, mapping, field);

    let raw_date = get(Field::Date);
    let date = parse_date(raw_date).ok_or_else(|| NormalizationError {
        line,
        field: Field::Date.key(),
        value: raw_date.to_string(),
        reason: if raw_date.trim().is_empty() {
            "date is empty".to_string()
        } else {
            "expected MM/DD/YYYY".to_string()
        },
    })?;

    let mut out = CanonicalRecord::new(date);
    out.amount = amount_or_zero(get(Field::Amount), Field::Amount, line);
    out.total_income = amount_or_zero(get(Field::TotalIncome), Field::TotalIncome, line);
    out.kind = text(get(Field::Type));
    out.confirmation_code = present(get(Field::ConfirmationCode));
    out.payout_scheduled_date = optional_date(
        get(Field::PayoutScheduledDate),
        Field::PayoutScheduledDate,
        line,
    );
    out.booking_date = optional_date(get(Field::BookingDate), Field::BookingDate, line);
    out.start_date = optional_date(get(Field::StartDate), Field::StartDate, line);
    out.end_date = optional_date(get(Field::EndDate), Field::EndDate, line);
    out.listing_name = text(get(Field::ListingName));
    out.guest = text(get(Field::Guest));
    out.details = text(get(Field::Details));
    out.reference_code = text(get(Field::ReferenceCode));
    out.currency = text(get(Field::Currency));

    for (i, target) in mapping.targets().iter().enumerate() {
        if let Target::Passthrough(name) = target {
            out.passthrough
                .insert(name.clone(), text(record.get(i).unwrap_or("")));
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::{map_headers, ColumnMapVersion};

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn mapping(cols: &[&str]) -> ColumnMapping {
        map_headers(&StringRecord::from(cols.to_vec()), ColumnMapVersion::V2).unwrap()
    }

    #[test]
    fn test_parse_date_mdy() {
        assert_eq!(
            parse_date("07/04/2023").map(|d| d.format("%Y-%m-%d").to_string()),
            Some("2023-07-04".to_string())
        );
        assert_eq!(parse_date("7/4/2023"), NaiveDate::from_ymd_opt(2023, 7, 4));
        assert_eq!(parse_date("2023-07-04"), NaiveDate::from_ymd_opt(2023, 7, 4));
    }

    #[test]
    fn test_parse_date_rejects_invalid_dates() {
        assert_eq!(parse_date("13/40/2023"), None);
        assert_eq!(parse_date("02/30/2025"), None); // Feb 30
        assert_eq!(parse_date("00/15/2025"), None); // month 0
        assert_eq!(parse_date("01/15/25"), None);
        assert_eq!(parse_date(""), None);
        assert_eq!(parse_date("soon"), None);
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("1,234.56"), Some(dec("1234.56")));
        assert_eq!(parse_amount("\"500.00\""), Some(dec("500.00")));
        assert_eq!(parse_amount("  -42.50  "), Some(dec("-42.50")));
        assert_eq!(parse_amount("0"), Some(Decimal::ZERO));
        assert_eq!(parse_amount("not_a_number"), None);
        assert_eq!(parse_amount(""), None);
    }

    #[test]
    fn test_parse_amount_currency_markers() {
        assert_eq!(parse_amount("$1,234.56"), Some(dec("1234.56")));
        assert_eq!(parse_amount("-$50.00"), Some(dec("-50.00")));
        assert_eq!(parse_amount("¥12,000"), Some(dec("12000")));
        assert_eq!(parse_amount("￥12，000"), Some(dec("12000")));
        assert_eq!(parse_amount("12000 JPY"), Some(dec("12000")));
        assert_eq!(parse_amount("(1,234.56)"), Some(dec("-1234.56")));
    }

    #[test]
    fn test_parse_amount_yen_suffix_and_space_grouping() {
        assert_eq!(parse_amount("12,000円"), Some(dec("12000")));
        assert_eq!(parse_amount("¥12,000円"), Some(dec("12000")));
        assert_eq!(parse_amount("-3,500 円"), Some(dec("-3500")));
        assert_eq!(parse_amount("1 234"), Some(dec("1234")));
        assert_eq!(parse_amount("1\u{a0}234.50"), Some(dec("1234.50")));
        assert_eq!(parse_amount("円"), None);
    }

    #[test]
    fn test_normalize_full_row() {
        let m = mapping(&["日付", "種別", "確認コード", "金額", "リスティング", "泊数"]);
        let rec = StringRecord::from(vec!["07/04/2023", " 予約 ", "HMABC123", "¥15,000", "Kyoto Loft ", "3"]);
        let out = normalize_record(&rec, &m, 2).unwrap();
        assert_eq!(out.date, NaiveDate::from_ymd_opt(2023, 7, 4).unwrap());
        assert_eq!(out.kind, "予約");
        assert_eq!(out.confirmation_code.as_deref(), Some("HMABC123"));
        assert_eq!(out.amount, dec("15000"));
        assert_eq!(out.listing_name, "Kyoto Loft");
        assert_eq!(out.passthrough.get("泊数").map(String::as_str), Some("3"));
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let m = mapping(&["Date", "Amount", "Type", "Confirmation code"]);
        let rec = StringRecord::from(vec!["07/04/2023", "n/a"]);
        let out = normalize_record(&rec, &m, 3).unwrap();
        assert_eq!(out.amount, Decimal::ZERO);
        assert_eq!(out.kind, "");
        assert_eq!(out.confirmation_code, None);
        assert_eq!(out.listing_name, "");
        assert_eq!(out.total_income, Decimal::ZERO);
    }

    #[test]
    fn test_blank_confirmation_code_is_absent() {
        let m = mapping(&["Date", "Amount", "Confirmation code"]);
        let rec = StringRecord::from(vec!["07/04/2023", "10", "   "]);
        assert_eq!(normalize_record(&rec, &m, 2).unwrap().confirmation_code, None);
    }

    #[test]
    fn test_bad_date_rejects_row() {
        let m = mapping(&["Date", "Amount"]);
        let err = normalize_record(&StringRecord::from(vec!["13/40/2023", "10"]), &m, 5).unwrap_err();
        assert_eq!(err.field, "date");
        assert_eq!(err.line, 5);
        assert_eq!(err.value, "13/40/2023");

        let err = normalize_record(&StringRecord::from(vec!["", "10"]), &m, 6).unwrap_err();
        assert_eq!(err.reason, "date is empty");
    }

    #[test]
    fn test_bad_auxiliary_date_is_left_empty() {
        let m = mapping(&["Date", "Amount", "Booking date", "Start date"]);
        let rec = StringRecord::from(vec!["07/04/2023", "10", "whenever", "07/10/2023"]);
        let out = normalize_record(&rec, &m, 2).unwrap();
        assert_eq!(out.booking_date, None);
        assert_eq!(out.start_date, NaiveDate::from_ymd_opt(2023, 7, 10));
    }
}
