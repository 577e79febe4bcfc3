use rust_decimal::Decimal;
use sha2::{Digest, Sha256};

use crate::models::{CanonicalRecord, RowIdentity, WarehouseRow};

/// Bumped whenever the digest input layout changes.
const SCHEME: &str = "row-identity/1";
/// ASCII unit separator; never produced by the normalizer for real exports.
const SEP: u8 = 0x1f;

/// Amounts hash by value, so `1,000.00` and `1000` agree.
fn canonical_amount(amount: Decimal) -> String {
    amount.normalize().to_string()
}

/// Digest input, in order: scheme, date, amount, type, code slot. The code
/// slot is `C<code>` when a confirmation code exists and `N` otherwise, so
/// code-less lines are identified by date, amount and type alone and
/// identical payouts on the same day share one identity.
fn digest_input(record: &CanonicalRecord) -> Vec<u8> {
    let date = record.date.format("%Y-%m-%d").to_string();
    let amount = canonical_amount(record.amount);
    let code_slot = match &record.confirmation_code {
        Some(code) => format!("C{code}"),
        None => "N".to_string(),
    };
    let parts = [SCHEME, date.as_str(), amount.as_str(), record.kind.as_str(), code_slot.as_str()];

    let mut buf = Vec::with_capacity(parts.iter().map(|p| p.len() + 1).sum());
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            buf.push(SEP);
        }
        buf.extend_from_slice(part.as_bytes());
    }
    buf
}

pub fn row_identity(record: &CanonicalRecord) -> RowIdentity {
    let mut hasher = Sha256::new();
    hasher.update(digest_input(record));
    RowIdentity(hex::encode(hasher.finalize()))
}

pub fn assign(records: Vec<CanonicalRecord>) -> Vec<WarehouseRow> {
    records
        .into_iter()
        .map(|record| WarehouseRow {
            identity: row_identity(&record),
            record,
        })
        .collect()
}

/// SHA-256 of a whole input file, recorded in the run ledger.
pub fn file_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use chrono::NaiveDate;
    use csv::StringRecord;

    use super::*;
    use crate::mapper::{map_headers, ColumnMapVersion};
    use crate::normalizer::normalize_record;

    fn record(date: (i32, u32, u32), amount: &str, kind: &str, code: Option<&str>) -> CanonicalRecord {
        let mut r = CanonicalRecord::new(NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap());
        r.amount = Decimal::from_str(amount).unwrap();
        r.kind = kind.to_string();
        r.confirmation_code = code.map(str::to_string);
        r
    }

    #[test]
    fn test_identity_is_fixed_length_hex() {
        let id = row_identity(&record((2023, 7, 4), "100", "Reservation", Some("HM1")));
        assert_eq!(id.as_str().len(), RowIdentity::LEN);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_identity_is_deterministic() {
        let a = record((2023, 7, 4), "100", "Reservation", Some("HM1"));
        assert_eq!(row_identity(&a), row_identity(&a.clone()));
    }

    #[test]
    fn test_identity_ignores_non_distinguishing_fields() {
        let a = record((2023, 7, 4), "100", "Reservation", Some("HM1"));
        let mut b = a.clone();
        b.listing_name = "Renamed listing".to_string();
        b.passthrough.insert("Nights".to_string(), "2".to_string());
        assert_eq!(row_identity(&a), row_identity(&b));
    }

    #[test]
    fn test_identity_ignores_amount_formatting() {
        let a = record((2023, 7, 4), "1000.00", "Payout", None);
        let b = record((2023, 7, 4), "1000", "Payout", None);
        assert_eq!(row_identity(&a), row_identity(&b));
    }

    #[test]
    fn test_identity_independent_of_column_order() {
        let m1 = map_headers(&StringRecord::from(vec!["日付", "種別", "金額", "確認コード"]), ColumnMapVersion::V1).unwrap();
        let m2 = map_headers(&StringRecord::from(vec!["確認コード", "金額", "日付", "種別"]), ColumnMapVersion::V1).unwrap();
        let r1 = normalize_record(&StringRecord::from(vec!["07/04/2023", "予約", "¥15,000", "HMX"]), &m1, 2).unwrap();
        let r2 = normalize_record(&StringRecord::from(vec!["HMX", "15000", "07/04/2023", "予約"]), &m2, 2).unwrap();
        assert_eq!(row_identity(&r1), row_identity(&r2));
    }

    #[test]
    fn test_distinguishing_fields_change_identity() {
        let base = record((2023, 7, 4), "100", "Reservation", Some("HM1"));
        let others = [
            record((2023, 7, 5), "100", "Reservation", Some("HM1")),
            record((2023, 7, 4), "101", "Reservation", Some("HM1")),
            record((2023, 7, 4), "100", "Payout", Some("HM1")),
            record((2023, 7, 4), "100", "Reservation", Some("HM2")),
            record((2023, 7, 4), "100", "Reservation", None),
        ];
        for other in &others {
            assert_ne!(row_identity(&base), row_identity(other));
        }
    }

    #[test]
    fn test_codeless_payouts_collapse() {
        let mut a = record((2023, 7, 4), "500", "Payout", None);
        let mut b = record((2023, 7, 4), "500", "Payout", None);
        a.details = "Transfer to ****1234".to_string();
        b.details = "Transfer to ****1234".to_string();
        assert_eq!(row_identity(&a), row_identity(&b));
    }

    #[test]
    fn test_code_slot_cannot_impersonate_absent_code() {
        let absent = record((2023, 7, 4), "500", "Payout", None);
        let literal = record((2023, 7, 4), "500", "Payout", Some(""));
        assert_ne!(row_identity(&absent), row_identity(&literal));
    }

    #[test]
    fn test_file_checksum() {
        assert_eq!(
            file_checksum(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
