use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;

/// Canonical field names shared by every export layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    Date,
    PayoutScheduledDate,
    Type,
    ConfirmationCode,
    BookingDate,
    StartDate,
    EndDate,
    ListingName,
    Amount,
    TotalIncome,
    Guest,
    Details,
    ReferenceCode,
    Currency,
}

impl Field {
    pub fn key(&self) -> &'static str {
        match self {
            Self::Date => "date",
            Self::PayoutScheduledDate => "payout_scheduled_date",
            Self::Type => "type",
            Self::ConfirmationCode => "confirmation_code",
            Self::BookingDate => "booking_date",
            Self::StartDate => "start_date",
            Self::EndDate => "end_date",
            Self::ListingName => "listing_name",
            Self::Amount => "amount",
            Self::TotalIncome => "total_income",
            Self::Guest => "guest",
            Self::Details => "details",
            Self::ReferenceCode => "reference_code",
            Self::Currency => "currency",
        }
    }

    /// Fields without which no row identity can be computed.
    pub const REQUIRED: &'static [Field] = &[Field::Date, Field::Amount];
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// One normalized export line. Every field is populated; absent text is
/// empty, absent numbers are zero. Only the confirmation code and the
/// auxiliary dates carry an explicit "absent" state.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalRecord {
    pub date: NaiveDate,
    pub amount: Decimal,
    pub kind: String,
    pub confirmation_code: Option<String>,
    pub payout_scheduled_date: Option<NaiveDate>,
    pub booking_date: Option<NaiveDate>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub listing_name: String,
    pub guest: String,
    pub details: String,
    pub reference_code: String,
    pub currency: String,
    pub total_income: Decimal,
    pub passthrough: BTreeMap<String, String>,
}

impl CanonicalRecord {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            amount: Decimal::ZERO,
            kind: String::new(),
            confirmation_code: None,
            payout_scheduled_date: None,
            booking_date: None,
            start_date: None,
            end_date: None,
            listing_name: String::new(),
            guest: String::new(),
            details: String::new(),
            reference_code: String::new(),
            currency: String::new(),
            total_income: Decimal::ZERO,
            passthrough: BTreeMap::new(),
        }
    }
}

/// Hex SHA-256 digest identifying a logical earnings line.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RowIdentity(pub(crate) String);

impl RowIdentity {
    pub const LEN: usize = 64;

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RowIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A canonical record paired with its identity, as persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct WarehouseRow {
    pub identity: RowIdentity,
    pub record: CanonicalRecord,
}
