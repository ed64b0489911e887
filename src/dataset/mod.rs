//! Transaction feed: raw rows, validated transactions, and CSV ingestion.
//! Validation is fail-fast; one bad row rejects the whole feed.

mod loader;
mod raw;

use crate::error::{FeatureStoreError, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

pub use loader::{read_records, read_transactions, validate_all, FeedFormat};
pub use raw::{merchant_pseudonym, user_pseudonym, RawCardRecord};

/// Canonical text form of timestamps in every produced table.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One row of the transaction feed before validation. Every column is optional text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub merchant_id: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub amount: Option<String>,
    #[serde(default)]
    pub is_fraud: Option<String>,
    #[serde(default)]
    pub event_timestamp: Option<String>,
    #[serde(default)]
    pub lat: Option<String>,
    #[serde(default)]
    pub long: Option<String>,
    #[serde(default)]
    pub merch_lat: Option<String>,
    #[serde(default)]
    pub merch_long: Option<String>,
}

/// Geo columns; not used by any aggregate except merchant coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GeoFields {
    pub lat: Option<f64>,
    pub long: Option<f64>,
    pub merch_lat: Option<f64>,
    pub merch_long: Option<f64>,
}

/// Validated transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub transaction_id: Option<String>,
    pub user_id: String,
    pub merchant_id: Option<String>,
    pub category: Option<String>,
    pub amount: f64,
    pub is_fraud: bool,
    #[serde(with = "timestamp_text")]
    pub event_timestamp: NaiveDateTime,
    #[serde(flatten)]
    pub geo: GeoFields,
}

impl Transaction {
    pub fn new(
        user_id: impl Into<String>,
        amount: f64,
        is_fraud: bool,
        event_timestamp: NaiveDateTime,
    ) -> Self {
        Self {
            transaction_id: None,
            user_id: user_id.into(),
            merchant_id: None,
            category: None,
            amount,
            is_fraud,
            event_timestamp,
            geo: GeoFields::default(),
        }
    }

    pub fn with_merchant(mut self, merchant_id: impl Into<String>) -> Self {
        self.merchant_id = Some(merchant_id.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_id(mut self, transaction_id: impl Into<String>) -> Self {
        self.transaction_id = Some(transaction_id.into());
        self
    }

    /// Calendar date of the event; the unit of snapshotting.
    pub fn date(&self) -> NaiveDate {
        self.event_timestamp.date()
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn parse_optional_f64(row: usize, field: &'static str, value: &Option<String>) -> Result<Option<f64>> {
    match present(value) {
        None => Ok(None),
        Some(s) => s
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(Some)
            .ok_or_else(|| FeatureStoreError::invalid(row, field, s)),
    }
}

fn parse_fraud_label(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "1" | "1.0" | "true" => Some(true),
        "0" | "0.0" | "false" => Some(false),
        _ => None,
    }
}

impl TransactionRecord {
    /// Validate into a typed transaction. `row` is used only for error reporting.
    pub fn validate(&self, row: usize) -> Result<Transaction> {
        let user_id = present(&self.user_id)
            .ok_or(FeatureStoreError::MissingField { row, field: "user_id" })?;

        let raw_amount = present(&self.amount)
            .ok_or(FeatureStoreError::MissingField { row, field: "amount" })?;
        let amount = raw_amount
            .parse::<f64>()
            .ok()
            .filter(|a| a.is_finite() && *a >= 0.0)
            .ok_or_else(|| FeatureStoreError::invalid(row, "amount", raw_amount))?;

        let raw_fraud = present(&self.is_fraud)
            .ok_or(FeatureStoreError::MissingField { row, field: "is_fraud" })?;
        let is_fraud = parse_fraud_label(raw_fraud)
            .ok_or_else(|| FeatureStoreError::invalid(row, "is_fraud", raw_fraud))?;

        let raw_ts = present(&self.event_timestamp).ok_or(FeatureStoreError::MissingField {
            row,
            field: "event_timestamp",
        })?;
        let event_timestamp = parse_timestamp(raw_ts)
            .ok_or_else(|| FeatureStoreError::invalid(row, "event_timestamp", raw_ts))?;

        let geo = GeoFields {
            lat: parse_optional_f64(row, "lat", &self.lat)?,
            long: parse_optional_f64(row, "long", &self.long)?,
            merch_lat: parse_optional_f64(row, "merch_lat", &self.merch_lat)?,
            merch_long: parse_optional_f64(row, "merch_long", &self.merch_long)?,
        };

        Ok(Transaction {
            transaction_id: present(&self.transaction_id).map(str::to_string),
            user_id: user_id.to_string(),
            merchant_id: present(&self.merchant_id).map(str::to_string),
            category: present(&self.category).map(str::to_string),
            amount,
            is_fraud,
            event_timestamp,
            geo,
        })
    }
}

/// Canonical feed row for a validated transaction.
impl From<&Transaction> for TransactionRecord {
    fn from(t: &Transaction) -> Self {
        let text = |v: Option<f64>| v.map(|x| x.to_string());
        Self {
            transaction_id: t.transaction_id.clone(),
            user_id: Some(t.user_id.clone()),
            merchant_id: t.merchant_id.clone(),
            category: t.category.clone(),
            amount: Some(t.amount.to_string()),
            is_fraud: Some(if t.is_fraud { "1" } else { "0" }.to_string()),
            event_timestamp: Some(format_timestamp(&t.event_timestamp)),
            lat: text(t.geo.lat),
            long: text(t.geo.long),
            merch_lat: text(t.geo.merch_lat),
            merch_long: text(t.geo.merch_long),
        }
    }
}

/// Accepts `YYYY-MM-DD HH:MM:SS[.f]`, the `T`-separated form, RFC 3339 (converted
/// to UTC) and bare dates (midnight).
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    const FORMATS: [&str; 5] = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
    ];
    for fmt in FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(ts);
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Serde adapter writing timestamps as `YYYY-MM-DD HH:MM:SS`.
pub mod timestamp_text {
    use super::{format_timestamp, parse_timestamp};
    use chrono::NaiveDateTime;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format_timestamp(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(d)?;
        parse_timestamp(&raw).ok_or_else(|| D::Error::custom(format!("invalid timestamp {raw:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> TransactionRecord {
        TransactionRecord {
            transaction_id: Some("t1".into()),
            user_id: Some("U1".into()),
            merchant_id: Some("M1".into()),
            category: Some("grocery_pos".into()),
            amount: Some("12.50".into()),
            is_fraud: Some("0".into()),
            event_timestamp: Some("2024-01-05 13:45:00".into()),
            ..Default::default()
        }
    }

    #[test]
    fn validates_complete_row() {
        let tx = record().validate(1).unwrap();
        assert_eq!(tx.user_id, "U1");
        assert_eq!(tx.amount, 12.5);
        assert!(!tx.is_fraud);
        assert_eq!(tx.date(), NaiveDate::from_ymd_opt(2024, 1, 5).unwrap());
    }

    #[test]
    fn missing_user_is_reported_with_row() {
        let mut r = record();
        r.user_id = Some("  ".into());
        match r.validate(7) {
            Err(FeatureStoreError::MissingField { row, field }) => {
                assert_eq!(row, 7);
                assert_eq!(field, "user_id");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rejects_non_numeric_and_negative_amounts() {
        let mut r = record();
        r.amount = Some("abc".into());
        assert!(matches!(
            r.validate(1),
            Err(FeatureStoreError::InvalidField { field: "amount", .. })
        ));
        r.amount = Some("-3".into());
        assert!(r.validate(1).is_err());
        r.amount = Some("NaN".into());
        assert!(r.validate(1).is_err());
    }

    #[test]
    fn rejects_malformed_timestamp_and_label() {
        let mut r = record();
        r.event_timestamp = Some("yesterday".into());
        assert!(matches!(
            r.validate(1),
            Err(FeatureStoreError::InvalidField { field: "event_timestamp", .. })
        ));
        let mut r = record();
        r.is_fraud = Some("maybe".into());
        assert!(matches!(
            r.validate(1),
            Err(FeatureStoreError::InvalidField { field: "is_fraud", .. })
        ));
    }

    #[test]
    fn timestamp_formats() {
        let expected = NaiveDate::from_ymd_opt(2019, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 18)
            .unwrap();
        assert_eq!(parse_timestamp("2019-01-01 00:00:18"), Some(expected));
        assert_eq!(parse_timestamp("2019-01-01T00:00:18"), Some(expected));
        assert_eq!(parse_timestamp("2019-01-01T02:00:18+02:00"), Some(expected));
        assert_eq!(
            parse_timestamp("2019-01-01"),
            NaiveDate::from_ymd_opt(2019, 1, 1).unwrap().and_hms_opt(0, 0, 0)
        );
        assert_eq!(parse_timestamp("01/01/2019"), None);
    }

    #[test]
    fn optional_columns_stay_optional() {
        let mut r = record();
        r.merchant_id = None;
        r.category = Some(String::new());
        r.lat = Some("40.5".into());
        let tx = r.validate(1).unwrap();
        assert_eq!(tx.merchant_id, None);
        assert_eq!(tx.category, None);
        assert_eq!(tx.geo.lat, Some(40.5));
        r.merch_long = Some("east".into());
        assert!(r.validate(1).is_err());
    }
}
