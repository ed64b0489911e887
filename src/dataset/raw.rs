//! Raw card-transaction log (one row per card swipe) mapped onto the feed schema.

use super::TransactionRecord;
use serde::Deserialize;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawCardRecord {
    #[serde(default)]
    pub trans_num: Option<String>,
    #[serde(default)]
    pub cc_num: Option<String>,
    #[serde(default)]
    pub merchant: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub amt: Option<String>,
    #[serde(default)]
    pub is_fraud: Option<String>,
    #[serde(default)]
    pub trans_date_trans_time: Option<String>,
    #[serde(default)]
    pub lat: Option<String>,
    #[serde(default)]
    pub long: Option<String>,
    #[serde(default)]
    pub merch_lat: Option<String>,
    #[serde(default)]
    pub merch_long: Option<String>,
}

fn short_digest(value: &str) -> String {
    let mut h = Sha256::new();
    h.update(value.as_bytes());
    let hex = format!("{:x}", h.finalize());
    hex[..8].to_string()
}

/// Card numbers never leave this function in clear.
pub fn user_pseudonym(cc_num: &str) -> String {
    format!("user_{}", short_digest(cc_num.trim()))
}

pub fn merchant_pseudonym(merchant: &str) -> String {
    format!("merch_{}", short_digest(merchant.trim()))
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.filter(|s| !s.trim().is_empty())
}

impl From<RawCardRecord> for TransactionRecord {
    fn from(raw: RawCardRecord) -> Self {
        Self {
            transaction_id: raw.trans_num,
            user_id: non_empty(raw.cc_num).map(|c| user_pseudonym(&c)),
            merchant_id: non_empty(raw.merchant).map(|m| merchant_pseudonym(&m)),
            category: raw.category,
            amount: raw.amt,
            is_fraud: raw.is_fraud,
            event_timestamp: raw.trans_date_trans_time,
            lat: raw.lat,
            long: raw.long,
            merch_lat: raw.merch_lat,
            merch_long: raw.merch_long,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pseudonyms_are_stable_and_prefixed() {
        let a = user_pseudonym("2703186189652095");
        let b = user_pseudonym("2703186189652095");
        assert_eq!(a, b);
        assert!(a.starts_with("user_"));
        assert_eq!(a.len(), "user_".len() + 8);
        assert_ne!(a, user_pseudonym("4613314721966"));
        assert!(merchant_pseudonym("fraud_Rippin, Kub and Mann").starts_with("merch_"));
    }

    #[test]
    fn raw_row_maps_to_feed_row() {
        let raw = RawCardRecord {
            trans_num: Some("0b242abb".into()),
            cc_num: Some("2703186189652095".into()),
            merchant: Some("fraud_Rippin".into()),
            category: Some("misc_net".into()),
            amt: Some("4.97".into()),
            is_fraud: Some("0".into()),
            trans_date_trans_time: Some("2019-01-01 00:00:18".into()),
            ..Default::default()
        };
        let rec = TransactionRecord::from(raw);
        assert_eq!(rec.user_id.as_deref(), Some(user_pseudonym("2703186189652095").as_str()));
        let tx = rec.validate(1).unwrap();
        assert_eq!(tx.amount, 4.97);
        assert_eq!(tx.category.as_deref(), Some("misc_net"));
    }

    #[test]
    fn missing_card_number_stays_missing() {
        let rec = TransactionRecord::from(RawCardRecord {
            cc_num: Some(" ".into()),
            ..Default::default()
        });
        assert_eq!(rec.user_id, None);
    }
}
