//! CSV ingestion for the transaction feed.

use super::{RawCardRecord, Transaction, TransactionRecord};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

/// Column layout of an input file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedFormat {
    /// `user_id, merchant_id, category, amount, is_fraud, event_timestamp, ...`
    #[default]
    Feed,
    /// Raw card log (`cc_num, merchant, amt, trans_date_trans_time, ...`)
    RawCardLog,
}

/// Read every row of a CSV source. Structural CSV errors abort the read.
pub fn read_records<R: Read>(reader: R, format: FeedFormat) -> Result<Vec<TransactionRecord>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let mut out = Vec::new();
    match format {
        FeedFormat::Feed => {
            for rec in csv_reader.deserialize::<TransactionRecord>() {
                out.push(rec?);
            }
        }
        FeedFormat::RawCardLog => {
            for rec in csv_reader.deserialize::<RawCardRecord>() {
                out.push(TransactionRecord::from(rec?));
            }
        }
    }
    debug!(rows = out.len(), ?format, "read transaction rows");
    Ok(out)
}

/// Validate all rows; the first invalid row fails the whole batch.
pub fn validate_all(records: &[TransactionRecord]) -> Result<Vec<Transaction>> {
    records
        .iter()
        .enumerate()
        .map(|(i, r)| r.validate(i + 1))
        .collect()
}

pub fn read_transactions(path: &Path, format: FeedFormat) -> Result<Vec<Transaction>> {
    let file = File::open(path)?;
    let records = read_records(file, format)?;
    let transactions = validate_all(&records)?;
    info!(path = %path.display(), count = transactions.len(), "loaded transactions");
    Ok(transactions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FeatureStoreError;

    const FEED: &str = "\
transaction_id,user_id,merchant_id,category,amount,is_fraud,event_timestamp,lat,long,merch_lat,merch_long
t1,U1,M1,food,50,0,2024-01-01 10:00:00,,,,
t2,U1,M2,travel,30,1,2024-01-03 09:00:00,40.1,-73.2,40.3,-73.9
";

    #[test]
    fn reads_feed_format() {
        let recs = read_records(FEED.as_bytes(), FeedFormat::Feed).unwrap();
        assert_eq!(recs.len(), 2);
        let txs = validate_all(&recs).unwrap();
        assert!(txs[1].is_fraud);
        assert_eq!(txs[1].geo.merch_long, Some(-73.9));
        assert_eq!(txs[0].geo.lat, None);
    }

    #[test]
    fn tolerates_missing_optional_columns() {
        let feed = "user_id,amount,is_fraud,event_timestamp\nU1,5,0,2024-02-01\n";
        let txs = validate_all(&read_records(feed.as_bytes(), FeedFormat::Feed).unwrap()).unwrap();
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].merchant_id, None);
    }

    #[test]
    fn one_bad_row_fails_the_batch() {
        let feed = format!("{FEED}t3,U2,M1,food,,0,2024-01-04 00:00:00,,,,\n");
        let recs = read_records(feed.as_bytes(), FeedFormat::Feed).unwrap();
        match validate_all(&recs) {
            Err(FeatureStoreError::MissingField { row, field }) => {
                assert_eq!(row, 3);
                assert_eq!(field, "amount");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn reads_raw_card_log() {
        let raw = "\
trans_date_trans_time,cc_num,merchant,category,amt,trans_num,is_fraud,lat,long,merch_lat,merch_long
2019-01-01 00:00:18,2703186189652095,fraud_Rippin,misc_net,4.97,0b242abb,0,36.0788,-81.1781,36.011293,-82.048315
";
        let txs = validate_all(&read_records(raw.as_bytes(), FeedFormat::RawCardLog).unwrap()).unwrap();
        assert_eq!(txs.len(), 1);
        assert!(txs[0].user_id.starts_with("user_"));
        assert!(txs[0].merchant_id.as_deref().unwrap().starts_with("merch_"));
        assert_eq!(txs[0].transaction_id.as_deref(), Some("0b242abb"));
    }

    #[test]
    fn empty_feed_is_empty() {
        let recs = read_records("user_id,amount,is_fraud,event_timestamp\n".as_bytes(), FeedFormat::Feed).unwrap();
        assert!(validate_all(&recs).unwrap().is_empty());
    }
}
