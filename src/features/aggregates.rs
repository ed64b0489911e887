//! Whole-log merchant and category aggregates.
//!
//! These are static per-key summaries stamped with the key's latest event time,
//! not point-in-time series.

use super::stats::RunningStats;
use super::user::chronological;
use super::{CategoryFeatures, MerchantFeatures};
use crate::dataset::Transaction;
use chrono::NaiveDateTime;
use std::collections::BTreeMap;

#[derive(Default)]
struct GroupAcc<'a> {
    stats: RunningStats,
    fraud_count: u64,
    latest: Option<NaiveDateTime>,
    first_category: Option<&'a str>,
    first_lat: Option<f64>,
    first_long: Option<f64>,
}

impl<'a> GroupAcc<'a> {
    fn absorb(&mut self, t: &'a Transaction) {
        self.stats.push(t.amount);
        self.fraud_count += u64::from(t.is_fraud);
        self.latest = Some(match self.latest {
            Some(l) => l.max(t.event_timestamp),
            None => t.event_timestamp,
        });
        if self.first_category.is_none() {
            self.first_category = t.category.as_deref();
        }
        // Each coordinate takes its own first non-null value.
        self.first_lat = self.first_lat.or(t.geo.merch_lat);
        self.first_long = self.first_long.or(t.geo.merch_long);
    }

    fn fraud_rate(&self) -> f64 {
        if self.stats.count() == 0 {
            0.0
        } else {
            self.fraud_count as f64 / self.stats.count() as f64
        }
    }
}

fn group_by<'a, F>(transactions: &'a [Transaction], key: F) -> BTreeMap<&'a str, GroupAcc<'a>>
where
    F: Fn(&'a Transaction) -> Option<&'a str>,
{
    let mut ordered: Vec<&Transaction> = transactions.iter().collect();
    ordered.sort_by(chronological);
    let mut groups: BTreeMap<&str, GroupAcc> = BTreeMap::new();
    for t in ordered {
        if let Some(k) = key(t) {
            groups.entry(k).or_default().absorb(t);
        }
    }
    groups
}

/// One row per merchant id; rows without a merchant are skipped.
pub fn merchant_features(transactions: &[Transaction]) -> Vec<MerchantFeatures> {
    group_by(transactions, |t| t.merchant_id.as_deref())
        .into_iter()
        .filter_map(|(merchant_id, acc)| {
            Some(MerchantFeatures {
                merchant_id: merchant_id.to_string(),
                avg_transaction_amount: acc.stats.mean(),
                std_transaction_amount: acc.stats.std_sample(),
                min_transaction_amount: acc.stats.min(),
                max_transaction_amount: acc.stats.max(),
                total_transactions: acc.stats.count(),
                fraud_count: acc.fraud_count,
                fraud_rate: acc.fraud_rate(),
                primary_category: acc.first_category.map(str::to_string),
                lat: acc.first_lat,
                long: acc.first_long,
                created_at: acc.latest?,
            })
        })
        .collect()
}

/// One row per category; rows without a category are skipped.
pub fn category_features(transactions: &[Transaction]) -> Vec<CategoryFeatures> {
    group_by(transactions, |t| t.category.as_deref())
        .into_iter()
        .filter_map(|(category, acc)| {
            Some(CategoryFeatures {
                category: category.to_string(),
                avg_amount: acc.stats.mean(),
                std_amount: acc.stats.std_sample(),
                min_amount: acc.stats.min(),
                max_amount: acc.stats.max(),
                total_transactions: acc.stats.count(),
                fraud_count: acc.fraud_count,
                fraud_rate: acc.fraud_rate(),
                created_at: acc.latest?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap().and_hms_opt(h, 0, 0).unwrap()
    }

    fn sample() -> Vec<Transaction> {
        let mut fraud = Transaction::new("U2", 90.0, true, ts(3, 1))
            .with_merchant("m1")
            .with_category("travel");
        fraud.geo.merch_lat = Some(1.0);
        fraud.geo.merch_long = Some(2.0);
        let mut first = Transaction::new("U1", 10.0, false, ts(2, 5))
            .with_merchant("m1")
            .with_category("food");
        first.geo.merch_lat = Some(40.0);
        first.geo.merch_long = Some(-70.0);
        vec![
            fraud,
            first,
            Transaction::new("U1", 20.0, false, ts(4, 8)).with_category("food"),
            Transaction::new("U3", 5.0, false, ts(1, 0)).with_merchant("m2"),
        ]
    }

    #[test]
    fn merchant_rows_follow_first_and_latest_events() {
        let rows = merchant_features(&sample());
        assert_eq!(rows.len(), 2);
        let m1 = &rows[0];
        assert_eq!(m1.merchant_id, "m1");
        assert_eq!(m1.total_transactions, 2);
        assert_eq!(m1.avg_transaction_amount, 50.0);
        assert_eq!(m1.fraud_count, 1);
        assert_eq!(m1.fraud_rate, 0.5);
        assert_eq!(m1.primary_category.as_deref(), Some("food"));
        assert_eq!(m1.lat, Some(40.0));
        assert_eq!(m1.long, Some(-70.0));
        assert_eq!(m1.created_at, ts(3, 1));
        let m2 = &rows[1];
        assert_eq!(m2.std_transaction_amount, 0.0);
        assert_eq!(m2.primary_category, None);
    }

    #[test]
    fn category_rows_skip_uncategorised() {
        let rows = category_features(&sample());
        let names: Vec<&str> = rows.iter().map(|r| r.category.as_str()).collect();
        assert_eq!(names, vec!["food", "travel"]);
        assert_eq!(rows[0].total_transactions, 2);
        assert_eq!(rows[0].min_amount, 10.0);
        assert_eq!(rows[0].max_amount, 20.0);
        assert_eq!(rows[0].created_at, ts(4, 8));
        assert_eq!(rows[1].fraud_rate, 1.0);
    }

    #[test]
    fn merchant_coordinates_fill_independently() {
        let mut lat_only = Transaction::new("U1", 1.0, false, ts(1, 0)).with_merchant("m");
        lat_only.geo.merch_lat = Some(10.0);
        let mut both = Transaction::new("U1", 2.0, false, ts(2, 0)).with_merchant("m");
        both.geo.merch_lat = Some(20.0);
        both.geo.merch_long = Some(30.0);
        let rows = merchant_features(&[both, lat_only]);
        assert_eq!(rows[0].lat, Some(10.0));
        assert_eq!(rows[0].long, Some(30.0));
    }
}
