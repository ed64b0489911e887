//! Per-user point-in-time snapshots: one row per (user, transaction date).
//!
//! Each user's history is sorted once and walked date by date. Cumulative
//! stats grow as each date's rows are absorbed; the 7d and 30d windows are
//! `(d - N days, d]`, kept by lower-bound indices that only move forward, so
//! every row enters and leaves each window once.

use super::stats::{RunningStats, SlidingSum};
use super::UserFeatureSnapshot;
use crate::dataset::{validate_all, Transaction, TransactionRecord};
use crate::error::Result;
use chrono::{Duration, NaiveDate, NaiveTime};
use rayon::prelude::*;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

pub const SHORT_WINDOW_DAYS: i64 = 7;
pub const LONG_WINDOW_DAYS: i64 = 30;

/// Total order over transactions so that input order never changes output bits.
pub(crate) fn chronological(a: &&Transaction, b: &&Transaction) -> Ordering {
    a.event_timestamp
        .cmp(&b.event_timestamp)
        .then_with(|| a.transaction_id.cmp(&b.transaction_id))
        .then_with(|| a.amount.total_cmp(&b.amount))
        .then_with(|| a.merchant_id.cmp(&b.merchant_id))
        .then_with(|| a.category.cmp(&b.category))
        .then_with(|| a.is_fraud.cmp(&b.is_fraud))
}

/// Transactions grouped by user id, ordered by user id.
pub fn partition_by_user(transactions: &[Transaction]) -> BTreeMap<&str, Vec<&Transaction>> {
    let mut parts: BTreeMap<&str, Vec<&Transaction>> = BTreeMap::new();
    for t in transactions {
        parts.entry(t.user_id.as_str()).or_default().push(t);
    }
    parts
}

fn as_of(date: NaiveDate) -> chrono::NaiveDateTime {
    date.and_time(NaiveTime::default())
}

/// Trailing `(d - days, d]` window over a chronologically sorted history.
struct TrailingWindow {
    days: i64,
    lo: usize,
    sum: SlidingSum,
}

impl TrailingWindow {
    fn new(days: i64) -> Self {
        Self {
            days,
            lo: 0,
            sum: SlidingSum::default(),
        }
    }

    /// Drop every row dated on or before `date - days`. A cutoff below the
    /// representable calendar drops nothing.
    fn advance(&mut self, history: &[&Transaction], date: NaiveDate) {
        let Some(cutoff) = date.checked_sub_signed(Duration::days(self.days)) else {
            return;
        };
        while self.lo < history.len() && history[self.lo].date() <= cutoff {
            self.sum.remove(history[self.lo].amount);
            self.lo += 1;
        }
    }
}

/// Snapshots for one user. `history` may be in any order.
pub fn materialize_user(user_id: &str, mut history: Vec<&Transaction>) -> Vec<UserFeatureSnapshot> {
    history.sort_by(chronological);

    let mut out = Vec::new();
    let mut stats = RunningStats::default();
    let mut merchants: HashSet<&str> = HashSet::new();
    let mut categories: HashSet<&str> = HashSet::new();
    let mut fraud_count = 0u64;
    let mut short = TrailingWindow::new(SHORT_WINDOW_DAYS);
    let mut long = TrailingWindow::new(LONG_WINDOW_DAYS);

    let mut start = 0;
    while start < history.len() {
        let date = history[start].date();
        let mut end = start;
        while end < history.len() && history[end].date() == date {
            let t = history[end];
            stats.push(t.amount);
            if let Some(m) = t.merchant_id.as_deref() {
                merchants.insert(m);
            }
            if let Some(c) = t.category.as_deref() {
                categories.insert(c);
            }
            fraud_count += u64::from(t.is_fraud);
            short.sum.add(t.amount);
            long.sum.add(t.amount);
            end += 1;
        }

        short.advance(&history, date);
        long.advance(&history, date);
        let (w7, w30) = (short.sum.aggregate(), long.sum.aggregate());

        out.push(UserFeatureSnapshot {
            user_id: user_id.to_string(),
            total_transactions: stats.count(),
            total_amount: stats.sum(),
            avg_amount: stats.mean(),
            max_amount: stats.max(),
            min_amount: stats.min(),
            std_amount: stats.std_sample(),
            transactions_7d: w7.count,
            amount_7d: w7.sum,
            avg_amount_7d: w7.mean,
            transactions_30d: w30.count,
            amount_30d: w30.sum,
            avg_amount_30d: w30.mean,
            unique_merchants: merchants.len() as u64,
            unique_categories: categories.len() as u64,
            fraud_count,
            created_at: as_of(date),
        });
        start = end;
    }
    out
}

/// Snapshots for every user, ordered by (user_id, created_at). Pure.
pub fn materialize(transactions: &[Transaction]) -> Vec<UserFeatureSnapshot> {
    partition_by_user(transactions)
        .into_iter()
        .flat_map(|(user, history)| materialize_user(user, history))
        .collect()
}

/// Same output as [`materialize`], with user partitions spread over the rayon pool.
pub fn materialize_parallel(transactions: &[Transaction]) -> Vec<UserFeatureSnapshot> {
    let parts: Vec<(&str, Vec<&Transaction>)> = partition_by_user(transactions).into_iter().collect();
    parts
        .into_par_iter()
        .map(|(user, history)| materialize_user(user, history))
        .collect::<Vec<_>>()
        .into_iter()
        .flatten()
        .collect()
}

/// Validate raw rows first; any invalid row fails the run with no output.
pub fn materialize_records(records: &[TransactionRecord]) -> Result<Vec<UserFeatureSnapshot>> {
    let transactions = validate_all(records)?;
    Ok(materialize(&transactions))
}
