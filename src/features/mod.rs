//! Feature materialization from the transaction log.

mod aggregates;
mod pipeline;
mod stats;
mod user;

pub use aggregates::{category_features, merchant_features};
pub use pipeline::{FeatureMaterializer, FeatureTables};
pub use stats::{RunningStats, SlidingSum, WindowAggregate};
pub use user::{
    materialize, materialize_parallel, materialize_records, materialize_user, partition_by_user,
    LONG_WINDOW_DAYS, SHORT_WINDOW_DAYS,
};

use crate::dataset::timestamp_text;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// User transaction features as of `created_at` (midnight of a date the user transacted).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserFeatureSnapshot {
    pub user_id: String,
    pub total_transactions: u64,
    pub total_amount: f64,
    pub avg_amount: f64,
    pub max_amount: f64,
    pub min_amount: f64,
    pub std_amount: f64,
    pub transactions_7d: u64,
    pub amount_7d: f64,
    pub avg_amount_7d: f64,
    pub transactions_30d: u64,
    pub amount_30d: f64,
    pub avg_amount_30d: f64,
    pub unique_merchants: u64,
    pub unique_categories: u64,
    pub fraud_count: u64,
    #[serde(with = "timestamp_text")]
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MerchantFeatures {
    pub merchant_id: String,
    pub avg_transaction_amount: f64,
    pub std_transaction_amount: f64,
    pub min_transaction_amount: f64,
    pub max_transaction_amount: f64,
    pub total_transactions: u64,
    pub fraud_count: u64,
    pub fraud_rate: f64,
    pub primary_category: Option<String>,
    pub lat: Option<f64>,
    pub long: Option<f64>,
    #[serde(with = "timestamp_text")]
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryFeatures {
    pub category: String,
    pub avg_amount: f64,
    pub std_amount: f64,
    pub min_amount: f64,
    pub max_amount: f64,
    pub total_transactions: u64,
    pub fraud_count: u64,
    pub fraud_rate: f64,
    #[serde(with = "timestamp_text")]
    pub created_at: NaiveDateTime,
}
