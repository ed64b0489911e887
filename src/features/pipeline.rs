//! Materialization pipeline: transactions → user snapshots + merchant/category tables.

use super::{
    category_features, materialize, materialize_parallel, merchant_features, CategoryFeatures,
    MerchantFeatures, UserFeatureSnapshot,
};
use crate::config::MaterializerConfig;
use crate::dataset::Transaction;
use serde::Serialize;
use std::time::Instant;
use tracing::info;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FeatureTables {
    pub user_features: Vec<UserFeatureSnapshot>,
    pub merchant_features: Vec<MerchantFeatures>,
    pub category_features: Vec<CategoryFeatures>,
}

impl FeatureTables {
    pub fn is_empty(&self) -> bool {
        self.user_features.is_empty()
            && self.merchant_features.is_empty()
            && self.category_features.is_empty()
    }
}

pub struct FeatureMaterializer {
    config: MaterializerConfig,
}

impl FeatureMaterializer {
    pub fn new(config: MaterializerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MaterializerConfig {
        &self.config
    }

    /// Build every enabled table. Deterministic for a given input set.
    pub fn run(&self, transactions: &[Transaction]) -> FeatureTables {
        let started = Instant::now();
        let user_features = if self.config.parallel {
            materialize_parallel(transactions)
        } else {
            materialize(transactions)
        };
        let merchant_features = if self.config.merchant_features {
            merchant_features(transactions)
        } else {
            Vec::new()
        };
        let category_features = if self.config.category_features {
            category_features(transactions)
        } else {
            Vec::new()
        };
        info!(
            transactions = transactions.len(),
            user_snapshots = user_features.len(),
            merchants = merchant_features.len(),
            categories = category_features.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "materialized feature tables"
        );
        FeatureTables {
            user_features,
            merchant_features,
            category_features,
        }
    }
}
