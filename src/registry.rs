//! Static entity and feature-view declarations registered with the feature store.

use chrono::Duration;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ValueType {
    Int64,
    Float64,
    String,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Entity {
    pub name: &'static str,
    pub description: &'static str,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Field {
    pub name: &'static str,
    pub dtype: ValueType,
    pub description: &'static str,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct FeatureView {
    pub name: &'static str,
    pub entity: &'static str,
    pub ttl_days: i64,
    /// Offline table backing the view
    pub source_table: &'static str,
    pub timestamp_field: &'static str,
    pub fields: &'static [Field],
    pub description: &'static str,
}

impl FeatureView {
    pub fn ttl(&self) -> Duration {
        Duration::days(self.ttl_days)
    }

    pub fn field(&self, name: &str) -> Option<&'static Field> {
        self.fields.iter().find(|f| f.name == name)
    }
}

const fn field(name: &'static str, dtype: ValueType, description: &'static str) -> Field {
    Field {
        name,
        dtype,
        description,
    }
}

pub const USER: Entity = Entity {
    name: "user_id",
    description: "Pseudonymous card holder id",
};

pub const MERCHANT: Entity = Entity {
    name: "merchant_id",
    description: "Pseudonymous merchant id",
};

pub const CATEGORY: Entity = Entity {
    name: "category",
    description: "Transaction category",
};

pub const ENTITIES: &[Entity] = &[USER, MERCHANT, CATEGORY];

pub const USER_TRANSACTION_FEATURES: FeatureView = FeatureView {
    name: "user_transaction_features",
    entity: "user_id",
    ttl_days: 90,
    source_table: "user_features",
    timestamp_field: "created_at",
    fields: &[
        field("total_transactions", ValueType::Int64, "Transactions to date"),
        field("total_amount", ValueType::Float64, "Amount to date"),
        field("avg_amount", ValueType::Float64, "Mean amount to date"),
        field("max_amount", ValueType::Float64, "Largest amount to date"),
        field("min_amount", ValueType::Float64, "Smallest amount to date"),
        field("std_amount", ValueType::Float64, "Sample std of amount to date"),
        field("transactions_7d", ValueType::Int64, "Transactions in the last 7 days"),
        field("amount_7d", ValueType::Float64, "Amount in the last 7 days"),
        field("avg_amount_7d", ValueType::Float64, "Mean amount in the last 7 days"),
        field("transactions_30d", ValueType::Int64, "Transactions in the last 30 days"),
        field("amount_30d", ValueType::Float64, "Amount in the last 30 days"),
        field("avg_amount_30d", ValueType::Float64, "Mean amount in the last 30 days"),
        field("unique_merchants", ValueType::Int64, "Distinct merchants to date"),
        field("unique_categories", ValueType::Int64, "Distinct categories to date"),
        field("fraud_count", ValueType::Int64, "Fraud-labelled transactions to date"),
    ],
    description: "Time-varying user transaction statistics",
};

pub const MERCHANT_FEATURES: FeatureView = FeatureView {
    name: "merchant_features",
    entity: "merchant_id",
    ttl_days: 30,
    source_table: "merchant_features",
    timestamp_field: "created_at",
    fields: &[
        field("avg_transaction_amount", ValueType::Float64, "Mean amount"),
        field("std_transaction_amount", ValueType::Float64, "Sample std of amount"),
        field("min_transaction_amount", ValueType::Float64, "Smallest amount"),
        field("max_transaction_amount", ValueType::Float64, "Largest amount"),
        field("total_transactions", ValueType::Int64, "Transactions"),
        field("fraud_count", ValueType::Int64, "Fraud-labelled transactions"),
        field("fraud_rate", ValueType::Float64, "Fraud share"),
        field("primary_category", ValueType::String, "Category of first transaction"),
        field("lat", ValueType::Float64, "Merchant latitude"),
        field("long", ValueType::Float64, "Merchant longitude"),
    ],
    description: "Merchant transaction profile",
};

pub const CATEGORY_FEATURES: FeatureView = FeatureView {
    name: "category_features",
    entity: "category",
    ttl_days: 30,
    source_table: "category_features",
    timestamp_field: "created_at",
    fields: &[
        field("avg_amount", ValueType::Float64, "Mean amount"),
        field("std_amount", ValueType::Float64, "Sample std of amount"),
        field("min_amount", ValueType::Float64, "Smallest amount"),
        field("max_amount", ValueType::Float64, "Largest amount"),
        field("total_transactions", ValueType::Int64, "Transactions"),
        field("fraud_count", ValueType::Int64, "Fraud-labelled transactions"),
        field("fraud_rate", ValueType::Float64, "Fraud share"),
    ],
    description: "Category transaction profile",
};

pub const FEATURE_VIEWS: &[FeatureView] =
    &[USER_TRANSACTION_FEATURES, MERCHANT_FEATURES, CATEGORY_FEATURES];

pub fn feature_view(name: &str) -> Option<&'static FeatureView> {
    FEATURE_VIEWS.iter().find(|v| v.name == name)
}

/// Parse `view:field` references, e.g. `user_transaction_features:avg_amount`.
pub fn resolve(reference: &str) -> Option<(&'static FeatureView, &'static Field)> {
    let (view, field) = reference.split_once(':')?;
    let view = feature_view(view)?;
    Some((view, view.field(field)?))
}

#[derive(Debug, Serialize)]
pub struct RegistrySummary {
    pub entities: &'static [Entity],
    pub feature_views: &'static [FeatureView],
}

pub fn summary() -> RegistrySummary {
    RegistrySummary {
        entities: ENTITIES,
        feature_views: FEATURE_VIEWS,
    }
}
