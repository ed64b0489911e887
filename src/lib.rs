//! Fraud feature store: point-in-time feature materialization for transaction data.
//!
//! Modular structure:
//! - [`dataset`]: Transaction feed parsing and fail-fast validation
//! - [`features`]: Per-user point-in-time snapshots, merchant and category aggregates
//! - [`registry`]: Static entity and feature-view declarations
//! - [`join`]: Point-in-time (as-of) join over snapshots
//! - [`storage`]: SQLite offline store
//! - [`export`]: CSV table output
//! - [`stack`]: Postgres / Redis / MLflow connectivity checks
//! - [`logging`]: Structured logging

pub mod config;
pub mod dataset;
pub mod error;
pub mod export;
pub mod features;
pub mod join;
pub mod logging;
pub mod registry;
pub mod stack;
pub mod storage;

pub use config::FeatureStoreConfig;
pub use dataset::{Transaction, TransactionRecord};
pub use error::{FeatureStoreError, Result};
pub use features::{materialize, FeatureMaterializer, FeatureTables, UserFeatureSnapshot};
pub use join::{EntityRow, SnapshotIndex};
pub use logging::StructuredLogger;
pub use stack::StackChecker;
pub use storage::OfflineStore;
