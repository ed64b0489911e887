//! SQLite offline store for the materialized feature tables.

mod offline;

pub use offline::{LoadCounts, OfflineStore};
