//! SQLite-backed offline store. Tables are keyed the way point-in-time lookups read them:
//! `user_features` by `(user_id, created_at)`, the static tables by their entity key.
//! Timestamps are stored as `YYYY-MM-DD HH:MM:SS` text so they sort lexically.
//!
//! [`OfflineStore::load`] replaces the whole store with one run's output; the
//! `write_*` methods upsert into whatever is already there.

use crate::dataset::{format_timestamp, parse_timestamp, Transaction};
use crate::error::{FeatureStoreError, Result};
use crate::features::{CategoryFeatures, FeatureTables, MerchantFeatures, UserFeatureSnapshot};
use chrono::NaiveDateTime;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS user_features (
        user_id TEXT NOT NULL,
        total_transactions INTEGER NOT NULL,
        total_amount REAL NOT NULL,
        avg_amount REAL NOT NULL,
        max_amount REAL NOT NULL,
        min_amount REAL NOT NULL,
        std_amount REAL NOT NULL,
        transactions_7d INTEGER NOT NULL,
        amount_7d REAL NOT NULL,
        avg_amount_7d REAL NOT NULL,
        transactions_30d INTEGER NOT NULL,
        amount_30d REAL NOT NULL,
        avg_amount_30d REAL NOT NULL,
        unique_merchants INTEGER NOT NULL,
        unique_categories INTEGER NOT NULL,
        fraud_count INTEGER NOT NULL,
        created_at TEXT NOT NULL,
        PRIMARY KEY (user_id, created_at)
    );
    CREATE INDEX IF NOT EXISTS idx_user_features_created_at ON user_features(created_at);
    CREATE TABLE IF NOT EXISTS merchant_features (
        merchant_id TEXT PRIMARY KEY,
        avg_transaction_amount REAL NOT NULL,
        std_transaction_amount REAL NOT NULL,
        min_transaction_amount REAL NOT NULL,
        max_transaction_amount REAL NOT NULL,
        total_transactions INTEGER NOT NULL,
        fraud_count INTEGER NOT NULL,
        fraud_rate REAL NOT NULL,
        primary_category TEXT,
        lat REAL,
        long REAL,
        created_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_merchant_features_created_at ON merchant_features(created_at);
    CREATE TABLE IF NOT EXISTS category_features (
        category TEXT PRIMARY KEY,
        avg_amount REAL NOT NULL,
        std_amount REAL NOT NULL,
        min_amount REAL NOT NULL,
        max_amount REAL NOT NULL,
        total_transactions INTEGER NOT NULL,
        fraud_count INTEGER NOT NULL,
        fraud_rate REAL NOT NULL,
        created_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_category_features_created_at ON category_features(created_at);
    CREATE TABLE IF NOT EXISTS transactions (
        transaction_id TEXT,
        user_id TEXT NOT NULL,
        merchant_id TEXT,
        category TEXT,
        amount REAL NOT NULL,
        is_fraud INTEGER NOT NULL,
        event_timestamp TEXT NOT NULL,
        lat REAL,
        long REAL,
        merch_lat REAL,
        merch_long REAL
    );
    CREATE INDEX IF NOT EXISTS idx_transactions_user_ts ON transactions(user_id, event_timestamp);
"#;

const USER_COLUMNS: &str = "user_id, total_transactions, total_amount, avg_amount, max_amount, \
     min_amount, std_amount, transactions_7d, amount_7d, avg_amount_7d, transactions_30d, \
     amount_30d, avg_amount_30d, unique_merchants, unique_categories, fraud_count, created_at";

const TABLES: [&str; 4] = ["user_features", "merchant_features", "category_features", "transactions"];

/// Row counts written by [`OfflineStore::load`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct LoadCounts {
    pub transactions: usize,
    pub user_features: usize,
    pub merchant_features: usize,
    pub category_features: usize,
}

pub struct OfflineStore {
    conn: Mutex<Connection>,
}

fn timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDateTime> {
    let raw: String = row.get(idx)?;
    parse_timestamp(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, format!("bad timestamp {raw:?}").into())
    })
}

fn user_row(row: &Row<'_>) -> rusqlite::Result<UserFeatureSnapshot> {
    Ok(UserFeatureSnapshot {
        user_id: row.get(0)?,
        total_transactions: row.get::<_, i64>(1)? as u64,
        total_amount: row.get(2)?,
        avg_amount: row.get(3)?,
        max_amount: row.get(4)?,
        min_amount: row.get(5)?,
        std_amount: row.get(6)?,
        transactions_7d: row.get::<_, i64>(7)? as u64,
        amount_7d: row.get(8)?,
        avg_amount_7d: row.get(9)?,
        transactions_30d: row.get::<_, i64>(10)? as u64,
        amount_30d: row.get(11)?,
        avg_amount_30d: row.get(12)?,
        unique_merchants: row.get::<_, i64>(13)? as u64,
        unique_categories: row.get::<_, i64>(14)? as u64,
        fraud_count: row.get::<_, i64>(15)? as u64,
        created_at: timestamp_column(row, 16)?,
    })
}

fn insert_user_features(conn: &Connection, rows: &[UserFeatureSnapshot]) -> Result<()> {
    let mut stmt = conn.prepare(&format!(
        "INSERT OR REPLACE INTO user_features ({USER_COLUMNS}) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)"
    ))?;
    for s in rows {
        stmt.execute(params![
            s.user_id,
            s.total_transactions as i64,
            s.total_amount,
            s.avg_amount,
            s.max_amount,
            s.min_amount,
            s.std_amount,
            s.transactions_7d as i64,
            s.amount_7d,
            s.avg_amount_7d,
            s.transactions_30d as i64,
            s.amount_30d,
            s.avg_amount_30d,
            s.unique_merchants as i64,
            s.unique_categories as i64,
            s.fraud_count as i64,
            format_timestamp(&s.created_at),
        ])?;
    }
    Ok(())
}

fn insert_merchant_features(conn: &Connection, rows: &[MerchantFeatures]) -> Result<()> {
    let mut stmt = conn.prepare(
        "INSERT OR REPLACE INTO merchant_features (merchant_id, avg_transaction_amount, \
         std_transaction_amount, min_transaction_amount, max_transaction_amount, \
         total_transactions, fraud_count, fraud_rate, primary_category, lat, long, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
    )?;
    for m in rows {
        stmt.execute(params![
            m.merchant_id,
            m.avg_transaction_amount,
            m.std_transaction_amount,
            m.min_transaction_amount,
            m.max_transaction_amount,
            m.total_transactions as i64,
            m.fraud_count as i64,
            m.fraud_rate,
            m.primary_category,
            m.lat,
            m.long,
            format_timestamp(&m.created_at),
        ])?;
    }
    Ok(())
}

fn insert_category_features(conn: &Connection, rows: &[CategoryFeatures]) -> Result<()> {
    let mut stmt = conn.prepare(
        "INSERT OR REPLACE INTO category_features (category, avg_amount, std_amount, \
         min_amount, max_amount, total_transactions, fraud_count, fraud_rate, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )?;
    for c in rows {
        stmt.execute(params![
            c.category,
            c.avg_amount,
            c.std_amount,
            c.min_amount,
            c.max_amount,
            c.total_transactions as i64,
            c.fraud_count as i64,
            c.fraud_rate,
            format_timestamp(&c.created_at),
        ])?;
    }
    Ok(())
}

fn insert_transactions(conn: &Connection, rows: &[Transaction]) -> Result<()> {
    let mut stmt = conn.prepare(
        "INSERT INTO transactions (transaction_id, user_id, merchant_id, category, amount, \
         is_fraud, event_timestamp, lat, long, merch_lat, merch_long) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
    )?;
    for t in rows {
        stmt.execute(params![
            t.transaction_id,
            t.user_id,
            t.merchant_id,
            t.category,
            t.amount,
            t.is_fraud,
            format_timestamp(&t.event_timestamp),
            t.geo.lat,
            t.geo.long,
            t.geo.merch_lat,
            t.geo.merch_long,
        ])?;
    }
    Ok(())
}

impl OfflineStore {
    /// Open or create the store at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        Self::with_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Upsert user snapshots in one transaction. Reloading the same rows is a no-op.
    pub fn write_user_features(&self, rows: &[UserFeatureSnapshot]) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        insert_user_features(&tx, rows)?;
        tx.commit()?;
        debug!(rows = rows.len(), "wrote user_features");
        Ok(rows.len())
    }

    pub fn write_merchant_features(&self, rows: &[MerchantFeatures]) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        insert_merchant_features(&tx, rows)?;
        tx.commit()?;
        debug!(rows = rows.len(), "wrote merchant_features");
        Ok(rows.len())
    }

    pub fn write_category_features(&self, rows: &[CategoryFeatures]) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        insert_category_features(&tx, rows)?;
        tx.commit()?;
        debug!(rows = rows.len(), "wrote category_features");
        Ok(rows.len())
    }

    /// Replace every table with one run's transactions and feature tables, atomically.
    /// Rows from earlier runs never survive a load.
    pub fn load(&self, transactions: &[Transaction], tables: &FeatureTables) -> Result<LoadCounts> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        for table in TABLES {
            tx.execute(&format!("DELETE FROM {table}"), [])?;
        }
        insert_transactions(&tx, transactions)?;
        insert_user_features(&tx, &tables.user_features)?;
        insert_merchant_features(&tx, &tables.merchant_features)?;
        insert_category_features(&tx, &tables.category_features)?;
        tx.commit()?;
        let counts = LoadCounts {
            transactions: transactions.len(),
            user_features: tables.user_features.len(),
            merchant_features: tables.merchant_features.len(),
            category_features: tables.category_features.len(),
        };
        debug!(?counts, "replaced offline store contents");
        Ok(counts)
    }

    /// Latest snapshot for `user_id` with `created_at <= at`.
    pub fn user_features_as_of(
        &self,
        user_id: &str,
        at: NaiveDateTime,
    ) -> Result<Option<UserFeatureSnapshot>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {USER_COLUMNS} FROM user_features \
             WHERE user_id = ?1 AND created_at <= ?2 \
             ORDER BY created_at DESC LIMIT 1"
        ))?;
        let snap = stmt
            .query_row(params![user_id, format_timestamp(&at)], user_row)
            .optional()?;
        Ok(snap)
    }

    /// All user snapshots ordered by (user_id, created_at).
    pub fn user_features(&self) -> Result<Vec<UserFeatureSnapshot>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {USER_COLUMNS} FROM user_features ORDER BY user_id, created_at"
        ))?;
        let rows = stmt.query_map([], user_row)?.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn count(&self, table: &str) -> Result<u64> {
        if !TABLES.contains(&table) {
            return Err(FeatureStoreError::Config(format!("unknown table {table}")));
        }
        let n: i64 = self
            .conn()
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))?;
        Ok(n as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MaterializerConfig;
    use crate::dataset::Transaction;
    use crate::features::FeatureMaterializer;
    use chrono::NaiveDate;

    fn ts(d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap().and_hms_opt(h, 0, 0).unwrap()
    }

    fn feed() -> Vec<Transaction> {
        vec![
            Transaction::new("U1", 50.0, false, ts(1, 9)).with_merchant("m1").with_category("food"),
            Transaction::new("U1", 30.0, true, ts(3, 9)).with_merchant("m2").with_category("food"),
            Transaction::new("U2", 12.5, false, ts(2, 9)).with_merchant("m1"),
        ]
    }

    fn tables(txs: &[Transaction]) -> FeatureTables {
        FeatureMaterializer::new(MaterializerConfig::default()).run(txs)
    }

    fn loaded() -> OfflineStore {
        let store = OfflineStore::open_in_memory().unwrap();
        let txs = feed();
        store.load(&txs, &tables(&txs)).unwrap();
        store
    }

    #[test]
    fn load_and_read_back() {
        let store = OfflineStore::open_in_memory().unwrap();
        let txs = feed();
        let t = tables(&txs);
        let counts = store.load(&txs, &t).unwrap();
        assert_eq!(counts.transactions, 3);
        assert_eq!(counts.user_features, 3);
        assert_eq!(counts.merchant_features, 2);
        assert_eq!(counts.category_features, 1);
        assert_eq!(store.user_features().unwrap(), t.user_features);
        assert_eq!(store.count("transactions").unwrap(), 3);
    }

    #[test]
    fn reload_is_idempotent() {
        let store = loaded();
        let txs = feed();
        store.load(&txs, &tables(&txs)).unwrap();
        assert_eq!(store.count("user_features").unwrap(), 3);
        assert_eq!(store.count("merchant_features").unwrap(), 2);
        assert_eq!(store.count("transactions").unwrap(), 3);
        assert!(store.count("users; DROP TABLE x").is_err());
    }

    #[test]
    fn load_replaces_rows_from_an_earlier_feed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        let first = vec![
            Transaction::new("U1", 50.0, false, ts(1, 9)).with_merchant("m1"),
            Transaction::new("U1", 999.0, true, ts(2, 9)).with_merchant("m9").with_category("travel"),
        ];
        OfflineStore::open(&path).unwrap().load(&first, &tables(&first)).unwrap();

        let second = vec![Transaction::new("U1", 50.0, false, ts(1, 9)).with_merchant("m1")];
        let expected = tables(&second);
        let store = OfflineStore::open(&path).unwrap();
        store.load(&second, &expected).unwrap();

        assert_eq!(store.user_features().unwrap(), expected.user_features);
        assert_eq!(store.count("merchant_features").unwrap(), 1);
        assert_eq!(store.count("category_features").unwrap(), 0);
        assert_eq!(store.count("transactions").unwrap(), 1);
        let s = store.user_features_as_of("U1", ts(5, 0)).unwrap().unwrap();
        assert_eq!(s.total_transactions, 1);
        assert_eq!(s.fraud_count, 0);
    }

    #[test]
    fn upserts_keep_existing_rows() {
        let store = loaded();
        let extra = tables(&[Transaction::new("U3", 1.0, false, ts(4, 9))]);
        store.write_user_features(&extra.user_features).unwrap();
        assert_eq!(store.count("user_features").unwrap(), 4);
    }

    #[test]
    fn as_of_query_matches_point_in_time_semantics() {
        let store = loaded();
        let s = store.user_features_as_of("U1", ts(2, 23)).unwrap().unwrap();
        assert_eq!(s.total_transactions, 1);
        let s = store.user_features_as_of("U1", ts(3, 0)).unwrap().unwrap();
        assert_eq!(s.total_transactions, 2);
        assert_eq!(s.fraud_count, 1);
        assert!(store.user_features_as_of("U2", ts(1, 23)).unwrap().is_none());
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        let txs = feed();
        OfflineStore::open(&path).unwrap().load(&txs, &tables(&txs)).unwrap();
        let reopened = OfflineStore::open(&path).unwrap();
        assert_eq!(reopened.count("user_features").unwrap(), 3);
    }
}
