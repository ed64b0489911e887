//! CSV output for the materialized tables and joined training rows.

use crate::dataset::{format_timestamp, Transaction, TransactionRecord};
use crate::error::Result;
use crate::features::{FeatureTables, UserFeatureSnapshot};
use crate::join::JoinedRow;
use serde::Serialize;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::info;

pub const USER_FEATURES_FILE: &str = "user_features.csv";
pub const MERCHANT_FEATURES_FILE: &str = "merchant_features.csv";
pub const CATEGORY_FEATURES_FILE: &str = "category_features.csv";
pub const TRANSACTIONS_FILE: &str = "transactions.csv";

/// Serialize rows with a header line.
pub fn write_rows<T: Serialize, W: Write>(writer: W, rows: &[T]) -> Result<()> {
    let mut w = csv::Writer::from_writer(writer);
    for row in rows {
        w.serialize(row)?;
    }
    w.flush()?;
    Ok(())
}

fn write_file<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    write_rows(File::create(path)?, rows)?;
    info!(path = %path.display(), rows = rows.len(), "wrote table");
    Ok(())
}

/// Write `rows` to `path`, or remove a file left there by an earlier run when there are none.
fn replace_file<T: Serialize>(path: PathBuf, rows: &[T]) -> Result<Option<PathBuf>> {
    if rows.is_empty() {
        match std::fs::remove_file(&path) {
            Ok(()) => info!(path = %path.display(), "removed stale table"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        return Ok(None);
    }
    write_file(&path, rows)?;
    Ok(Some(path))
}

/// Write every non-empty table under `dir`; returns the written paths. Files of
/// tables that came out empty are removed so `dir` only reflects this run.
pub fn write_tables(dir: &Path, tables: &FeatureTables) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)?;
    let user = dir.join(USER_FEATURES_FILE);
    write_file(&user, &tables.user_features)?;
    let mut written = vec![user];
    written.extend(replace_file(dir.join(MERCHANT_FEATURES_FILE), &tables.merchant_features)?);
    written.extend(replace_file(dir.join(CATEGORY_FEATURES_FILE), &tables.category_features)?);
    Ok(written)
}

/// Validated transactions in canonical feed form; readable again with
/// [`crate::dataset::read_transactions`].
pub fn write_transactions(dir: &Path, transactions: &[Transaction]) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(TRANSACTIONS_FILE);
    let records: Vec<TransactionRecord> = transactions.iter().map(TransactionRecord::from).collect();
    write_file(&path, &records)?;
    Ok(path)
}

pub fn read_user_features<R: Read>(reader: R) -> Result<Vec<UserFeatureSnapshot>> {
    let mut rdr = csv::Reader::from_reader(reader);
    let mut out = Vec::new();
    for row in rdr.deserialize() {
        out.push(row?);
    }
    Ok(out)
}

const JOINED_FEATURE_COLUMNS: [&str; 15] = [
    "total_transactions",
    "total_amount",
    "avg_amount",
    "max_amount",
    "min_amount",
    "std_amount",
    "transactions_7d",
    "amount_7d",
    "avg_amount_7d",
    "transactions_30d",
    "amount_30d",
    "avg_amount_30d",
    "unique_merchants",
    "unique_categories",
    "fraud_count",
];

/// Training rows: entity key, pass-through entity columns (`extra_columns`, e.g. the
/// label), feature columns (empty when no snapshot applied), then the `created_at`
/// of the snapshot that was used.
pub fn write_joined<W: Write>(writer: W, extra_columns: &[String], rows: &[JoinedRow]) -> Result<()> {
    let mut w = csv::Writer::from_writer(writer);
    let mut header = vec!["user_id", "event_timestamp"];
    header.extend(extra_columns.iter().map(String::as_str));
    header.extend(JOINED_FEATURE_COLUMNS);
    header.push("feature_timestamp");
    w.write_record(&header)?;

    for row in rows {
        let mut record = vec![
            row.entity.user_id.clone(),
            format_timestamp(&row.entity.event_timestamp),
        ];
        record.extend((0..extra_columns.len()).map(|i| row.entity.extra.get(i).cloned().unwrap_or_default()));
        match &row.features {
            Some(f) => record.extend([
                f.total_transactions.to_string(),
                f.total_amount.to_string(),
                f.avg_amount.to_string(),
                f.max_amount.to_string(),
                f.min_amount.to_string(),
                f.std_amount.to_string(),
                f.transactions_7d.to_string(),
                f.amount_7d.to_string(),
                f.avg_amount_7d.to_string(),
                f.transactions_30d.to_string(),
                f.amount_30d.to_string(),
                f.avg_amount_30d.to_string(),
                f.unique_merchants.to_string(),
                f.unique_categories.to_string(),
                f.fraud_count.to_string(),
                format_timestamp(&f.created_at),
            ]),
            None => record.extend(std::iter::repeat(String::new()).take(JOINED_FEATURE_COLUMNS.len() + 1)),
        }
        w.write_record(&record)?;
    }
    w.flush()?;
    Ok(())
}
