//! Point-in-time join: for each (user, request time) pick the latest snapshot at or before it.

use crate::dataset::{format_timestamp, parse_timestamp, timestamp_text};
use crate::error::{FeatureStoreError, Result};
use crate::features::UserFeatureSnapshot;
use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Read;

/// A request row: which user, as of when. `extra` carries the row's other entity
/// columns (labels, transaction ids) through the join untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRow {
    pub user_id: String,
    #[serde(with = "timestamp_text")]
    pub event_timestamp: NaiveDateTime,
    #[serde(skip)]
    pub extra: Vec<String>,
}

impl EntityRow {
    pub fn new(user_id: impl Into<String>, event_timestamp: NaiveDateTime) -> Self {
        Self {
            user_id: user_id.into(),
            event_timestamp,
            extra: Vec::new(),
        }
    }

    pub fn with_extra(mut self, extra: Vec<String>) -> Self {
        self.extra = extra;
        self
    }
}

/// Entity rows read from CSV with the names of their pass-through columns,
/// in file order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntitySet {
    pub extra_columns: Vec<String>,
    pub rows: Vec<EntityRow>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinedRow {
    pub entity: EntityRow,
    pub features: Option<UserFeatureSnapshot>,
}

/// Snapshots grouped per user and sorted by `created_at`.
#[derive(Debug, Clone, Default)]
pub struct SnapshotIndex {
    by_user: HashMap<String, Vec<UserFeatureSnapshot>>,
    ttl: Option<Duration>,
}

impl SnapshotIndex {
    /// Fails on duplicate `(user_id, created_at)` keys, which would make lookups ambiguous.
    pub fn build(snapshots: Vec<UserFeatureSnapshot>) -> Result<Self> {
        let mut by_user: HashMap<String, Vec<UserFeatureSnapshot>> = HashMap::new();
        for s in snapshots {
            by_user.entry(s.user_id.clone()).or_default().push(s);
        }
        for (user_id, series) in by_user.iter_mut() {
            series.sort_by_key(|s| s.created_at);
            if let Some(dup) = series.windows(2).find(|w| w[0].created_at == w[1].created_at) {
                return Err(FeatureStoreError::DuplicateSnapshot {
                    user_id: user_id.clone(),
                    created_at: format_timestamp(&dup[0].created_at),
                });
            }
        }
        Ok(Self { by_user, ttl: None })
    }

    /// Snapshots older than `request - ttl` are treated as absent. See [`ttl_from_days`]
    /// for a checked constructor.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn users(&self) -> usize {
        self.by_user.len()
    }

    pub fn len(&self) -> usize {
        self.by_user.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_of(&self, user_id: &str, at: NaiveDateTime) -> Option<&UserFeatureSnapshot> {
        let series = self.by_user.get(user_id)?;
        let idx = series.partition_point(|s| s.created_at <= at);
        let snap = series[..idx].last()?;
        // A cutoff below the representable range expires nothing.
        match self.ttl.and_then(|ttl| at.checked_sub_signed(ttl)) {
            Some(cutoff) if snap.created_at < cutoff => None,
            _ => Some(snap),
        }
    }

    /// Left join: one output row per entity row, in input order.
    pub fn historical_features(&self, entities: &[EntityRow]) -> Vec<JoinedRow> {
        entities
            .iter()
            .map(|e| JoinedRow {
                entity: e.clone(),
                features: self.as_of(&e.user_id, e.event_timestamp).cloned(),
            })
            .collect()
    }
}

/// A positive, representable TTL of `days` days.
pub fn ttl_from_days(days: i64) -> Result<Duration> {
    if days <= 0 {
        return Err(FeatureStoreError::Config(format!("ttl must be positive, got {days} days")));
    }
    Duration::try_days(days)
        .ok_or_else(|| FeatureStoreError::Config(format!("ttl of {days} days is out of range")))
}

/// Read entity rows. `user_id` and `event_timestamp` are required; every other
/// column is kept as pass-through text.
pub fn read_entity_rows<R: Read>(reader: R) -> Result<EntitySet> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let headers = rdr.headers()?.clone();
    let position = |field: &'static str| {
        headers
            .iter()
            .position(|h| h == field)
            .ok_or(FeatureStoreError::MissingField { row: 0, field })
    };
    let user_col = position("user_id")?;
    let ts_col = position("event_timestamp")?;
    let extra_idx: Vec<usize> = (0..headers.len()).filter(|&i| i != user_col && i != ts_col).collect();

    let mut rows = Vec::new();
    for (i, rec) in rdr.records().enumerate() {
        let rec = rec?;
        let row = i + 1;
        let user_id = rec
            .get(user_col)
            .filter(|u| !u.is_empty())
            .ok_or(FeatureStoreError::MissingField { row, field: "user_id" })?;
        let raw_ts = rec
            .get(ts_col)
            .filter(|t| !t.is_empty())
            .ok_or(FeatureStoreError::MissingField { row, field: "event_timestamp" })?;
        let event_timestamp = parse_timestamp(raw_ts)
            .ok_or_else(|| FeatureStoreError::invalid(row, "event_timestamp", raw_ts))?;
        let extra = extra_idx
            .iter()
            .map(|&c| rec.get(c).unwrap_or_default().to_string())
            .collect();
        rows.push(EntityRow::new(user_id, event_timestamp).with_extra(extra));
    }
    Ok(EntitySet {
        extra_columns: extra_idx.iter().map(|&c| headers[c].to_string()).collect(),
        rows,
    })
}
