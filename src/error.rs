//! Error types for the feature store crate.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, FeatureStoreError>;

#[derive(Debug, Error)]
pub enum FeatureStoreError {
    /// A required column was empty or absent. `row` is 1-based, header excluded.
    #[error("row {row}: missing required field `{field}`")]
    MissingField { row: usize, field: &'static str },

    #[error("row {row}: invalid value {value:?} for field `{field}`")]
    InvalidField {
        row: usize,
        field: &'static str,
        value: String,
    },

    #[error("duplicate snapshot for user {user_id} at {created_at}")]
    DuplicateSnapshot { user_id: String, created_at: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FeatureStoreError {
    pub fn invalid(row: usize, field: &'static str, value: impl Into<String>) -> Self {
        Self::InvalidField {
            row,
            field,
            value: value.into(),
        }
    }

    /// True for row-level data integrity failures (as opposed to I/O).
    pub fn is_data_error(&self) -> bool {
        matches!(
            self,
            Self::MissingField { .. } | Self::InvalidField { .. } | Self::DuplicateSnapshot { .. }
        )
    }
}
