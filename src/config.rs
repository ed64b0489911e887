//! Feature store configuration: JSON file with defaults, stack endpoints overridable from env.

use serde::{Deserialize, Serialize};
use sqlx::postgres::PgConnectOptions;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureStoreConfig {
    /// Output directory for CSV tables and the offline store
    pub data_dir: PathBuf,
    /// SQLite offline store file name, relative to `data_dir`
    pub store_file: String,
    /// Materialization switches
    pub materializer: MaterializerConfig,
    /// Point-in-time join defaults
    pub join: JoinConfig,
    /// External feature-store stack (Postgres, Redis, MLflow)
    pub stack: StackConfig,
    /// Logging
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaterializerConfig {
    /// Spread user partitions across the rayon pool
    pub parallel: bool,
    pub merchant_features: bool,
    pub category_features: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JoinConfig {
    /// Apply the feature view TTL during lookups
    pub respect_ttl: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    pub postgres: PostgresConfig,
    pub redis: RedisConfig,
    /// MLflow tracking server base URL
    pub mlflow_uri: String,
    /// Per-probe timeout (seconds)
    pub timeout_secs: u64,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    /// Schema holding the feature tables
    pub schema: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub json: bool,
}

impl Default for FeatureStoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data/processed"),
            store_file: "offline_store.db".to_string(),
            materializer: MaterializerConfig::default(),
            join: JoinConfig::default(),
            stack: StackConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Default for MaterializerConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            merchant_features: true,
            category_features: true,
        }
    }
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            postgres: PostgresConfig::default(),
            redis: RedisConfig::default(),
            mlflow_uri: "http://localhost:5000".to_string(),
            timeout_secs: 5,
        }
    }
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: "mlpipeline".to_string(),
            user: "mluser".to_string(),
            password: None,
            schema: "features".to_string(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl std::fmt::Debug for PostgresConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("schema", &self.schema)
            .finish()
    }
}

impl PostgresConfig {
    /// Connection options set field by field, so credentials never pass through URL parsing.
    pub fn connect_options(&self) -> PgConnectOptions {
        let options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.database)
            .username(&self.user);
        match &self.password {
            Some(pw) => options.password(pw),
            None => options,
        }
    }
}

impl RedisConfig {
    pub fn connection_url(&self) -> String {
        format!("redis://{}:{}/", self.host, self.port)
    }
}

impl FeatureStoreConfig {
    /// Load from JSON file if present; otherwise return default. Env overrides apply either way.
    pub fn load(path: &std::path::Path) -> Self {
        let mut config = Self::default();
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(data) => match serde_json::from_str::<FeatureStoreConfig>(&data) {
                    Ok(c) => config = c,
                    Err(e) => eprintln!("ignoring invalid config {}: {e}", path.display()),
                },
                Err(e) => eprintln!("cannot read config {}: {e}", path.display()),
            }
        }
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    /// Overlay stack endpoints from environment-style lookups.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let pg = &mut self.stack.postgres;
        if let Some(v) = lookup("POSTGRES_HOST") {
            pg.host = v;
        }
        if let Some(port) = lookup("POSTGRES_PORT").and_then(|v| v.parse().ok()) {
            pg.port = port;
        }
        if let Some(v) = lookup("POSTGRES_DB") {
            pg.database = v;
        }
        if let Some(v) = lookup("POSTGRES_USER") {
            pg.user = v;
        }
        if let Some(v) = lookup("POSTGRES_PASSWORD") {
            pg.password = Some(v);
        }
        if let Some(v) = lookup("REDIS_HOST") {
            self.stack.redis.host = v;
        }
        if let Some(port) = lookup("REDIS_PORT").and_then(|v| v.parse().ok()) {
            self.stack.redis.port = port;
        }
        if let Some(v) = lookup("MLFLOW_TRACKING_URI") {
            self.stack.mlflow_uri = v;
        }
    }

    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join(&self.store_file)
    }
}
