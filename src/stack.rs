//! Connectivity checks for the external feature-store stack: Postgres (offline store),
//! Redis (online store) and the MLflow tracking server. Every probe is bounded by the
//! configured timeout and reports an outcome instead of failing the run.

use crate::config::{PostgresConfig, RedisConfig, StackConfig};
use crate::registry::FEATURE_VIEWS;
use anyhow::{bail, Context};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{info, warn};

const REDIS_PROBE_KEY: &str = "fraud_feature_store:stack_check";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Passed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckOutcome {
    pub service: &'static str,
    pub status: CheckStatus,
    pub detail: String,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StackReport {
    pub checked_at: String,
    pub outcomes: Vec<CheckOutcome>,
}

impl StackReport {
    pub fn all_passed(&self) -> bool {
        self.outcomes.iter().all(|o| o.status == CheckStatus::Passed)
    }

    pub fn failed(&self) -> impl Iterator<Item = &CheckOutcome> {
        self.outcomes.iter().filter(|o| o.status == CheckStatus::Failed)
    }
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

async fn probe_postgres(cfg: &PostgresConfig, limit: Duration) -> anyhow::Result<String> {
    use sqlx::postgres::PgPoolOptions;

    if !is_identifier(&cfg.schema) {
        bail!("invalid schema name {:?}", cfg.schema);
    }
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(limit)
        .connect_with(cfg.connect_options())
        .await
        .context("connect")?;

    let version: String = sqlx::query_scalar("SELECT version()")
        .fetch_one(&pool)
        .await?;
    let schema: Option<String> = sqlx::query_scalar(
        "SELECT schema_name::text FROM information_schema.schemata WHERE schema_name = $1",
    )
    .bind(&cfg.schema)
    .fetch_optional(&pool)
    .await?;
    if schema.is_none() {
        pool.close().await;
        bail!("schema {} does not exist", cfg.schema);
    }

    let mut tables = Vec::new();
    for view in FEATURE_VIEWS {
        let qualified = format!("{}.{}", cfg.schema, view.source_table);
        let exists: Option<String> = sqlx::query_scalar("SELECT to_regclass($1)::text")
            .bind(&qualified)
            .fetch_one(&pool)
            .await?;
        if exists.is_some() {
            let n: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {qualified}"))
                .fetch_one(&pool)
                .await?;
            tables.push(format!("{}={n}", view.source_table));
        }
    }
    pool.close().await;

    let short: String = version.chars().take(50).collect();
    Ok(format!("{short}; schema {} [{}]", cfg.schema, tables.join(", ")))
}

async fn probe_redis(cfg: &RedisConfig) -> anyhow::Result<String> {
    use redis::AsyncCommands;

    let client = redis::Client::open(cfg.connection_url())?;
    let mut conn = client.get_multiplexed_async_connection().await.context("connect")?;
    let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
    let _: () = conn.set(REDIS_PROBE_KEY, "ok").await?;
    let got: Option<String> = conn.get(REDIS_PROBE_KEY).await?;
    let _: () = conn.del(REDIS_PROBE_KEY).await?;
    if got.as_deref() != Some("ok") {
        bail!("read back {got:?} after write");
    }
    Ok(format!("{pong}; read/write ok"))
}

#[derive(Debug, Default, Deserialize)]
struct ExperimentList {
    #[serde(default)]
    experiments: Vec<serde_json::Value>,
}

/// Experiment count via `experiments/search`, falling back to the pre-2.0 `experiments/list`.
async fn mlflow_experiments(http: &reqwest::Client, base: &str) -> anyhow::Result<usize> {
    let search = format!("{base}/api/2.0/mlflow/experiments/search?max_results=1000");
    let mut res = http.get(&search).send().await.context("experiments")?;
    if res.status() == reqwest::StatusCode::NOT_FOUND {
        let list = format!("{base}/api/2.0/mlflow/experiments/list");
        res = http.get(&list).send().await.context("experiments")?;
    }
    let status = res.status();
    if !status.is_success() {
        bail!("experiments query returned {status}");
    }
    let body: ExperimentList = res.json().await.context("experiments body")?;
    Ok(body.experiments.len())
}

async fn probe_mlflow(http: &reqwest::Client, uri: &str) -> anyhow::Result<String> {
    let base = uri.trim_end_matches('/');
    let url = format!("{base}/health");
    let res = http.get(&url).send().await.context("request")?;
    let status = res.status();
    if !status.is_success() {
        bail!("{url} returned {status}");
    }
    let experiments = mlflow_experiments(http, base).await?;
    Ok(format!("{url} {status}; {experiments} experiments"))
}

pub struct StackChecker {
    config: StackConfig,
    http: reqwest::Client,
}

impl StackChecker {
    pub fn new(config: StackConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { config, http })
    }

    async fn timed<F>(&self, service: &'static str, probe: F) -> CheckOutcome
    where
        F: Future<Output = anyhow::Result<String>>,
    {
        let started = Instant::now();
        let limit = Duration::from_secs(self.config.timeout_secs);
        let (status, detail) = match tokio::time::timeout(limit, probe).await {
            Ok(Ok(detail)) => (CheckStatus::Passed, detail),
            Ok(Err(e)) => (CheckStatus::Failed, format!("{e:#}")),
            Err(_) => (CheckStatus::Failed, format!("timed out after {}s", limit.as_secs())),
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match status {
            CheckStatus::Passed => info!(service, elapsed_ms, %detail, "stack check passed"),
            CheckStatus::Failed => warn!(service, elapsed_ms, %detail, "stack check failed"),
        }
        CheckOutcome {
            service,
            status,
            detail,
            elapsed_ms,
        }
    }

    pub async fn check_postgres(&self) -> CheckOutcome {
        let limit = Duration::from_secs(self.config.timeout_secs);
        self.timed("postgres", probe_postgres(&self.config.postgres, limit))
            .await
    }

    pub async fn check_redis(&self) -> CheckOutcome {
        self.timed("redis", probe_redis(&self.config.redis)).await
    }

    pub async fn check_mlflow(&self) -> CheckOutcome {
        self.timed("mlflow", probe_mlflow(&self.http, &self.config.mlflow_uri))
            .await
    }

    /// Run every probe concurrently.
    pub async fn run(&self) -> StackReport {
        let (pg, redis, mlflow) =
            tokio::join!(self.check_postgres(), self.check_redis(), self.check_mlflow());
        StackReport {
            checked_at: Utc::now().to_rfc3339(),
            outcomes: vec![pg, redis, mlflow],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable() -> StackConfig {
        let mut c = StackConfig::default();
        c.postgres.host = "127.0.0.1".into();
        c.postgres.port = 1;
        c.redis.host = "127.0.0.1".into();
        c.redis.port = 1;
        c.mlflow_uri = "http://127.0.0.1:1/".into();
        c.timeout_secs = 3;
        c
    }

    #[tokio::test]
    async fn unreachable_services_are_reported_not_raised() {
        let checker = StackChecker::new(unreachable()).unwrap();
        let report = checker.run().await;
        assert_eq!(report.outcomes.len(), 3);
        assert!(!report.all_passed());
        assert_eq!(report.failed().count(), 3);
        let services: Vec<&str> = report.outcomes.iter().map(|o| o.service).collect();
        assert_eq!(services, vec!["postgres", "redis", "mlflow"]);
    }

    #[tokio::test]
    async fn bad_schema_name_fails_before_connecting() {
        let mut c = unreachable();
        c.postgres.schema = "features; drop".into();
        let outcome = StackChecker::new(c).unwrap().check_postgres().await;
        assert_eq!(outcome.status, CheckStatus::Failed);
        assert!(outcome.detail.contains("invalid schema"));
    }

    /// Minimal HTTP responder: `/health` is OK, `search` is missing, `list` has two experiments.
    async fn fake_mlflow() -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else { break };
                let mut buf = vec![0u8; 4096];
                let n = socket.read(&mut buf).await.unwrap_or(0);
                let request = String::from_utf8_lossy(&buf[..n]).to_string();
                let (status, body) = if request.starts_with("GET /health") {
                    ("200 OK", "OK".to_string())
                } else if request.contains("/experiments/list") {
                    ("200 OK", r#"{"experiments":[{"name":"a"},{"name":"b"}]}"#.to_string())
                } else {
                    ("404 Not Found", String::new())
                };
                let response = format!(
                    "HTTP/1.1 {status}\r\ncontent-length: {}\r\ncontent-type: application/json\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });
        format!("http://{addr}/")
    }

    #[tokio::test]
    async fn mlflow_check_reports_experiment_count() {
        let mut c = unreachable();
        c.mlflow_uri = fake_mlflow().await;
        let outcome = StackChecker::new(c).unwrap().check_mlflow().await;
        assert_eq!(outcome.status, CheckStatus::Passed, "{}", outcome.detail);
        assert!(outcome.detail.ends_with("2 experiments"));
    }

    #[test]
    fn report_serializes_statuses_in_snake_case() {
        let report = StackReport {
            checked_at: "now".into(),
            outcomes: vec![CheckOutcome {
                service: "redis",
                status: CheckStatus::Passed,
                detail: "PONG".into(),
                elapsed_ms: 1,
            }],
        };
        assert!(report.all_passed());
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains(r#""status":"passed""#));
    }
}
