//! JSON log lines: one JSON object per line (ndjson) for run summaries and audit.

use chrono::Utc;
use serde::Serialize;
use std::io::Write;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Summary line for one CLI command.
#[derive(Debug, Serialize)]
pub struct LogEvent<'a, T: Serialize> {
    pub ts: String,
    pub level: &'a str,
    pub command: &'a str,
    pub message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<'a, T: Serialize> LogEvent<'a, T> {
    pub fn info(command: &'a str, message: &'a str, detail: T) -> Self {
        Self {
            ts: Utc::now().to_rfc3339(),
            level: "info",
            command,
            message,
            detail: Some(detail),
            error: None,
        }
    }

    pub fn error(command: &'a str, message: &'a str, error: impl ToString) -> Self {
        Self {
            ts: Utc::now().to_rfc3339(),
            level: "error",
            command,
            message,
            detail: None,
            error: Some(error.to_string()),
        }
    }
}

/// Initialize tracing with JSON or human-readable format.
pub struct StructuredLogger;

impl StructuredLogger {
    /// Install global subscriber writing to stderr, level from RUST_LOG or `default_level`.
    /// Stdout is reserved for command output.
    pub fn init(json: bool, default_level: &str) {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
        if json {
            let fmt = tracing_subscriber::fmt::layer()
                .json()
                .with_span_events(FmtSpan::NONE)
                .with_writer(std::io::stderr);
            let _ = tracing_subscriber::registry().with(filter).with(fmt).try_init();
        } else {
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .try_init();
        }
    }

    /// Emit a single structured line without going through tracing.
    pub fn emit_json(event: &impl Serialize, w: &mut impl Write) {
        if let Ok(line) = serde_json::to_string(event) {
            let _ = writeln!(w, "{}", line);
        }
    }
}
