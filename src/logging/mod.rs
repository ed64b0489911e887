//! Structured logging setup and JSON summary lines.

mod format;

pub use format::{LogEvent, StructuredLogger};
