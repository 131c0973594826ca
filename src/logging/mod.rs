//! Structured logging: tracing subscriber setup and ndjson alert lines.

mod format;

pub use format::{AlertLine, StructuredLogger};
