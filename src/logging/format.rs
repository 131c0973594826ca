//! JSON log lines: one JSON object per line (ndjson) for ingestion and audit.

use serde::Serialize;
use std::io::Write;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Alert record as written to the console in JSON mode.
#[derive(Debug, Serialize)]
pub struct AlertLine<'a> {
    pub ts: String,
    pub level: &'a str,
    pub target: &'a str,
    pub message: &'a str,
    pub alert_id: String,
    pub trail: &'a str,
    pub event_id: &'a str,
    pub event_name: &'a str,
    pub username: &'a str,
    pub source_ip: &'a str,
    pub anomaly_score: f64,
    pub risk_level: &'a str,
}

pub struct StructuredLogger;

impl StructuredLogger {
    /// Install global subscriber: JSON or plain lines to stdout, level from RUST_LOG or `default_level`.
    pub fn init(json: bool, default_level: &str) {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
        if json {
            let fmt = tracing_subscriber::fmt::layer()
                .json()
                .with_span_events(FmtSpan::NONE)
                .with_writer(std::io::stdout);
            tracing_subscriber::registry().with(filter).with(fmt).init();
        } else {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stdout))
                .init();
        }
    }

    /// Emit a single structured line without going through tracing.
    pub fn emit_json(event: &impl Serialize, w: &mut impl Write) -> std::io::Result<()> {
        let line = serde_json::to_string(event).map_err(std::io::Error::from)?;
        writeln!(w, "{}", line)?;
        w.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_one_object_per_line() {
        let line = AlertLine {
            ts: "2024-01-06T02:00:00+00:00".into(),
            level: "WARN",
            target: "trailwatch::alert",
            message: "anomaly detected",
            alert_id: "a-1".into(),
            trail: "mgmt",
            event_id: "e-1",
            event_name: "DeleteTrail",
            username: "mallory",
            source_ip: "203.0.113.9",
            anomaly_score: -0.25,
            risk_level: "high",
        };
        let mut out = Vec::new();
        StructuredLogger::emit_json(&line, &mut out).unwrap();
        StructuredLogger::emit_json(&line, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 2);
        let v: serde_json::Value = serde_json::from_str(text.lines().next().unwrap()).unwrap();
        assert_eq!(v["risk_level"], "high");
        assert_eq!(v["event_id"], "e-1");
    }
}
