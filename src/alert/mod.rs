//! Per-anomaly notifications: console line, in-process channel, webhook.

mod webhook;

pub use webhook::WebhookAlert;

use crate::error::{Result, StreamError};
use crate::logging::{AlertLine, StructuredLogger};
use crate::risk::RiskLevel;
use crate::stream::ScoredEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::mpsc::Sender;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub alert_id: Uuid,
    pub trail: String,
    pub detected_at: DateTime<Utc>,
    pub level: RiskLevel,
    pub event_id: String,
    pub event_time: DateTime<Utc>,
    pub event_name: Option<String>,
    pub username: Option<String>,
    pub source_ip: Option<String>,
    pub aws_region: Option<String>,
    pub anomaly_score: f64,
}

impl Alert {
    pub fn new(trail: &str, scored: &ScoredEvent, level: RiskLevel) -> Self {
        let ev = &scored.event;
        Self {
            alert_id: Uuid::new_v4(),
            trail: trail.to_string(),
            detected_at: scored.classified_at,
            level,
            event_id: ev.event_id.clone(),
            event_time: ev.event_time,
            event_name: ev.event_name().map(String::from),
            username: ev.username().map(String::from),
            source_ip: ev.source_ip().map(String::from),
            aws_region: ev.region().map(String::from),
            anomaly_score: scored.anomaly_score,
        }
    }

    /// Human-readable single line.
    pub fn line(&self) -> String {
        format!(
            "ANOMALY DETECTED [{}] trail={} event={} name={} user={} ip={} score={:.4}",
            self.level,
            self.trail,
            self.event_id,
            self.event_name.as_deref().unwrap_or("Unknown"),
            self.username.as_deref().unwrap_or("Unknown"),
            self.source_ip.as_deref().unwrap_or("Unknown"),
            self.anomaly_score
        )
    }

    pub fn to_line(&self) -> AlertLine<'_> {
        AlertLine {
            ts: self.detected_at.to_rfc3339(),
            level: "WARN",
            target: "trailwatch::alert",
            message: "anomaly detected",
            alert_id: self.alert_id.to_string(),
            trail: &self.trail,
            event_id: &self.event_id,
            event_name: self.event_name.as_deref().unwrap_or("Unknown"),
            username: self.username.as_deref().unwrap_or("Unknown"),
            source_ip: self.source_ip.as_deref().unwrap_or("Unknown"),
            anomaly_score: self.anomaly_score,
            risk_level: self.level.as_str(),
        }
    }
}

/// Delivery of an alert. Failures are reported to the caller, which logs and moves on.
pub trait AlertChannel: Send {
    fn name(&self) -> &str;
    fn send(&self, alert: &Alert) -> Result<()>;
}

/// One line per alert on a writer (stdout by default): ndjson or plain text.
pub struct ConsoleAlert {
    json: bool,
    out: Mutex<Box<dyn Write + Send>>,
}

impl ConsoleAlert {
    pub fn stdout(json: bool) -> Self {
        Self::with_writer(json, Box::new(std::io::stdout()))
    }

    pub fn with_writer(json: bool, out: Box<dyn Write + Send>) -> Self {
        Self {
            json,
            out: Mutex::new(out),
        }
    }
}

impl AlertChannel for ConsoleAlert {
    fn name(&self) -> &str {
        "console"
    }

    fn send(&self, alert: &Alert) -> Result<()> {
        let fail = |e: std::io::Error| StreamError::Alert {
            channel: "console".into(),
            reason: e.to_string(),
        };
        let mut out = self.out.lock().unwrap_or_else(|p| p.into_inner());
        if self.json {
            StructuredLogger::emit_json(&alert.to_line(), &mut *out).map_err(fail)
        } else {
            writeln!(out, "{}", alert.line())
                .and_then(|_| out.flush())
                .map_err(fail)
        }
    }
}

/// Forwards alerts to an in-process consumer.
pub struct ChannelAlert {
    tx: Mutex<Sender<Alert>>,
}

impl ChannelAlert {
    pub fn new(tx: Sender<Alert>) -> Self {
        Self { tx: Mutex::new(tx) }
    }
}

impl AlertChannel for ChannelAlert {
    fn name(&self) -> &str {
        "channel"
    }

    fn send(&self, alert: &Alert) -> Result<()> {
        let tx = self.tx.lock().unwrap_or_else(|p| p.into_inner());
        tx.send(alert.clone()).map_err(|_| StreamError::Alert {
            channel: "channel".into(),
            reason: "receiver dropped".into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureVector;
    use crate::model::Label;
    use crate::source::RawEvent;
    use chrono::TimeZone;
    use serde_json::json;
    use std::sync::{mpsc, Arc};

    fn scored() -> ScoredEvent {
        let t = Utc.with_ymd_and_hms(2024, 1, 6, 2, 0, 0).unwrap();
        ScoredEvent {
            event: RawEvent::new(
                "e-1",
                t,
                json!({"eventName": "DeleteTrail", "userIdentity": {"userName": "mallory"}}),
            ),
            features: FeatureVector::new(vec![2.0]),
            label: Label::Anomaly,
            anomaly_score: -0.25,
            classified_at: t,
        }
    }

    #[derive(Clone, Default)]
    struct Shared(Arc<Mutex<Vec<u8>>>);

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn plain_console_line_names_the_event() {
        let buf = Shared::default();
        let console = ConsoleAlert::with_writer(false, Box::new(buf.clone()));
        console.send(&Alert::new("mgmt", &scored(), RiskLevel::High)).unwrap();
        let text = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        assert!(text.starts_with("ANOMALY DETECTED [high] trail=mgmt event=e-1 name=DeleteTrail user=mallory"));
        assert_eq!(text.lines().count(), 1);
    }

    #[test]
    fn json_console_line_is_one_object() {
        let buf = Shared::default();
        let console = ConsoleAlert::with_writer(true, Box::new(buf.clone()));
        console.send(&Alert::new("mgmt", &scored(), RiskLevel::Medium)).unwrap();
        let text = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        let v: serde_json::Value = serde_json::from_str(text.trim_end()).unwrap();
        assert_eq!(v["risk_level"], "medium");
        assert_eq!(v["source_ip"], "Unknown");
    }

    #[test]
    fn channel_reports_dropped_receiver() {
        let (tx, rx) = mpsc::channel();
        let channel = ChannelAlert::new(tx);
        let alert = Alert::new("mgmt", &scored(), RiskLevel::Low);
        channel.send(&alert).unwrap();
        assert_eq!(rx.recv().unwrap().event_id, "e-1");
        drop(rx);
        assert!(matches!(channel.send(&alert), Err(StreamError::Alert { .. })));
    }
}
