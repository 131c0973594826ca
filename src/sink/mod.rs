//! Durable outputs for detected anomalies.

mod csv_file;

pub use csv_file::CsvSink;

use crate::error::Result;
use crate::stream::ScoredEvent;
use serde::{Deserialize, Serialize};

const UNKNOWN: &str = "Unknown";

/// Append-only anomaly output. A failed append must leave no part of the batch behind:
/// callers keep the batch and retry it whole.
pub trait AnomalySink: Send {
    fn name(&self) -> &str;
    fn append(&mut self, rows: &[ScoredEvent]) -> Result<()>;
}

impl<T: AnomalySink + ?Sized> AnomalySink for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn append(&mut self, rows: &[ScoredEvent]) -> Result<()> {
        (**self).append(rows)
    }
}

/// Flat output record; column order is the CSV header order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyRow {
    pub timestamp: String,
    pub is_anomaly: bool,
    pub prediction: i8,
    pub anomaly_score: f64,
    pub event_name: String,
    pub username: String,
    pub source_ip: String,
    pub aws_region: String,
    pub event_id: String,
}

impl AnomalyRow {
    pub fn from_scored(scored: &ScoredEvent) -> Self {
        let ev = &scored.event;
        let or_unknown = |v: Option<&str>| v.unwrap_or(UNKNOWN).to_string();
        Self {
            timestamp: scored.classified_at.to_rfc3339(),
            is_anomaly: scored.is_anomaly(),
            prediction: scored.label.prediction(),
            anomaly_score: scored.anomaly_score,
            event_name: or_unknown(ev.event_name()),
            username: or_unknown(ev.username()),
            source_ip: or_unknown(ev.source_ip()),
            aws_region: or_unknown(ev.region()),
            event_id: ev.event_id.clone(),
        }
    }
}
