//! Streaming controller: poll, dedup, classify, persist, alert.

mod controller;
mod state;

pub use controller::StreamController;
pub use state::{Checkpoint, CheckpointStore, StreamState, Watermark};

use crate::error::StreamError;
use crate::features::FeatureVector;
use crate::model::Label;
use crate::source::RawEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One classified event. Built once per raw event and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredEvent {
    pub event: RawEvent,
    /// Unscaled feature values
    pub features: FeatureVector,
    pub label: Label,
    pub anomaly_score: f64,
    pub classified_at: DateTime<Utc>,
}

impl ScoredEvent {
    pub fn is_anomaly(&self) -> bool {
        self.label.is_anomaly()
    }
}

/// Outcome of one poll/classify/persist pass.
#[derive(Debug, Default)]
pub struct CycleSummary {
    pub fetched: usize,
    pub new: usize,
    pub classified: usize,
    pub anomalies: usize,
    /// Events that could not be scored, with the reason
    pub failures: Vec<(String, StreamError)>,
    /// New events left unattempted because a stop was requested
    pub deferred: usize,
    /// Sinks that still hold buffered anomalies after the retry
    pub persist_failures: Vec<StreamError>,
}

impl CycleSummary {
    pub fn is_noop(&self) -> bool {
        self.new == 0
    }
}

/// Totals across the controller's lifetime.
#[derive(Debug, Default, Clone)]
pub struct SessionSummary {
    pub cycles: u64,
    pub failed_cycles: u64,
    pub classified: u64,
    pub skipped: u64,
    pub anomalies: Vec<ScoredEvent>,
    /// Only populated when normals are retained
    pub normals: Vec<ScoredEvent>,
}
