//! High-water mark bookkeeping and its checkpoint form.

use crate::error::Result;
use crate::source::RawEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;

/// Most recently attempted event, ordered by event time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark {
    pub event_time: DateTime<Utc>,
    pub event_id: String,
}

/// Per-detector progress through the trail.
///
/// Several events can share one timestamp (CloudTrail has second resolution), so
/// besides the mark we keep every id already attempted at the mark's time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamState {
    mark: Option<Watermark>,
    boundary_ids: HashSet<String>,
}

impl StreamState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn high_water_mark(&self) -> Option<&Watermark> {
        self.mark.as_ref()
    }

    pub fn is_seen(&self, event: &RawEvent) -> bool {
        match &self.mark {
            None => false,
            Some(m) if event.event_time < m.event_time => true,
            Some(m) if event.event_time == m.event_time => self.boundary_ids.contains(&event.event_id),
            Some(_) => false,
        }
    }

    /// Events not yet attempted, oldest first. Duplicate ids within the page are dropped.
    pub fn filter_new(&self, fetched: &[RawEvent]) -> Vec<RawEvent> {
        let mut ids = HashSet::new();
        // the source returns newest first
        let mut fresh: Vec<RawEvent> = fetched
            .iter()
            .rev()
            .filter(|e| !self.is_seen(e) && ids.insert(e.event_id.clone()))
            .cloned()
            .collect();
        fresh.sort_by_key(|e| e.event_time);
        fresh
    }

    /// Move the mark past `event`. Never moves backwards.
    pub fn advance(&mut self, event: &RawEvent) {
        match self.mark.as_ref().map(|m| event.event_time.cmp(&m.event_time)) {
            Some(Ordering::Less) => {}
            Some(Ordering::Equal) => {
                if let Some(m) = self.mark.as_mut() {
                    m.event_id = event.event_id.clone();
                }
                self.boundary_ids.insert(event.event_id.clone());
            }
            _ => {
                self.mark = Some(Watermark {
                    event_time: event.event_time,
                    event_id: event.event_id.clone(),
                });
                self.boundary_ids.clear();
                self.boundary_ids.insert(event.event_id.clone());
            }
        }
    }

    pub fn checkpoint(&self) -> Option<Checkpoint> {
        let mark = self.mark.clone()?;
        let mut boundary_ids: Vec<String> = self.boundary_ids.iter().cloned().collect();
        boundary_ids.sort();
        Some(Checkpoint { mark, boundary_ids })
    }

    pub fn from_checkpoint(cp: Checkpoint) -> Self {
        let mut boundary_ids: HashSet<String> = cp.boundary_ids.into_iter().collect();
        boundary_ids.insert(cp.mark.event_id.clone());
        Self {
            mark: Some(cp.mark),
            boundary_ids,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub mark: Watermark,
    pub boundary_ids: Vec<String>,
}

/// Durable home for per-trail checkpoints.
pub trait CheckpointStore: Send + Sync {
    fn load_checkpoint(&self, trail: &str) -> Result<Option<Checkpoint>>;
    fn save_checkpoint(&self, trail: &str, checkpoint: &Checkpoint) -> Result<()>;
}
