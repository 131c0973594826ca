//! Poll → classify → persist loop for one trail.

use super::state::{CheckpointStore, StreamState};
use super::{CycleSummary, ScoredEvent, SessionSummary};
use crate::alert::{Alert, AlertChannel};
use crate::clock::{Clock, StopSignal};
use crate::config::{FeaturesConfig, RiskConfig, StreamConfig};
use crate::error::{Result, StreamError};
use crate::features::FeatureExtractor;
use crate::model::LoadedModel;
use crate::risk::RiskEngine;
use crate::sink::AnomalySink;
use crate::source::{EventSource, RawEvent};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Polling,
    Classifying,
    Persisting,
    Sleeping,
}

impl Phase {
    fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Polling => "polling",
            Phase::Classifying => "classifying",
            Phase::Persisting => "persisting",
            Phase::Sleeping => "sleeping",
        }
    }
}

/// A sink and the anomalies it has not yet accepted.
struct SinkSlot {
    sink: Box<dyn AnomalySink>,
    pending: Vec<ScoredEvent>,
}

pub struct StreamController {
    trail: String,
    source: Box<dyn EventSource>,
    model: Arc<LoadedModel>,
    extractor: FeatureExtractor,
    clock: Arc<dyn Clock>,
    config: StreamConfig,
    risk: RiskEngine,
    sinks: Vec<SinkSlot>,
    alerts: Vec<Box<dyn AlertChannel>>,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
    phase: Phase,
    session: SessionSummary,
}

impl StreamController {
    pub fn new(
        trail: impl Into<String>,
        source: Box<dyn EventSource>,
        model: Arc<LoadedModel>,
        features: FeaturesConfig,
        config: StreamConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let extractor = model.extractor(features)?;
        Ok(Self {
            trail: trail.into(),
            source,
            model,
            extractor,
            clock,
            config,
            risk: RiskEngine::new(RiskConfig::default()),
            sinks: Vec::new(),
            alerts: Vec::new(),
            checkpoints: None,
            phase: Phase::Idle,
            session: SessionSummary::default(),
        })
    }

    pub fn with_sink(mut self, sink: Box<dyn AnomalySink>) -> Self {
        self.sinks.push(SinkSlot {
            sink,
            pending: Vec::new(),
        });
        self
    }

    pub fn with_alert(mut self, channel: Box<dyn AlertChannel>) -> Self {
        self.alerts.push(channel);
        self
    }

    pub fn with_checkpoints(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = Some(store);
        self
    }

    pub fn with_risk(mut self, config: RiskConfig) -> Self {
        self.risk = RiskEngine::new(config);
        self
    }

    pub fn trail(&self) -> &str {
        &self.trail
    }

    pub fn session(&self) -> &SessionSummary {
        &self.session
    }

    /// Anomalies still waiting for at least one sink.
    pub fn pending(&self) -> usize {
        self.sinks.iter().map(|s| s.pending.len()).max().unwrap_or(0)
    }

    fn enter(&mut self, phase: Phase) {
        debug!(trail = %self.trail, from = self.phase.as_str(), to = phase.as_str(), "phase");
        self.phase = phase;
    }

    /// Starting state: the saved checkpoint when one exists, otherwise empty.
    pub fn initial_state(&self) -> StreamState {
        let Some(store) = &self.checkpoints else {
            return StreamState::new();
        };
        match store.load_checkpoint(&self.trail) {
            Ok(Some(cp)) => {
                info!(trail = %self.trail, event_id = %cp.mark.event_id, event_time = %cp.mark.event_time, "resuming from checkpoint");
                StreamState::from_checkpoint(cp)
            }
            Ok(None) => StreamState::new(),
            Err(e) => {
                warn!(trail = %self.trail, error = %e, "checkpoint unreadable, starting fresh");
                StreamState::new()
            }
        }
    }

    /// One POLLING → CLASSIFYING → PERSISTING pass.
    ///
    /// Source errors and fatal classification errors are returned; per-event
    /// failures and sink failures are reported in the summary.
    pub fn run_cycle(&mut self, state: &mut StreamState, stop: &StopSignal) -> Result<CycleSummary> {
        let mut summary = CycleSummary::default();

        self.enter(Phase::Polling);
        let fetched = self.source.fetch(&self.trail, self.config.page_size)?;
        let fresh = state.filter_new(&fetched);
        summary.fetched = fetched.len();
        summary.new = fresh.len();

        self.enter(Phase::Classifying);
        for (i, event) in fresh.iter().enumerate() {
            if stop.is_requested() {
                summary.deferred = fresh.len() - i;
                info!(trail = %self.trail, deferred = summary.deferred, "stop requested, deferring rest of batch");
                break;
            }
            state.advance(event);
            match self.classify(event) {
                Ok(scored) => {
                    summary.classified += 1;
                    self.session.classified += 1;
                    if scored.is_anomaly() {
                        summary.anomalies += 1;
                        self.notify(&scored);
                        for slot in &mut self.sinks {
                            slot.pending.push(scored.clone());
                        }
                        self.session.anomalies.push(scored);
                    } else if self.config.retain_normals {
                        self.session.normals.push(scored);
                    }
                }
                Err(e) if e.is_fatal() => {
                    error!(trail = %self.trail, event_id = %event.event_id, stage = %e.stage(), error = %e, "fatal classification error");
                    return Err(e);
                }
                Err(e) => {
                    warn!(trail = %self.trail, event_id = %event.event_id, stage = %e.stage(), error = %e, "event skipped");
                    self.session.skipped += 1;
                    summary.failures.push((event.event_id.clone(), e));
                }
            }
        }

        self.enter(Phase::Persisting);
        summary.persist_failures = self.flush();
        self.save_checkpoint(state);

        self.enter(Phase::Idle);
        Ok(summary)
    }

    fn classify(&self, event: &RawEvent) -> Result<ScoredEvent> {
        let (features, score) = self.model.classify(&self.extractor, event)?;
        Ok(ScoredEvent {
            event: event.clone(),
            features,
            label: score.label,
            anomaly_score: score.anomaly_score,
            classified_at: self.clock.now(),
        })
    }

    fn notify(&self, scored: &ScoredEvent) {
        let level = self.risk.level(scored.anomaly_score);
        warn!(
            trail = %self.trail,
            event_id = %scored.event.event_id,
            event_name = scored.event.event_name().unwrap_or("Unknown"),
            principal = scored.event.principal(),
            score = scored.anomaly_score,
            level = %level,
            "anomaly detected"
        );
        if self.alerts.is_empty() {
            return;
        }
        let alert = Alert::new(&self.trail, scored, level);
        for channel in &self.alerts {
            if let Err(e) = channel.send(&alert) {
                warn!(channel = channel.name(), event_id = %alert.event_id, error = %e, "alert delivery failed");
            }
        }
    }

    /// Push every sink's pending anomalies, retrying a failed append once.
    fn flush(&mut self) -> Vec<StreamError> {
        let mut failures = Vec::new();
        for slot in &mut self.sinks {
            if slot.pending.is_empty() {
                continue;
            }
            let result = slot.sink.append(&slot.pending).or_else(|first| {
                warn!(sink = slot.sink.name(), error = %first, "append failed, retrying once");
                slot.sink.append(&slot.pending)
            });
            match result {
                Ok(()) => {
                    debug!(sink = slot.sink.name(), rows = slot.pending.len(), "anomalies persisted");
                    slot.pending.clear();
                }
                Err(e) => {
                    warn!(sink = slot.sink.name(), buffered = slot.pending.len(), error = %e, "anomalies kept for next flush");
                    failures.push(e);
                }
            }
        }
        failures
    }

    fn save_checkpoint(&self, state: &StreamState) {
        let (Some(store), Some(cp)) = (&self.checkpoints, state.checkpoint()) else {
            return;
        };
        if let Err(e) = store.save_checkpoint(&self.trail, &cp) {
            warn!(trail = %self.trail, error = %e, "checkpoint not saved");
        }
    }

    /// Poll until the configured duration elapses, the cycle budget is spent or a
    /// stop is requested. Fatal errors end the run; anything else is logged.
    pub fn run(&mut self, state: &mut StreamState, stop: &StopSignal) -> Result<SessionSummary> {
        let started = self.clock.now();
        // a duration past the end of representable time means no deadline
        let deadline = self.config.duration_secs.and_then(|s| {
            let span = i64::try_from(s).ok().and_then(chrono::Duration::try_seconds)?;
            started.checked_add_signed(span)
        });
        let interval = Duration::from_secs(self.config.interval_secs);
        info!(
            trail = %self.trail,
            model = %self.model.uri,
            interval_secs = self.config.interval_secs,
            duration_secs = ?self.config.duration_secs,
            max_cycles = ?self.config.max_cycles,
            "streaming started"
        );

        let outcome = loop {
            if stop.is_requested() {
                info!(trail = %self.trail, "stop requested");
                break Ok(());
            }
            if deadline.map_or(false, |d| self.clock.now() >= d) {
                info!(trail = %self.trail, "duration elapsed");
                break Ok(());
            }
            if self.config.max_cycles.map_or(false, |m| self.session.cycles >= m) {
                break Ok(());
            }

            self.session.cycles += 1;
            let cycle = self.session.cycles;
            match self.run_cycle(state, stop) {
                Ok(c) if c.is_noop() && c.persist_failures.is_empty() => {
                    debug!(trail = %self.trail, cycle, fetched = c.fetched, "no new events");
                }
                Ok(c) => {
                    info!(
                        trail = %self.trail,
                        cycle,
                        fetched = c.fetched,
                        new = c.new,
                        classified = c.classified,
                        anomalies = c.anomalies,
                        failures = c.failures.len(),
                        deferred = c.deferred,
                        persist_failures = c.persist_failures.len(),
                        mark = ?state.high_water_mark().map(|m| m.event_id.as_str()),
                        "cycle complete"
                    );
                }
                Err(e) if e.is_fatal() => break Err(e),
                Err(e) => {
                    self.session.failed_cycles += 1;
                    warn!(trail = %self.trail, cycle, stage = %e.stage(), error = %e, "cycle failed");
                }
            }

            if stop.is_requested()
                || self.config.max_cycles.map_or(false, |m| self.session.cycles >= m)
            {
                continue;
            }
            self.enter(Phase::Sleeping);
            self.clock.sleep(interval, stop);
            self.enter(Phase::Idle);
        };

        self.enter(Phase::Persisting);
        for e in self.flush() {
            warn!(trail = %self.trail, error = %e, "anomalies not persisted at shutdown");
        }
        self.save_checkpoint(state);
        self.enter(Phase::Idle);

        match outcome {
            Ok(()) => {
                info!(
                    trail = %self.trail,
                    cycles = self.session.cycles,
                    classified = self.session.classified,
                    anomalies = self.session.anomalies.len(),
                    skipped = self.session.skipped,
                    "streaming stopped"
                );
                Ok(std::mem::take(&mut self.session))
            }
            Err(e) => {
                error!(trail = %self.trail, stage = %e.stage(), error = %e, "streaming aborted");
                Err(e)
            }
        }
    }
}
