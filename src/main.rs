//! trailwatch entrypoint: one streaming detector per configured trail.
//! Config from `TRAILWATCH_CONFIG` (default `config.json`) plus environment overrides;
//! credentials from the standard AWS environment variables.

use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use trailwatch::{
    alert::{AlertChannel, ConsoleAlert, WebhookAlert},
    clock::{Clock, StopSignal, SystemClock},
    config::DetectorConfig,
    error::StreamError,
    logging::StructuredLogger,
    model::{LoadedModel, ModelRegistry},
    sink::CsvSink,
    source::{CloudTrailClient, Credentials, RetryPolicy, RetryingSource},
    storage::SecureStore,
    stream::{SessionSummary, StreamController},
};
use uuid::Uuid;

fn run_trail(
    trail: &str,
    config: &DetectorConfig,
    credentials: Credentials,
    model: Arc<LoadedModel>,
    store: Option<Arc<SecureStore>>,
    stop: &StopSignal,
) -> Result<SessionSummary, StreamError> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let client = CloudTrailClient::new(&config.source, credentials)?;
    let source = RetryingSource::new(client, RetryPolicy::from_config(&config.source.retry), clock.clone())
        .with_stop(stop.clone());

    let csv_path = config.csv_path_for(trail);
    info!(trail, csv = %csv_path.display(), "anomaly output");
    let mut controller = StreamController::new(
        trail,
        Box::new(source),
        model,
        config.features.clone(),
        config.stream.clone(),
        clock,
    )?
    .with_risk(config.risk.clone())
    .with_sink(Box::new(CsvSink::open(&csv_path)?));

    if config.alert.console {
        controller = controller.with_alert(Box::new(ConsoleAlert::stdout(config.log.json)));
    }
    if let Some(hook) = WebhookAlert::new(&config.alert.webhook)? {
        controller = controller.with_alert(Box::new(hook) as Box<dyn AlertChannel>);
    }
    if let Some(store) = store {
        controller = controller
            .with_sink(Box::new(store.sink(trail)))
            .with_checkpoints(store);
    }

    let mut state = controller.initial_state();
    controller.run(&mut state, stop)
}

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config_path = std::env::var("TRAILWATCH_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.json"));
    let mut config = DetectorConfig::load(&config_path)?;
    config.apply_env()?;

    StructuredLogger::init(config.log.json, &config.log.level);
    let run_id = Uuid::new_v4();
    info!(%run_id, config = %config_path.display(), data_dir = ?config.data_dir, "trailwatch starting");

    if let Err(e) = config.validate() {
        error!(%run_id, stage = %e.stage(), error = %e, "startup failed");
        return Err(e.into());
    }
    std::fs::create_dir_all(&config.data_dir)?;

    let credentials = Credentials::from_env().map_err(|e| {
        error!(%run_id, stage = %e.stage(), error = %e, "startup failed");
        e
    })?;
    let model = ModelRegistry::new(&config.model.registry_root)
        .load(&config.model.uri)
        .map(Arc::new)
        .map_err(|e| {
            error!(%run_id, stage = %e.stage(), error = %e, "startup failed");
            e
        })?;

    let store = match std::env::var("TRAILWATCH_STORE_SECRET") {
        Ok(secret) if !secret.is_empty() => {
            let path = config
                .sink
                .store_path
                .clone()
                .unwrap_or_else(|| config.data_dir.join("anomalies.db"));
            info!(path = %path.display(), "encrypted anomaly store enabled");
            let store = SecureStore::open(&path, secret.as_bytes())?;
            if let Some(cutoff) = config.sink.retention_cutoff(SystemClock.now()) {
                let pruned = store.prune_before(cutoff)?;
                info!(pruned, kept = store.count_anomalies()?, %cutoff, "anomaly archive retention applied");
            }
            Some(Arc::new(store))
        }
        _ => None,
    };

    let stop = StopSignal::new();
    {
        let stop = stop.clone();
        if let Err(e) = ctrlc::set_handler(move || stop.request_stop()) {
            warn!(error = %e, "could not install Ctrl+C handler");
        }
    }
    if config.source.trails.len() > 1 {
        warn!(
            region = %config.source.region,
            trails = config.source.trails.len(),
            "LookupEvents is region-wide; every trail will classify the same events"
        );
    }
    info!(trails = ?config.source.trails, model = %model.uri, "streaming (Ctrl+C to stop)");

    let results: Vec<(String, Result<SessionSummary, StreamError>)> = std::thread::scope(|scope| {
        let handles: Vec<_> = config
            .source
            .trails
            .iter()
            .map(|trail| {
                let (config, credentials, model, store, stop) =
                    (&config, credentials.clone(), model.clone(), store.clone(), &stop);
                let handle = scope.spawn(move || {
                    let result = run_trail(trail, config, credentials, model, store, stop);
                    if matches!(&result, Err(e) if e.is_fatal()) {
                        // one fatal trail ends the whole run
                        stop.request_stop();
                    }
                    result
                });
                (trail.clone(), handle)
            })
            .collect();
        handles
            .into_iter()
            .map(|(trail, h)| {
                let result = h
                    .join()
                    .unwrap_or_else(|_| Err(StreamError::Config(format!("detector thread for {} panicked", trail))));
                (trail, result)
            })
            .collect()
    });

    let mut first_error = None;
    for (trail, result) in results {
        match result {
            Ok(summary) => {
                info!(
                    %run_id,
                    trail = %trail,
                    cycles = summary.cycles,
                    failed_cycles = summary.failed_cycles,
                    classified = summary.classified,
                    skipped = summary.skipped,
                    anomalies = summary.anomalies.len(),
                    "session summary"
                );
            }
            Err(e) => {
                error!(%run_id, trail = %trail, stage = %e.stage(), error = %e, "detector failed");
                first_error.get_or_insert(e);
            }
        }
    }
    info!(%run_id, "trailwatch stopping");
    match first_error {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}
