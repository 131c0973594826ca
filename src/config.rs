//! Detector configuration. JSON file first, then environment overrides.

use crate::error::{Result, StreamError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Data directory (CSV output, encrypted store)
    pub data_dir: PathBuf,
    /// CloudTrail access
    pub source: SourceConfig,
    /// Training-time feature conventions
    pub features: FeaturesConfig,
    /// Registry URI of the scoring model
    pub model: ModelConfig,
    /// Polling loop
    pub stream: StreamConfig,
    /// Output sinks
    pub sink: SinkConfig,
    /// Alert egress and risk thresholds
    pub alert: AlertConfig,
    pub risk: RiskConfig,
    /// Logging
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Trails to monitor; one detector instance per trail. `LookupEvents` covers
    /// the whole region, so trails sharing a region see the same events.
    pub trails: Vec<String>,
    pub region: String,
    /// Override for the CloudTrail endpoint (defaults to the regional endpoint)
    pub endpoint: Option<String>,
    /// Call GetTrail once before polling
    pub verify_trail: bool,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeaturesConfig {
    /// Hours in [start, end) are daytime; everything else is night
    pub daytime_start_hour: u32,
    pub daytime_end_hour: u32,
    /// Days counted as weekend (Monday = 0)
    pub weekend_days: Vec<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// e.g. `models:/IsolationForestModel/1`
    pub uri: String,
    /// Root directory of the filesystem model registry
    pub registry_root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub interval_secs: u64,
    /// Stop after this many seconds; run forever when unset
    pub duration_secs: Option<u64>,
    /// Stop after this many cycles
    pub max_cycles: Option<u64>,
    /// Events requested per poll
    pub page_size: usize,
    /// Keep normal-classified events in the session summary
    pub retain_normals: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Append-only CSV of anomalies; relative paths land under `data_dir`
    pub csv_path: PathBuf,
    /// Encrypted SQLite archive + checkpoints; enabled when a store secret is available
    pub store_path: Option<PathBuf>,
    /// Archived anomalies older than this are deleted at startup; kept forever when unset
    pub retention_days: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Print one alert line per anomaly to stdout
    pub console: bool,
    pub webhook: WebhookConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub enabled: bool,
    pub endpoint: Option<String>,
    /// Minimum risk level forwarded ("low", "medium", "high")
    pub min_level: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Anomaly score at or below this is high risk
    pub high_threshold: f64,
    /// Anomaly score at or below this is medium risk
    pub medium_threshold: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub json: bool,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .map(|d| d.join("trailwatch"))
            .unwrap_or_else(|| PathBuf::from(".trailwatch"));
        Self {
            model: ModelConfig {
                uri: "models:/IsolationForestModel/1".to_string(),
                registry_root: data_dir.join("models"),
            },
            data_dir,
            source: SourceConfig::default(),
            features: FeaturesConfig::default(),
            stream: StreamConfig::default(),
            sink: SinkConfig::default(),
            alert: AlertConfig::default(),
            risk: RiskConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            trails: Vec::new(),
            region: "us-east-1".to_string(),
            endpoint: None,
            verify_trail: true,
            request_timeout_secs: 15,
            connect_timeout_secs: 5,
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
        }
    }
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            daytime_start_hour: 7,
            daytime_end_hour: 24,
            weekend_days: vec![5, 6],
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        DetectorConfig::default().model
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            duration_secs: None,
            max_cycles: None,
            page_size: 50,
            retain_normals: false,
        }
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            csv_path: PathBuf::from("detected_anomalies.csv"),
            store_path: None,
            retention_days: None,
        }
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            console: true,
            webhook: WebhookConfig::default(),
        }
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: None,
            min_level: "medium".to_string(),
            timeout_secs: 10,
        }
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            high_threshold: -0.10,
            medium_threshold: -0.05,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: true,
        }
    }
}

impl SinkConfig {
    /// Oldest event time the archive keeps, relative to `now`.
    pub fn retention_cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let days = self.retention_days?;
        now.checked_sub_signed(chrono::Duration::days(i64::from(days)))
    }
}

impl DetectorConfig {
    /// Load from JSON file if present; otherwise return default. A file that fails
    /// to parse is an error rather than a silent fallback.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path)
            .map_err(|e| StreamError::Config(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str::<DetectorConfig>(&data)
            .map_err(|e| StreamError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Apply `TRAILWATCH_*` and AWS region overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Overrides from an arbitrary lookup (the environment in production).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(trails) = lookup("TRAILWATCH_TRAILS") {
            self.source.trails = trails
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(uri) = lookup("TRAILWATCH_MODEL_URI") {
            self.model.uri = uri;
        }
        if let Some(root) = lookup("TRAILWATCH_REGISTRY") {
            self.model.registry_root = PathBuf::from(root);
        }
        if let Some(region) = lookup("AWS_REGION").or_else(|| lookup("AWS_DEFAULT_REGION")) {
            self.source.region = region;
        }
        if let Some(v) = lookup("TRAILWATCH_INTERVAL_SECS") {
            self.stream.interval_secs = parse_num("TRAILWATCH_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = lookup("TRAILWATCH_DURATION_SECS") {
            self.stream.duration_secs = Some(parse_num("TRAILWATCH_DURATION_SECS", &v)?);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.source.trails.is_empty() {
            return Err(StreamError::Config("no trails configured".into()));
        }
        if self.stream.page_size == 0 {
            return Err(StreamError::Config("stream.page_size must be positive".into()));
        }
        if self.source.retry.max_attempts == 0 {
            return Err(StreamError::Config("source.retry.max_attempts must be positive".into()));
        }
        let f = &self.features;
        if f.daytime_start_hour > f.daytime_end_hour || f.daytime_end_hour > 24 {
            return Err(StreamError::Config(format!(
                "daytime window [{}, {}) is not within a day",
                f.daytime_start_hour, f.daytime_end_hour
            )));
        }
        if let Some(d) = f.weekend_days.iter().find(|d| **d > 6) {
            return Err(StreamError::Config(format!("weekend day {} out of range 0-6", d)));
        }
        if self.alert.webhook.enabled {
            self.alert.webhook.min_level.parse::<crate::risk::RiskLevel>()?;
        }
        if self.sink.retention_days == Some(0) {
            return Err(StreamError::Config("sink.retention_days must be positive".into()));
        }
        if self.source.trails.len() > 1 {
            let mut tags = HashSet::new();
            for trail in &self.source.trails {
                if !tags.insert(file_tag(trail)) {
                    return Err(StreamError::Config(format!(
                        "trail {:?} shares its CSV file name with another configured trail",
                        trail
                    )));
                }
            }
        }
        if self.risk.high_threshold > self.risk.medium_threshold {
            return Err(StreamError::Config(
                "risk.high_threshold must not exceed risk.medium_threshold".into(),
            ));
        }
        Ok(())
    }

    /// CSV path for one trail. With several trails each gets its own file.
    pub fn csv_path_for(&self, trail: &str) -> PathBuf {
        let base = if self.sink.csv_path.is_absolute() {
            self.sink.csv_path.clone()
        } else {
            self.data_dir.join(&self.sink.csv_path)
        };
        if self.source.trails.len() <= 1 {
            return base;
        }
        let stem = base
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "detected_anomalies".to_string());
        base.with_file_name(format!("{}.{}.csv", stem, file_tag(trail)))
    }
}

/// File-name-safe form of a trail name or ARN.
fn file_tag(trail: &str) -> String {
    trail
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

fn parse_num(key: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| StreamError::Config(format!("{} is not a number: {:?}", key, value)))
}
