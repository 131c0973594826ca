//! Webhook alert egress: one JSON POST per alert at or above the configured level.

use super::{Alert, AlertChannel};
use crate::config::WebhookConfig;
use crate::error::{Result, StreamError};
use crate::risk::RiskLevel;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

#[derive(Serialize)]
struct AlertPayload<'a> {
    id: String,
    source: &'a str,
    trail: &'a str,
    level: &'a str,
    score: f64,
    ts: String,
    event_id: &'a str,
    event_time: String,
    event_name: Option<&'a str>,
    username: Option<&'a str>,
    source_ip: Option<&'a str>,
    aws_region: Option<&'a str>,
}

impl<'a> From<&'a Alert> for AlertPayload<'a> {
    fn from(a: &'a Alert) -> Self {
        Self {
            id: a.alert_id.to_string(),
            source: "trailwatch",
            trail: &a.trail,
            level: a.level.as_str(),
            score: a.anomaly_score,
            ts: a.detected_at.to_rfc3339(),
            event_id: &a.event_id,
            event_time: a.event_time.to_rfc3339(),
            event_name: a.event_name.as_deref(),
            username: a.username.as_deref(),
            source_ip: a.source_ip.as_deref(),
            aws_region: a.aws_region.as_deref(),
        }
    }
}

pub struct WebhookAlert {
    client: reqwest::blocking::Client,
    url: String,
    min_level: RiskLevel,
}

impl WebhookAlert {
    /// `None` when the webhook is disabled or has no endpoint.
    pub fn new(config: &WebhookConfig) -> Result<Option<Self>> {
        if !config.enabled {
            return Ok(None);
        }
        let Some(endpoint) = config.endpoint.as_deref() else {
            return Ok(None);
        };
        let min_level = config.min_level.parse()?;
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| StreamError::Config(format!("webhook client: {}", e)))?;
        Ok(Some(Self {
            client,
            url: endpoint.trim_end_matches('/').to_string(),
            min_level,
        }))
    }

    pub fn accepts(&self, level: RiskLevel) -> bool {
        level >= self.min_level
    }

    fn post<T: Serialize + ?Sized>(&self, body: &T) -> std::result::Result<(), String> {
        let res = self
            .client
            .post(&self.url)
            .json(body)
            .send()
            .map_err(|e| e.to_string())?;
        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().unwrap_or_default();
            return Err(format!("{} {}", status, text));
        }
        Ok(())
    }
}

impl AlertChannel for WebhookAlert {
    fn name(&self) -> &str {
        "webhook"
    }

    fn send(&self, alert: &Alert) -> Result<()> {
        if !self.accepts(alert.level) {
            debug!(event_id = %alert.event_id, level = %alert.level, "below webhook level, not sent");
            return Ok(());
        }
        self.post(&AlertPayload::from(alert))
            .map_err(|reason| StreamError::Alert {
                channel: "webhook".into(),
                reason,
            })
    }
}
