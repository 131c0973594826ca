//! Maps a model anomaly score onto configurable risk bands. Lower scores are riskier.

use crate::config::RiskConfig;
use crate::error::{Result, StreamError};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn from_score(score: f64, config: &RiskConfig) -> Self {
        if score <= config.high_threshold {
            RiskLevel::High
        } else if score <= config.medium_threshold {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

impl FromStr for RiskLevel {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(RiskLevel::Low),
            "medium" => Ok(RiskLevel::Medium),
            "high" => Ok(RiskLevel::High),
            other => Err(StreamError::Config(format!("unknown risk level {:?}", other))),
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct RiskEngine {
    config: RiskConfig,
}

impl RiskEngine {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    pub fn level(&self, anomaly_score: f64) -> RiskLevel {
        RiskLevel::from_score(anomaly_score, &self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bands_follow_thresholds() {
        let engine = RiskEngine::new(RiskConfig::default());
        assert_eq!(engine.level(-0.30), RiskLevel::High);
        assert_eq!(engine.level(-0.10), RiskLevel::High);
        assert_eq!(engine.level(-0.07), RiskLevel::Medium);
        assert_eq!(engine.level(-0.01), RiskLevel::Low);
        assert_eq!(engine.level(0.2), RiskLevel::Low);
    }

    #[test]
    fn parses_and_orders_levels() {
        assert_eq!("HIGH".parse::<RiskLevel>().unwrap(), RiskLevel::High);
        assert!("severe".parse::<RiskLevel>().is_err());
        assert!(RiskLevel::Low < RiskLevel::Medium && RiskLevel::Medium < RiskLevel::High);
    }
}
