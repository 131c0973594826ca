//! Anomaly scoring: scorer contract, isolation-forest and ONNX flavours, model registry.

mod forest;
mod onnx;
mod registry;

pub use forest::{average_path_length, IsolationForest, Tree};
pub use onnx::OnnxScorer;
pub use registry::{Flavor, LoadedModel, Manifest, ModelRegistry, ModelUri};

use crate::error::Result;
use crate::features::FeatureVector;
use serde::{Deserialize, Serialize};

/// Two-valued model output: `-1` anomaly, `1` normal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    Normal,
    Anomaly,
}

impl Label {
    pub fn prediction(&self) -> i8 {
        match self {
            Label::Normal => 1,
            Label::Anomaly => -1,
        }
    }

    pub fn from_prediction(p: i64) -> Self {
        if p < 0 {
            Label::Anomaly
        } else {
            Label::Normal
        }
    }

    pub fn is_anomaly(&self) -> bool {
        matches!(self, Label::Anomaly)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub label: Label,
    /// Lower (more negative) is more anomalous
    pub anomaly_score: f64,
}

/// Loaded once per detector lifetime and shared read-only; scoring has no side effects.
pub trait Scorer: Send + Sync {
    fn score(&self, features: &FeatureVector) -> Result<Score>;

    /// Input width the model was exported with, when it declares one.
    fn input_dim(&self) -> Option<usize>;

    fn flavor(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_protocol_values() {
        assert_eq!(Label::Anomaly.prediction(), -1);
        assert_eq!(Label::Normal.prediction(), 1);
        assert_eq!(Label::from_prediction(-1), Label::Anomaly);
        assert_eq!(Label::from_prediction(1), Label::Normal);
    }
}
