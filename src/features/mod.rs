//! Feature engineering that reproduces the training pipeline for single events.

mod catalog;
mod extractor;
mod scaler;

pub use catalog::{Column, Feature};
pub use extractor::FeatureExtractor;
pub use scaler::{Scaler, ScalerParams};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Ordered feature values; order and width follow the model's frozen schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub values: Vec<f64>,
}

impl FeatureVector {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }
}

/// Categorical encodings fitted at training time and shipped with the model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Encodings {
    /// Column name (e.g. `eventName`) → value → relative frequency
    pub frequency: HashMap<String, HashMap<String, f64>>,
    /// Features with no per-event derivation, fixed to their training-time value
    pub imputed: HashMap<String, f64>,
}
