//! ONNX Runtime scorer for exported isolation forests (e.g. skl2onnx).
//! Input: [1, feature_dim] f32. Outputs: label (int64, -1/1) and decision score (f32).

use super::{Label, Score, Scorer};
use crate::error::{Result, StreamError};
use crate::features::FeatureVector;
use ndarray::Array2;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Value;
use std::path::Path;
use std::sync::Mutex;

pub struct OnnxScorer {
    // `Session::run` takes `&mut self`
    session: Mutex<Session>,
    input_name: String,
    label_output: String,
    score_output: String,
    feature_dim: usize,
}

impl OnnxScorer {
    pub fn load(
        path: &Path,
        feature_dim: usize,
        label_output: &str,
        score_output: &str,
    ) -> Result<Self> {
        if !path.exists() {
            return Err(StreamError::ModelLoad(format!(
                "ONNX model not found: {}",
                path.display()
            )));
        }
        let session = Session::builder()
            .map_err(|e| load_err(path, e))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| load_err(path, e))?
            .commit_from_file(path)
            .map_err(|e| load_err(path, e))?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .unwrap_or_else(|| "X".to_string());
        for wanted in [label_output, score_output] {
            if !session.outputs.iter().any(|o| o.name == wanted) {
                return Err(StreamError::ModelLoad(format!(
                    "{}: model has no output `{}`",
                    path.display(),
                    wanted
                )));
            }
        }
        tracing::info!(path = %path.display(), input = %input_name, feature_dim, "ONNX model loaded");

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            label_output: label_output.to_string(),
            score_output: score_output.to_string(),
            feature_dim,
        })
    }
}

fn load_err(path: &Path, e: impl std::fmt::Display) -> StreamError {
    StreamError::ModelLoad(format!("{}: {}", path.display(), e))
}

fn fail(what: &str, e: impl std::fmt::Display) -> StreamError {
    StreamError::Scoring(format!("{}: {}", what, e))
}

impl Scorer for OnnxScorer {
    fn score(&self, features: &FeatureVector) -> Result<Score> {
        if features.dim() != self.feature_dim {
            return Err(StreamError::DimensionMismatch {
                expected: self.feature_dim,
                got: features.dim(),
            });
        }
        let data: Vec<f32> = features.values.iter().map(|v| *v as f32).collect();
        let arr = Array2::from_shape_vec((1, self.feature_dim), data)
            .map_err(|e| StreamError::Scoring(format!("input shape: {}", e)))?;
        let input = Value::from_array(arr).map_err(|e| fail("input tensor", e))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| StreamError::Scoring("session lock poisoned".into()))?;
        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => input])
            .map_err(|e| fail("inference", e))?;

        let label = outputs
            .get(&self.label_output)
            .ok_or_else(|| StreamError::Scoring(format!("no output `{}`", self.label_output)))?
            .try_extract_tensor::<i64>()
            .map_err(|e| fail("label tensor", e))?
            .1
            .first()
            .copied()
            .ok_or_else(|| StreamError::Scoring("empty label tensor".into()))?;
        let score = outputs
            .get(&self.score_output)
            .ok_or_else(|| StreamError::Scoring(format!("no output `{}`", self.score_output)))?
            .try_extract_tensor::<f32>()
            .map_err(|e| fail("score tensor", e))?
            .1
            .first()
            .copied()
            .ok_or_else(|| StreamError::Scoring("empty score tensor".into()))?;

        Ok(Score {
            label: Label::from_prediction(label),
            anomaly_score: score as f64,
        })
    }

    fn input_dim(&self) -> Option<usize> {
        Some(self.feature_dim)
    }

    fn flavor(&self) -> &'static str {
        "onnx"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_model_is_load_failure() {
        let err = OnnxScorer::load(Path::new("nonexistent.onnx"), 6, "label", "scores")
            .err()
            .unwrap();
        assert!(matches!(err, StreamError::ModelLoad(_)));
    }
}
