//! Standard scaling with parameters fitted at training time. Never refitted here.

use super::FeatureVector;
use crate::error::{Result, StreamError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalerParams {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Scaler {
    mean: Vec<f64>,
    scale: Vec<f64>,
}

impl Scaler {
    /// Zero or non-finite scales load as 1.0, as sklearn does for constant columns.
    pub fn new(params: ScalerParams) -> Result<Self> {
        if params.mean.len() != params.scale.len() {
            return Err(StreamError::ModelLoad(format!(
                "scaler has {} means but {} scales",
                params.mean.len(),
                params.scale.len()
            )));
        }
        if let Some(i) = params.mean.iter().position(|m| !m.is_finite()) {
            return Err(StreamError::ModelLoad(format!("scaler mean[{}] is not finite", i)));
        }
        let scale = params
            .scale
            .into_iter()
            .map(|s| if s.is_finite() && s != 0.0 { s } else { 1.0 })
            .collect();
        Ok(Self {
            mean: params.mean,
            scale,
        })
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    pub fn transform(&self, v: &FeatureVector) -> Result<FeatureVector> {
        if v.dim() != self.dim() {
            return Err(StreamError::DimensionMismatch {
                expected: self.dim(),
                got: v.dim(),
            });
        }
        let values = v
            .values
            .iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(x, (m, s))| (x - m) / s)
            .collect();
        Ok(FeatureVector::new(values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scaler() -> Scaler {
        Scaler::new(ScalerParams {
            mean: vec![12.0, 3.0, 0.5],
            scale: vec![6.0, 2.0, 0.0],
        })
        .unwrap()
    }

    #[test]
    fn standardizes_each_column() {
        let out = scaler()
            .transform(&FeatureVector::new(vec![18.0, 1.0, 1.0]))
            .unwrap();
        assert_eq!(out.values, vec![1.0, -1.0, 0.5]);
    }

    #[test]
    fn transform_is_affine() {
        let s = scaler();
        let a = FeatureVector::new(vec![0.0, 0.0, 0.0]);
        let b = FeatureVector::new(vec![6.0, 4.0, 2.0]);
        let mid = FeatureVector::new(vec![3.0, 2.0, 1.0]);
        let (ta, tb, tm) = (
            s.transform(&a).unwrap(),
            s.transform(&b).unwrap(),
            s.transform(&mid).unwrap(),
        );
        for i in 0..3 {
            let expected = (ta.values[i] + tb.values[i]) / 2.0;
            assert!((tm.values[i] - expected).abs() < 1e-12);
        }
        assert_eq!(tm.dim(), 3);
    }

    #[test]
    fn dimension_mismatch_is_fatal() {
        let err = scaler()
            .transform(&FeatureVector::new(vec![1.0, 2.0]))
            .unwrap_err();
        assert!(matches!(err, StreamError::DimensionMismatch { expected: 3, got: 2 }));
        assert!(err.is_fatal());
    }

    #[test]
    fn mismatched_params_fail_to_load() {
        let err = Scaler::new(ScalerParams {
            mean: vec![0.0],
            scale: vec![1.0, 1.0],
        })
        .unwrap_err();
        assert!(matches!(err, StreamError::ModelLoad(_)));
    }
}
