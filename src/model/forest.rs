//! Native isolation-forest evaluation over an exported sklearn forest.
//!
//! `score_samples = -2^(-E[h(x)] / c(max_samples))`, `decision = score_samples - offset`;
//! a point is an anomaly when its decision value is negative.

use super::{Label, Score, Scorer};
use crate::error::{Result, StreamError};
use crate::features::FeatureVector;
use serde::{Deserialize, Serialize};
use std::path::Path;

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tree {
    pub children_left: Vec<i64>,
    pub children_right: Vec<i64>,
    pub feature: Vec<i64>,
    pub threshold: Vec<f64>,
    pub n_node_samples: Vec<f64>,
    /// Column subset this estimator was fit on (`estimators_features_`), if not all
    #[serde(default)]
    pub features: Option<Vec<usize>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationForest {
    pub n_features: usize,
    pub max_samples: f64,
    pub offset: f64,
    pub trees: Vec<Tree>,
}

/// Expected path length of an unsuccessful BST search over `n` points.
pub fn average_path_length(n: f64) -> f64 {
    if n <= 1.0 {
        0.0
    } else if n <= 2.0 {
        1.0
    } else {
        2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
    }
}

impl IsolationForest {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| StreamError::ModelLoad(format!("{}: {}", path.display(), e)))?;
        let forest: IsolationForest = serde_json::from_str(&data)
            .map_err(|e| StreamError::ModelLoad(format!("{}: {}", path.display(), e)))?;
        forest.validate()?;
        Ok(forest)
    }

    /// Structural checks so evaluation can index without bounds surprises or cycles.
    pub fn validate(&self) -> Result<()> {
        let bad = |msg: String| Err(StreamError::ModelLoad(msg));
        if self.trees.is_empty() {
            return bad("forest has no trees".into());
        }
        // c(1) = 0 would make every score non-finite
        if !(self.max_samples.is_finite() && self.max_samples > 1.0) {
            return bad(format!("max_samples {} must be a finite value above 1", self.max_samples));
        }
        for (t, tree) in self.trees.iter().enumerate() {
            let n = tree.children_left.len();
            if n == 0
                || tree.children_right.len() != n
                || tree.feature.len() != n
                || tree.threshold.len() != n
                || tree.n_node_samples.len() != n
            {
                return bad(format!("tree {}: node arrays are empty or of unequal length", t));
            }
            let width = tree.features.as_ref().map_or(self.n_features, Vec::len);
            if let Some(cols) = &tree.features {
                if let Some(c) = cols.iter().find(|c| **c >= self.n_features) {
                    return bad(format!("tree {}: column {} out of range", t, c));
                }
            }
            for node in 0..n {
                let (l, r) = (tree.children_left[node], tree.children_right[node]);
                if l < 0 {
                    continue;
                }
                let in_range = |c: i64| c > node as i64 && (c as usize) < n;
                if !in_range(l) || !in_range(r) {
                    return bad(format!("tree {} node {}: bad children ({}, {})", t, node, l, r));
                }
                let f = tree.feature[node];
                if f < 0 || f as usize >= width {
                    return bad(format!("tree {} node {}: feature {} out of range", t, node, f));
                }
            }
        }
        Ok(())
    }

    fn path_length(tree: &Tree, x: &[f64]) -> f64 {
        let mut node = 0usize;
        let mut depth = 0.0;
        loop {
            let left = tree.children_left[node];
            if left < 0 {
                return depth + average_path_length(tree.n_node_samples[node]);
            }
            let local = tree.feature[node] as usize;
            let col = tree.features.as_ref().map_or(local, |cols| cols[local]);
            // sklearn evaluates trees on float32 input
            let value = x[col] as f32 as f64;
            node = if value <= tree.threshold[node] {
                left as usize
            } else {
                tree.children_right[node] as usize
            };
            depth += 1.0;
        }
    }

    /// sklearn `score_samples`: in (-1, 0], lower is more abnormal.
    pub fn score_samples(&self, x: &[f64]) -> f64 {
        let total: f64 = self.trees.iter().map(|t| Self::path_length(t, x)).sum();
        let mean = total / self.trees.len() as f64;
        -(2f64).powf(-mean / average_path_length(self.max_samples))
    }

    /// sklearn `decision_function`: negative means anomaly.
    pub fn decision_function(&self, x: &[f64]) -> f64 {
        self.score_samples(x) - self.offset
    }
}

impl Scorer for IsolationForest {
    fn score(&self, features: &FeatureVector) -> Result<Score> {
        if features.dim() != self.n_features {
            return Err(StreamError::DimensionMismatch {
                expected: self.n_features,
                got: features.dim(),
            });
        }
        let decision = self.decision_function(features.as_slice());
        if !decision.is_finite() {
            return Err(StreamError::Scoring(format!("non-finite decision value {}", decision)));
        }
        let label = if decision < 0.0 {
            Label::Anomaly
        } else {
            Label::Normal
        };
        Ok(Score {
            label,
            anomaly_score: decision,
        })
    }

    fn input_dim(&self) -> Option<usize> {
        Some(self.n_features)
    }

    fn flavor(&self) -> &'static str {
        "isolation_forest"
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// One-feature forest: the root splits at 10; the left side holds a dense
    /// cluster (200 samples), the right side a single isolated sample.
    pub(crate) fn toy_forest() -> IsolationForest {
        let tree = Tree {
            children_left: vec![1, -1, -1],
            children_right: vec![2, -1, -1],
            feature: vec![0, -2, -2],
            threshold: vec![10.0, -2.0, -2.0],
            n_node_samples: vec![201.0, 200.0, 1.0],
            features: None,
        };
        IsolationForest {
            n_features: 1,
            max_samples: 201.0,
            offset: -0.5,
            trees: vec![tree.clone(), tree],
        }
    }

    #[test]
    fn average_path_length_matches_reference_values() {
        assert_eq!(average_path_length(1.0), 0.0);
        assert_eq!(average_path_length(2.0), 1.0);
        // 2 * (ln 255 + gamma) - 2 * 255 / 256
        let c256 = 2.0 * ((255f64).ln() + EULER_GAMMA) - 2.0 * 255.0 / 256.0;
        assert!((average_path_length(256.0) - c256).abs() < 1e-12);
        assert!((c256 - 10.2448).abs() < 1e-3);
    }

    #[test]
    fn isolated_point_scores_lower_than_cluster() {
        let forest = toy_forest();
        let inlier = forest.score(&FeatureVector::new(vec![3.0])).unwrap();
        let outlier = forest.score(&FeatureVector::new(vec![50.0])).unwrap();
        assert!(outlier.anomaly_score < inlier.anomaly_score);
        assert_eq!(outlier.label, Label::Anomaly);
        assert_eq!(inlier.label, Label::Normal);
    }

    #[test]
    fn label_follows_decision_sign() {
        let forest = toy_forest();
        for x in [-100.0, 0.0, 10.0, 10.5, 1e6] {
            let s = forest.score(&FeatureVector::new(vec![x])).unwrap();
            assert_eq!(s.label == Label::Anomaly, s.anomaly_score < 0.0);
        }
    }

    #[test]
    fn rejects_cyclic_or_out_of_range_trees() {
        let mut forest = toy_forest();
        forest.trees[0].children_left[0] = 0;
        assert!(forest.validate().is_err());

        let mut forest = toy_forest();
        forest.trees[1].feature[0] = 3;
        assert!(forest.validate().is_err());
    }

    #[test]
    fn rejects_degenerate_max_samples() {
        for bad in [1.0, 0.5, f64::NAN, f64::INFINITY] {
            let mut forest = toy_forest();
            forest.max_samples = bad;
            assert!(matches!(forest.validate(), Err(StreamError::ModelLoad(_))), "{}", bad);
        }
        let mut forest = toy_forest();
        forest.max_samples = 2.0;
        forest.validate().unwrap();
    }

    #[test]
    fn wrong_width_is_dimension_mismatch() {
        let err = toy_forest()
            .score(&FeatureVector::new(vec![1.0, 2.0]))
            .unwrap_err();
        assert!(matches!(err, StreamError::DimensionMismatch { expected: 1, got: 2 }));
    }
}
