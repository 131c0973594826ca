//! Filesystem model registry addressed by `models:/<name>/<version>` URIs.
//!
//! Layout: `<root>/<name>/<version>/manifest.json` next to the model artifact.

use super::{IsolationForest, OnnxScorer, Score, Scorer};
use crate::config::FeaturesConfig;
use crate::error::{Result, StreamError};
use crate::features::{Encodings, Feature, FeatureExtractor, FeatureVector, Scaler, ScalerParams};
use crate::source::RawEvent;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::info;

const SCHEME: &str = "models";
const MANIFEST: &str = "manifest.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelUri {
    pub name: String,
    pub version: String,
}

impl ModelUri {
    pub fn parse(uri: &str) -> Result<Self> {
        let bad = |why: &str| StreamError::ModelLoad(format!("invalid model URI {:?}: {}", uri, why));
        let (scheme, rest) = uri.split_once(":/").ok_or_else(|| bad("expected models:/<name>/<version>"))?;
        if scheme != SCHEME {
            return Err(bad("scheme must be `models`"));
        }
        let mut parts = rest.trim_start_matches('/').split('/');
        let name = parts.next().filter(|s| !s.is_empty()).ok_or_else(|| bad("empty name"))?;
        let version = parts.next().filter(|s| !s.is_empty()).ok_or_else(|| bad("empty version"))?;
        if parts.next().is_some() {
            return Err(bad("trailing path segments"));
        }
        Ok(Self {
            name: name.to_string(),
            version: version.to_string(),
        })
    }

    pub fn is_latest(&self) -> bool {
        self.version.eq_ignore_ascii_case("latest")
    }
}

impl fmt::Display for ModelUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:/{}/{}", SCHEME, self.name, self.version)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Flavor {
    IsolationForest,
    Onnx,
}

fn default_label_output() -> String {
    "label".to_string()
}

fn default_score_output() -> String {
    "scores".to_string()
}

/// Everything the training run froze alongside the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub name: Option<String>,
    pub flavor: Flavor,
    /// Artifact file name, relative to the version directory
    pub artifact: String,
    /// Ordered training feature names
    pub features: Vec<String>,
    pub scaler: ScalerParams,
    #[serde(default)]
    pub encodings: Encodings,
    #[serde(default = "default_label_output")]
    pub label_output: String,
    #[serde(default = "default_score_output")]
    pub score_output: String,
}

pub struct ModelRegistry {
    root: PathBuf,
}

impl ModelRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Version directory for `uri`; `latest` picks the highest numeric version.
    pub fn resolve_dir(&self, uri: &ModelUri) -> Result<PathBuf> {
        let model_dir = self.root.join(&uri.name);
        if !uri.is_latest() {
            let dir = model_dir.join(&uri.version);
            if !dir.is_dir() {
                return Err(StreamError::ModelLoad(format!(
                    "{}: no such version directory {}",
                    uri,
                    dir.display()
                )));
            }
            return Ok(dir);
        }
        let entries = std::fs::read_dir(&model_dir)
            .map_err(|e| StreamError::ModelLoad(format!("{}: {}: {}", uri, model_dir.display(), e)))?;
        let latest = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .filter_map(|e| e.file_name().to_str().and_then(|n| n.parse::<u64>().ok()))
            .max()
            .ok_or_else(|| StreamError::ModelLoad(format!("{}: no numeric versions", uri)))?;
        Ok(model_dir.join(latest.to_string()))
    }

    pub fn load(&self, uri: &str) -> Result<LoadedModel> {
        let uri = ModelUri::parse(uri)?;
        let dir = self.resolve_dir(&uri)?;
        let manifest = read_manifest(&dir.join(MANIFEST))?;
        let artifact = dir.join(&manifest.artifact);
        let dim = manifest.features.len();

        let scorer: Box<dyn Scorer> = match manifest.flavor {
            Flavor::IsolationForest => Box::new(IsolationForest::load(&artifact)?),
            Flavor::Onnx => Box::new(OnnxScorer::load(
                &artifact,
                dim,
                &manifest.label_output,
                &manifest.score_output,
            )?),
        };
        let model = LoadedModel::new(uri, manifest.features, manifest.encodings, manifest.scaler, scorer)?;
        info!(
            uri = %model.uri,
            version_dir = %dir.display(),
            flavor = model.scorer.flavor(),
            features = dim,
            "model loaded"
        );
        Ok(model)
    }
}

fn read_manifest(path: &Path) -> Result<Manifest> {
    let data = std::fs::read_to_string(path)
        .map_err(|e| StreamError::ModelLoad(format!("{}: {}", path.display(), e)))?;
    serde_json::from_str(&data).map_err(|e| StreamError::ModelLoad(format!("{}: {}", path.display(), e)))
}

/// Scorer plus the frozen preprocessing it was trained with. Shared read-only.
pub struct LoadedModel {
    pub uri: ModelUri,
    pub schema: Vec<String>,
    pub encodings: Encodings,
    pub scaler: Scaler,
    pub scorer: Box<dyn Scorer>,
}

impl LoadedModel {
    /// Checks that schema, scaler and scorer agree on width, and that every
    /// schema name is a known feature.
    pub fn new(
        uri: ModelUri,
        schema: Vec<String>,
        encodings: Encodings,
        scaler: ScalerParams,
        scorer: Box<dyn Scorer>,
    ) -> Result<Self> {
        if schema.is_empty() {
            return Err(StreamError::ModelLoad(format!("{}: empty feature schema", uri)));
        }
        let scaler = Scaler::new(scaler)?;
        if scaler.dim() != schema.len() {
            return Err(StreamError::ModelLoad(format!(
                "{}: scaler has {} columns, schema has {}",
                uri,
                scaler.dim(),
                schema.len()
            )));
        }
        if let Some(d) = scorer.input_dim() {
            if d != schema.len() {
                return Err(StreamError::ModelLoad(format!(
                    "{}: model expects {} features, schema has {}",
                    uri,
                    d,
                    schema.len()
                )));
            }
        }
        for name in &schema {
            Feature::resolve(name, &encodings)?;
        }
        Ok(Self {
            uri,
            schema,
            encodings,
            scaler,
            scorer,
        })
    }

    pub fn extractor(&self, config: FeaturesConfig) -> Result<FeatureExtractor> {
        FeatureExtractor::new(&self.schema, &self.encodings, config)
    }

    /// Extract, scale and score one event. Returns the unscaled vector with the score.
    pub fn classify(&self, extractor: &FeatureExtractor, event: &RawEvent) -> Result<(FeatureVector, Score)> {
        let raw = extractor.extract(event)?;
        let scaled = self.scaler.transform(&raw)?;
        let score = self.scorer.score(&scaled)?;
        Ok((raw, score))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::forest::tests::toy_forest;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    #[test]
    fn parses_registry_uris() {
        let uri = ModelUri::parse("models:/IsolationForestModel/1").unwrap();
        assert_eq!(uri.name, "IsolationForestModel");
        assert_eq!(uri.version, "1");
        assert_eq!(uri.to_string(), "models:/IsolationForestModel/1");
        assert!(ModelUri::parse("models:/IsolationForestModel/latest").unwrap().is_latest());

        for bad in ["runs:/abc/model", "models:/", "models:/Name", "models:/Name/1/extra", "Name/1"] {
            assert!(ModelUri::parse(bad).is_err(), "{}", bad);
        }
    }

    fn write_version(root: &Path, version: &str, features: &[&str]) {
        let dir = root.join("Forest").join(version);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("forest.json"), serde_json::to_string(&toy_forest()).unwrap()).unwrap();
        let manifest = json!({
            "flavor": "isolation_forest",
            "artifact": "forest.json",
            "features": features,
            "scaler": {"mean": vec![0.0; features.len()], "scale": vec![1.0; features.len()]},
        });
        std::fs::write(dir.join(MANIFEST), manifest.to_string()).unwrap();
    }

    #[test]
    fn latest_resolves_to_highest_numeric_version() {
        let tmp = tempfile::tempdir().unwrap();
        write_version(tmp.path(), "2", &["hour"]);
        write_version(tmp.path(), "10", &["hour"]);
        std::fs::create_dir_all(tmp.path().join("Forest").join("staging")).unwrap();

        let registry = ModelRegistry::new(tmp.path());
        let dir = registry
            .resolve_dir(&ModelUri::parse("models:/Forest/latest").unwrap())
            .unwrap();
        assert_eq!(dir, tmp.path().join("Forest").join("10"));
    }

    #[test]
    fn loads_and_classifies() {
        let tmp = tempfile::tempdir().unwrap();
        write_version(tmp.path(), "1", &["hour"]);
        let model = ModelRegistry::new(tmp.path()).load("models:/Forest/1").unwrap();
        assert_eq!(model.scorer.flavor(), "isolation_forest");

        let extractor = model.extractor(FeaturesConfig::default()).unwrap();
        let event = RawEvent::new(
            "e-1",
            Utc.with_ymd_and_hms(2024, 1, 8, 3, 0, 0).unwrap(),
            json!({"eventTime": "2024-01-08T03:00:00Z"}),
        );
        let (raw, score) = model.classify(&extractor, &event).unwrap();
        assert_eq!(raw.values, vec![3.0]);
        assert!(!score.label.is_anomaly());
    }

    #[test]
    fn width_disagreement_fails_to_load() {
        let tmp = tempfile::tempdir().unwrap();
        write_version(tmp.path(), "1", &["hour", "isNight"]);
        let err = ModelRegistry::new(tmp.path()).load("models:/Forest/1").err().unwrap();
        assert!(matches!(err, StreamError::ModelLoad(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn unknown_feature_or_missing_version_fails_to_load() {
        let tmp = tempfile::tempdir().unwrap();
        write_version(tmp.path(), "1", &["no_such_feature"]);
        let registry = ModelRegistry::new(tmp.path());
        assert!(matches!(registry.load("models:/Forest/1"), Err(StreamError::ModelLoad(_))));
        assert!(matches!(registry.load("models:/Forest/7"), Err(StreamError::ModelLoad(_))));
    }
}
