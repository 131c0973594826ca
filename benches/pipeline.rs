//! Pipeline benchmark: raw CloudTrail event → features → scaled → scored.

use chrono::{TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;
use std::collections::HashMap;
use trailwatch::config::FeaturesConfig;
use trailwatch::features::{Encodings, FeatureExtractor, ScalerParams};
use trailwatch::model::{IsolationForest, LoadedModel, ModelUri, Tree};
use trailwatch::source::RawEvent;

const SCHEMA: &[&str] = &[
    "hour",
    "day_of_week",
    "isWeekend",
    "isNight",
    "hasError",
    "has_mfaAuthenticated",
    "hasRequestParams",
    "paramLength",
    "hasRole",
    "eventName_freq",
    "userIdentitySimple_freq",
    "eventType_AwsApiCall",
];

fn encodings() -> Encodings {
    let mut enc = Encodings::default();
    let names: HashMap<String, f64> = (0..200).map(|i| (format!("Api{}", i), 0.005)).collect();
    enc.frequency.insert("eventName".into(), names);
    enc.frequency.insert(
        "userIdentitySimple".into(),
        [("arn:aws:iam::123456789012:user/alice".to_string(), 0.4)].into(),
    );
    enc
}

fn make_events(n: usize) -> Vec<RawEvent> {
    let t = Utc.with_ymd_and_hms(2024, 1, 6, 2, 0, 0).unwrap();
    (0..n)
        .map(|i| {
            RawEvent::new(
                format!("ev-{}", i),
                t,
                json!({
                    "eventTime": "2024-01-06T02:00:00Z",
                    "eventName": format!("Api{}", i % 250),
                    "eventSource": "iam.amazonaws.com",
                    "eventType": "AwsApiCall",
                    "errorCode": if i % 7 == 0 { "AccessDenied" } else { "" },
                    "userIdentity": {"arn": "arn:aws:iam::123456789012:user/alice"},
                    "requestParameters": {"roleName": format!("role-{}", i), "maxItems": 100}
                }),
            )
        })
        .collect()
}

fn bench_feature_extraction(c: &mut Criterion) {
    let schema: Vec<String> = SCHEMA.iter().map(|s| s.to_string()).collect();
    let extractor = FeatureExtractor::new(&schema, &encodings(), FeaturesConfig::default()).unwrap();
    let events = make_events(100);

    c.bench_function("feature_extract_100_events", |b| {
        b.iter(|| {
            for ev in black_box(&events) {
                black_box(extractor.extract(ev).unwrap());
            }
        })
    });
}

fn bench_classify(c: &mut Criterion) {
    let dim = SCHEMA.len();
    let tree = Tree {
        children_left: vec![1, -1, -1],
        children_right: vec![2, -1, -1],
        feature: vec![0, -2, -2],
        threshold: vec![6.5, -2.0, -2.0],
        n_node_samples: vec![256.0, 200.0, 56.0],
        features: None,
    };
    let forest = IsolationForest {
        n_features: dim,
        max_samples: 256.0,
        offset: -0.5,
        trees: vec![tree; 100],
    };
    let model = LoadedModel::new(
        ModelUri::parse("models:/Bench/1").unwrap(),
        SCHEMA.iter().map(|s| s.to_string()).collect(),
        encodings(),
        ScalerParams {
            mean: vec![0.5; dim],
            scale: vec![2.0; dim],
        },
        Box::new(forest),
    )
    .unwrap();
    let extractor = model.extractor(FeaturesConfig::default()).unwrap();
    let events = make_events(100);

    c.bench_function("classify_100_events", |b| {
        b.iter(|| {
            for ev in black_box(&events) {
                black_box(model.classify(&extractor, ev).unwrap());
            }
        })
    });
}

criterion_group!(benches, bench_feature_extraction, bench_classify);
criterion_main!(benches);
