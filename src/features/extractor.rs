//! Single-event feature extraction: raw event → schema-ordered vector.

use super::catalog::{Column, Feature};
use super::{Encodings, FeatureVector};
use crate::config::FeaturesConfig;
use crate::error::{Result, StreamError};
use crate::source::RawEvent;
use chrono::{DateTime, Datelike, Timelike, Utc};
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    names: Vec<String>,
    features: Vec<Feature>,
    config: FeaturesConfig,
}

/// Per-event values shared by several features.
struct Derived<'a> {
    time: Option<(u32, u32)>,
    error_code: Option<&'a str>,
    params: String,
    params_lower: String,
}

impl FeatureExtractor {
    /// Resolve every schema column up front so a bad schema fails at startup, not per event.
    pub fn new(schema: &[String], encodings: &Encodings, config: FeaturesConfig) -> Result<Self> {
        let features = schema
            .iter()
            .map(|name| Feature::resolve(name, encodings))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            names: schema.to_vec(),
            features,
            config,
        })
    }

    pub fn dim(&self) -> usize {
        self.features.len()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn extract(&self, event: &RawEvent) -> Result<FeatureVector> {
        if !event.detail.is_object() {
            return Err(StreamError::schema("detail", "event detail is not a JSON object"));
        }
        let derived = self.derive(event)?;
        let values = self
            .features
            .iter()
            .map(|f| self.value(f, event, &derived))
            .collect::<Result<Vec<f64>>>()?;
        Ok(FeatureVector::new(values))
    }

    fn derive<'a>(&self, event: &'a RawEvent) -> Result<Derived<'a>> {
        let time = if self.features.iter().any(Feature::needs_time) {
            let raw = event
                .detail_time()
                .ok_or_else(|| StreamError::schema("eventTime", "missing"))?;
            let t = DateTime::parse_from_rfc3339(raw)
                .map_err(|e| StreamError::schema("eventTime", format!("{:?}: {}", raw, e)))?
                .with_timezone(&Utc);
            Some((t.hour(), t.weekday().num_days_from_monday()))
        } else {
            None
        };

        let error_code = event
            .error_code()
            .map(str::trim)
            .filter(|c| !c.is_empty() && *c != "None");

        let params = match event.request_parameters() {
            Some(v) => serde_json::to_string(v).unwrap_or_else(|_| "{}".to_string()),
            None => "{}".to_string(),
        };
        let params_lower = params.to_lowercase();

        Ok(Derived {
            time,
            error_code,
            params,
            params_lower,
        })
    }

    fn value(&self, feature: &Feature, event: &RawEvent, d: &Derived<'_>) -> Result<f64> {
        let (hour, dow) = d.time.unwrap_or((0, 0));
        let v = match feature {
            Feature::Hour => hour as f64,
            Feature::DayOfWeek => dow as f64,
            Feature::IsWeekend => flag(self.config.weekend_days.contains(&dow)),
            Feature::IsNight => flag(
                hour < self.config.daytime_start_hour || hour >= self.config.daytime_end_hour,
            ),
            Feature::HasError => flag(d.error_code.is_some()),
            Feature::MfaPresent => flag(event.mfa_authenticated().unwrap_or(false)),
            Feature::HasRequestParams => flag(d.params != "{}"),
            Feature::ParamNumKeys => match event.request_parameters() {
                Some(Value::Object(m)) => m.len() as f64,
                _ => 0.0,
            },
            Feature::ParamLength => d.params.chars().count() as f64,
            Feature::ParamKeyword(kw) => flag(d.params_lower.contains(&kw.to_lowercase())),
            Feature::IsWriteOperation => flag(event.read_only() == Some(false)),
            Feature::IsAccessDenied => flag(d.error_code == Some("AccessDenied")),
            Feature::IsNoSuchBucket => flag(d.error_code == Some("NoSuchBucket")),
            Feature::IsUnauthorized => {
                flag(d.error_code.map_or(false, |c| c.contains("Unauthorized")))
            }
            Feature::Frequency { column, table } => match column.value(event) {
                Some(value) => table.get(value).copied().unwrap_or(0.0),
                None if column.is_required() => {
                    return Err(StreamError::schema(column.name(), "missing"))
                }
                None => 0.0,
            },
            Feature::EventTypeIs(expected) => flag(event.event_type() == Some(expected.as_str())),
            Feature::Constant(c) => *c,
        };
        Ok(v)
    }
}

fn flag(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn base_schema() -> Vec<String> {
        ["hour", "day_of_week", "isWeekend", "isNight", "hasError", "has_mfaAuthenticated"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn extractor(schema: &[String]) -> FeatureExtractor {
        let mut enc = Encodings::default();
        enc.frequency.insert(
            "eventName".into(),
            [("ConsoleLogin".to_string(), 0.25)].into(),
        );
        FeatureExtractor::new(schema, &enc, FeaturesConfig::default()).unwrap()
    }

    fn event(detail: Value) -> RawEvent {
        RawEvent::new("e-1", Utc.with_ymd_and_hms(2024, 1, 6, 2, 0, 0).unwrap(), detail)
    }

    #[test]
    fn saturday_night_error_without_mfa() {
        let ex = extractor(&base_schema());
        let fv = ex
            .extract(&event(json!({
                "eventTime": "2024-01-06T02:00:00Z",
                "eventName": "DeleteTrail",
                "errorCode": "AccessDenied",
                "userIdentity": {"userName": "mallory"}
            })))
            .unwrap();
        // hour, dow (Saturday = 5), weekend, night, error, mfa
        assert_eq!(fv.values, vec![2.0, 5.0, 1.0, 1.0, 1.0, 0.0]);
    }

    #[test]
    fn weekday_daytime_with_mfa() {
        let ex = extractor(&base_schema());
        let fv = ex
            .extract(&event(json!({
                "eventTime": "2024-01-08T14:30:00Z",
                "eventName": "GetObject",
                "errorCode": "",
                "userIdentity": {"sessionContext": {"attributes": {"mfaAuthenticated": "true"}}}
            })))
            .unwrap();
        assert_eq!(fv.values, vec![14.0, 0.0, 0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn same_event_same_vector() {
        let ex = extractor(&base_schema());
        let detail = json!({"eventTime": "2024-03-02T23:59:59Z", "eventName": "X"});
        let a = ex.extract(&event(detail.clone())).unwrap();
        let b = ex.extract(&event(detail)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn request_parameter_features() {
        let schema: Vec<String> = [
            "hasRequestParams",
            "paramNumKeys",
            "paramLength",
            "hasBucket",
            "hasRole",
            "isWriteOperation",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let ex = extractor(&schema);
        let fv = ex
            .extract(&event(json!({
                "eventName": "PutBucketPolicy",
                "readOnly": false,
                "requestParameters": {"bucketName": "logs"}
            })))
            .unwrap();
        let params_len = r#"{"bucketName":"logs"}"#.len() as f64;
        assert_eq!(fv.values, vec![1.0, 1.0, params_len, 1.0, 0.0, 1.0]);

        let empty = ex.extract(&event(json!({"eventName": "X"}))).unwrap();
        assert_eq!(empty.values, vec![0.0, 0.0, 2.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn frequency_encoding_defaults_to_zero_for_unseen_values() {
        let schema = vec!["eventName_freq".to_string()];
        let ex = extractor(&schema);
        let seen = ex.extract(&event(json!({"eventName": "ConsoleLogin"}))).unwrap();
        let unseen = ex.extract(&event(json!({"eventName": "CreateUser"}))).unwrap();
        assert_eq!(seen.values, vec![0.25]);
        assert_eq!(unseen.values, vec![0.0]);
    }

    #[test]
    fn missing_required_fields_are_schema_mismatches() {
        let ex = extractor(&base_schema());
        let err = ex.extract(&event(json!({"eventName": "X"}))).unwrap_err();
        assert!(matches!(err, StreamError::SchemaMismatch { ref field, .. } if field == "eventTime"));

        let err = ex.extract(&event(Value::Null)).unwrap_err();
        assert!(matches!(err, StreamError::SchemaMismatch { ref field, .. } if field == "detail"));

        let freq = extractor(&["eventName_freq".to_string()]);
        let err = freq.extract(&event(json!({"eventSource": "s3"}))).unwrap_err();
        assert!(matches!(err, StreamError::SchemaMismatch { ref field, .. } if field == "eventName"));
    }
}
