//! Known training columns and how each is derived from a raw event.

use super::Encodings;
use crate::error::{Result, StreamError};
use crate::source::RawEvent;
use std::collections::HashMap;

/// Categorical columns that carry a frequency encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    UserIdentitySimple,
    EventName,
    EventSource,
    UserAgent,
    AwsRegion,
    SourceIpAddress,
}

impl Column {
    pub const ALL: [Column; 6] = [
        Column::UserIdentitySimple,
        Column::EventName,
        Column::EventSource,
        Column::UserAgent,
        Column::AwsRegion,
        Column::SourceIpAddress,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Column::UserIdentitySimple => "userIdentitySimple",
            Column::EventName => "eventName",
            Column::EventSource => "eventSource",
            Column::UserAgent => "userAgent",
            Column::AwsRegion => "awsRegion",
            Column::SourceIpAddress => "sourceIPAddress",
        }
    }

    /// Value as seen by the training pipeline; `None` when the field is absent.
    pub fn value<'a>(&self, event: &'a RawEvent) -> Option<&'a str> {
        match self {
            Column::UserIdentitySimple => Some(event.principal()),
            Column::EventName => event.event_name(),
            Column::EventSource => event.event_source(),
            Column::UserAgent => event.user_agent().or(Some("Unknown")),
            Column::AwsRegion => event.region(),
            Column::SourceIpAddress => event.source_ip(),
        }
    }

    /// Columns the training data always had; absence means the record is malformed.
    pub fn is_required(&self) -> bool {
        matches!(self, Column::EventName | Column::EventSource)
    }
}

/// Request-parameter keyword flags: (feature name, keyword).
pub const PARAM_KEYWORDS: [(&str, &str); 7] = [
    ("hasRole", "role"),
    ("hasPolicy", "policy"),
    ("hasAccessKey", "accessKey"),
    ("hasUser", "userName"),
    ("hasBucket", "bucket"),
    ("hasSecurityGroup", "securityGroup"),
    ("hasInstance", "instanceId"),
];

#[derive(Debug, Clone, PartialEq)]
pub enum Feature {
    Hour,
    DayOfWeek,
    IsWeekend,
    IsNight,
    HasError,
    MfaPresent,
    HasRequestParams,
    ParamNumKeys,
    ParamLength,
    ParamKeyword(&'static str),
    IsWriteOperation,
    IsAccessDenied,
    IsNoSuchBucket,
    IsUnauthorized,
    Frequency {
        column: Column,
        table: HashMap<String, f64>,
    },
    EventTypeIs(String),
    Constant(f64),
}

impl Feature {
    /// Resolve a schema column name. Unknown names cannot be computed and fail model loading.
    pub fn resolve(name: &str, encodings: &Encodings) -> Result<Self> {
        if let Some(v) = encodings.imputed.get(name) {
            return Ok(Feature::Constant(*v));
        }
        let feature = match name {
            "hour" => Feature::Hour,
            "day_of_week" => Feature::DayOfWeek,
            "isWeekend" => Feature::IsWeekend,
            "isNight" => Feature::IsNight,
            "hasError" => Feature::HasError,
            "has_mfaAuthenticated" => Feature::MfaPresent,
            "hasRequestParams" => Feature::HasRequestParams,
            "paramNumKeys" => Feature::ParamNumKeys,
            "paramLength" => Feature::ParamLength,
            "isWriteOperation" => Feature::IsWriteOperation,
            "isAccessDenied" => Feature::IsAccessDenied,
            "isNoSuchBucket" => Feature::IsNoSuchBucket,
            "isUnauthorized" => Feature::IsUnauthorized,
            _ => {
                if let Some((_, kw)) = PARAM_KEYWORDS.iter().find(|(n, _)| *n == name) {
                    Feature::ParamKeyword(*kw)
                } else if let Some(value) = name.strip_prefix("eventType_") {
                    Feature::EventTypeIs(value.to_string())
                } else if let Some(col) = name.strip_suffix("_freq") {
                    let column = Column::ALL
                        .iter()
                        .copied()
                        .find(|c| c.name() == col)
                        .ok_or_else(|| unknown(name))?;
                    let table = encodings.frequency.get(col).cloned().ok_or_else(|| {
                        StreamError::ModelLoad(format!("no frequency table for `{}`", col))
                    })?;
                    Feature::Frequency { column, table }
                } else {
                    return Err(unknown(name));
                }
            }
        };
        Ok(feature)
    }

    pub fn needs_time(&self) -> bool {
        matches!(
            self,
            Feature::Hour | Feature::DayOfWeek | Feature::IsWeekend | Feature::IsNight
        )
    }
}

fn unknown(name: &str) -> StreamError {
    StreamError::ModelLoad(format!("feature `{}` has no inference-time derivation", name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_catalog_names() {
        let mut enc = Encodings::default();
        enc.frequency
            .insert("eventName".into(), [("ConsoleLogin".to_string(), 0.2)].into());
        enc.imputed.insert("timeSinceLastEvent".into(), 42.0);

        assert_eq!(Feature::resolve("hour", &enc).unwrap(), Feature::Hour);
        assert_eq!(
            Feature::resolve("hasBucket", &enc).unwrap(),
            Feature::ParamKeyword("bucket")
        );
        assert_eq!(
            Feature::resolve("eventType_AwsConsoleSignIn", &enc).unwrap(),
            Feature::EventTypeIs("AwsConsoleSignIn".into())
        );
        assert_eq!(
            Feature::resolve("timeSinceLastEvent", &enc).unwrap(),
            Feature::Constant(42.0)
        );
        assert!(matches!(
            Feature::resolve("eventName_freq", &enc).unwrap(),
            Feature::Frequency { column: Column::EventName, .. }
        ));
    }

    #[test]
    fn unknown_or_unencoded_columns_fail() {
        let enc = Encodings::default();
        assert!(matches!(
            Feature::resolve("bytesTransferred", &enc),
            Err(StreamError::ModelLoad(_))
        ));
        assert!(matches!(
            Feature::resolve("awsRegion_freq", &enc),
            Err(StreamError::ModelLoad(_))
        ));
    }
}
