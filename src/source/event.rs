//! Raw CloudTrail event: envelope identity plus the parsed `CloudTrailEvent` detail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    pub event_id: String,
    /// Envelope time, used for ordering and the high-water mark
    pub event_time: DateTime<Utc>,
    /// Parsed detail record; `Null` when the source payload was not valid JSON
    pub detail: Value,
}

impl RawEvent {
    pub fn new(event_id: impl Into<String>, event_time: DateTime<Utc>, detail: Value) -> Self {
        Self {
            event_id: event_id.into(),
            event_time,
            detail,
        }
    }

    /// Walk a key path through nested objects.
    pub fn field(&self, path: &[&str]) -> Option<&Value> {
        path.iter()
            .try_fold(&self.detail, |v, key| v.get(key))
            .filter(|v| !v.is_null())
    }

    fn str_field(&self, path: &[&str]) -> Option<&str> {
        self.field(path).and_then(Value::as_str)
    }

    pub fn detail_time(&self) -> Option<&str> {
        self.str_field(&["eventTime"])
    }

    pub fn event_name(&self) -> Option<&str> {
        self.str_field(&["eventName"])
    }

    pub fn event_source(&self) -> Option<&str> {
        self.str_field(&["eventSource"])
    }

    pub fn event_type(&self) -> Option<&str> {
        self.str_field(&["eventType"])
    }

    pub fn username(&self) -> Option<&str> {
        self.str_field(&["userIdentity", "userName"])
    }

    /// Simplified principal as used in training: ARN, else user name, else principal id.
    pub fn principal(&self) -> &str {
        ["arn", "userName", "principalId"]
            .iter()
            .find_map(|k| self.str_field(&["userIdentity", *k]))
            .unwrap_or("unknownUser")
    }

    pub fn source_ip(&self) -> Option<&str> {
        self.str_field(&["sourceIPAddress"])
    }

    pub fn region(&self) -> Option<&str> {
        self.str_field(&["awsRegion"])
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.str_field(&["userAgent"])
    }

    pub fn error_code(&self) -> Option<&str> {
        self.str_field(&["errorCode"])
    }

    /// `mfaAuthenticated` from the session context; CloudTrail writes it as a string.
    pub fn mfa_authenticated(&self) -> Option<bool> {
        self.field(&["userIdentity", "sessionContext", "attributes", "mfaAuthenticated"])
            .and_then(as_flag)
    }

    pub fn read_only(&self) -> Option<bool> {
        self.field(&["readOnly"]).and_then(as_flag)
    }

    pub fn request_parameters(&self) -> Option<&Value> {
        self.field(&["requestParameters"])
    }
}

fn as_flag(v: &Value) -> Option<bool> {
    match v {
        Value::Bool(b) => Some(*b),
        Value::String(s) if s.eq_ignore_ascii_case("true") => Some(true),
        Value::String(s) if s.eq_ignore_ascii_case("false") => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use chrono::TimeZone;

    fn sample() -> RawEvent {
        RawEvent::new(
            "e-1",
            Utc.with_ymd_and_hms(2024, 1, 6, 2, 0, 0).unwrap(),
            json!({
                "eventID": "e-1",
                "eventTime": "2024-01-06T02:00:00Z",
                "eventName": "ConsoleLogin",
                "userIdentity": {
                    "type": "IAMUser",
                    "principalId": "AIDA123",
                    "userName": "alice",
                    "sessionContext": {"attributes": {"mfaAuthenticated": "true"}}
                },
                "readOnly": false,
                "requestParameters": null
            }),
        )
    }

    #[test]
    fn detail_time_is_read_from_the_record() {
        let ev = sample();
        assert_eq!(ev.detail_time(), Some("2024-01-06T02:00:00Z"));
        assert_eq!(ev.event_name(), Some("ConsoleLogin"));
    }

    #[test]
    fn accessors_treat_null_as_absent() {
        let ev = sample();
        assert_eq!(ev.username(), Some("alice"));
        assert_eq!(ev.principal(), "alice");
        assert_eq!(ev.mfa_authenticated(), Some(true));
        assert_eq!(ev.read_only(), Some(false));
        assert!(ev.request_parameters().is_none());
        assert!(ev.error_code().is_none());
    }

    #[test]
    fn principal_falls_back_to_unknown() {
        let ev = RawEvent::new("x", Utc::now(), json!({"eventName": "X"}));
        assert_eq!(ev.principal(), "unknownUser");
    }
}
