//! CloudTrail `LookupEvents` adapter over the JSON-RPC API, signed with SigV4.

use super::sigv4::{self, Credentials, RequestParts};
use super::{EventSource, RawEvent};
use crate::config::SourceConfig;
use crate::error::{Result, StreamError};
use chrono::{TimeZone, Utc};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info};

/// Largest page `LookupEvents` will return.
pub const LOOKUP_PAGE_LIMIT: usize = 50;

const SERVICE: &str = "cloudtrail";
const TARGET_PREFIX: &str = "com.amazonaws.cloudtrail.v20131101.CloudTrail_20131101.";
const CONTENT_TYPE: &str = "application/x-amz-json-1.1";

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct LookupEventsRequest<'a> {
    max_results: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_token: Option<&'a str>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LookupEventsResponse {
    #[serde(default)]
    events: Vec<LookupEvent>,
    next_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LookupEvent {
    event_id: String,
    /// Epoch seconds
    event_time: f64,
    cloud_trail_event: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct GetTrailRequest<'a> {
    name: &'a str,
}

#[derive(Deserialize, Default)]
struct AwsErrorBody {
    #[serde(rename = "__type", default)]
    kind: String,
    #[serde(alias = "Message", default)]
    message: String,
}

pub struct CloudTrailClient {
    client: reqwest::blocking::Client,
    endpoint: String,
    host: String,
    region: String,
    credentials: Credentials,
    verify_trail: bool,
    verified: Mutex<HashSet<String>>,
}

impl CloudTrailClient {
    pub fn new(config: &SourceConfig, credentials: Credentials) -> Result<Self> {
        let endpoint = config
            .endpoint
            .clone()
            .unwrap_or_else(|| format!("https://cloudtrail.{}.amazonaws.com", config.region));
        let url = reqwest::Url::parse(&endpoint)
            .map_err(|e| StreamError::Config(format!("bad CloudTrail endpoint {}: {}", endpoint, e)))?;
        let host = match (url.host_str(), url.port()) {
            (Some(h), Some(p)) => format!("{}:{}", h, p),
            (Some(h), None) => h.to_string(),
            (None, _) => {
                return Err(StreamError::Config(format!("endpoint {} has no host", endpoint)))
            }
        };
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| StreamError::Config(format!("http client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            host,
            region: config.region.clone(),
            credentials,
            verify_trail: config.verify_trail,
            verified: Mutex::new(HashSet::new()),
        })
    }

    fn call<Req: Serialize, Resp: DeserializeOwned>(
        &self,
        operation: &str,
        request: &Req,
    ) -> Result<Resp> {
        let body = serde_json::to_vec(request)
            .map_err(|e| StreamError::Rejected(format!("{}: encode request: {}", operation, e)))?;
        let target = format!("{}{}", TARGET_PREFIX, operation);
        let parts = RequestParts {
            method: "POST",
            path: "/",
            query: "",
            headers: &[
                ("content-type", CONTENT_TYPE),
                ("host", self.host.as_str()),
                ("x-amz-target", target.as_str()),
            ],
            payload: &body,
        };
        let signed = sigv4::sign(&self.credentials, &self.region, SERVICE, &parts, Utc::now());

        let mut req = self
            .client
            .post(format!("{}/", self.endpoint))
            .header("content-type", CONTENT_TYPE)
            .header("x-amz-target", &target);
        for (k, v) in signed {
            req = req.header(k, v);
        }
        let res = req.body(body).send().map_err(classify_transport)?;
        let status = res.status();
        let text = res.text().map_err(classify_transport)?;
        if !status.is_success() {
            return Err(classify_response(status, &text));
        }
        serde_json::from_str(&text)
            .map_err(|e| StreamError::Rejected(format!("{}: malformed response: {}", operation, e)))
    }

    /// Verify the trail exists once per client (idempotent).
    pub fn ensure_trail(&self, trail: &str) -> Result<()> {
        if !self.verify_trail {
            return Ok(());
        }
        {
            let verified = self.verified.lock().unwrap_or_else(|p| p.into_inner());
            if verified.contains(trail) {
                return Ok(());
            }
        }
        let _: Value = self.call("GetTrail", &GetTrailRequest { name: trail })?;
        info!(trail, region = %self.region, "trail verified");
        self.verified
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(trail.to_string());
        Ok(())
    }
}

impl EventSource for CloudTrailClient {
    fn fetch(&self, trail: &str, max_results: usize) -> Result<Vec<RawEvent>> {
        self.ensure_trail(trail)?;

        let mut out = Vec::with_capacity(max_results);
        let mut token: Option<String> = None;
        let mut pages = 0u32;
        while out.len() < max_results {
            let want = (max_results - out.len()).min(LOOKUP_PAGE_LIMIT);
            let page: LookupEventsResponse = self.call(
                "LookupEvents",
                &LookupEventsRequest {
                    max_results: want,
                    next_token: token.as_deref(),
                },
            )?;
            pages += 1;
            let empty = page.events.is_empty();
            out.extend(page.events.into_iter().take(want).filter_map(into_raw));
            match page.next_token {
                Some(t) if !t.is_empty() && !empty => token = Some(t),
                _ => break,
            }
        }
        debug!(trail, pages, count = out.len(), "lookup complete");
        Ok(out)
    }
}

fn into_raw(ev: LookupEvent) -> Option<RawEvent> {
    let event_time = Utc
        .timestamp_millis_opt((ev.event_time * 1000.0).round() as i64)
        .single()?;
    let detail = match ev.cloud_trail_event.as_deref().map(serde_json::from_str::<Value>) {
        Some(Ok(v)) => v,
        Some(Err(e)) => {
            debug!(event_id = %ev.event_id, error = %e, "CloudTrailEvent is not valid JSON");
            Value::Null
        }
        None => Value::Null,
    };
    Some(RawEvent::new(ev.event_id, event_time, detail))
}

fn classify_transport(e: reqwest::Error) -> StreamError {
    if e.is_builder() {
        StreamError::Rejected(e.to_string())
    } else {
        StreamError::TransientSource(e.to_string())
    }
}

const AUTH_FAULTS: &[&str] = &[
    "UnrecognizedClientException",
    "InvalidSignatureException",
    "AccessDeniedException",
    "ExpiredTokenException",
    "InvalidClientTokenId",
    "MissingAuthenticationTokenException",
    "IncompleteSignatureException",
    "NotAuthorizedException",
];

const NOT_FOUND_FAULTS: &[&str] = &["TrailNotFoundException", "InvalidTrailNameException"];

const THROTTLE_FAULTS: &[&str] = &[
    "ThrottlingException",
    "TooManyRequestsException",
    "RequestLimitExceeded",
    "ServiceUnavailableException",
    "InternalFailure",
];

/// Map an AWS JSON error response onto the error taxonomy.
fn classify_response(status: StatusCode, body: &str) -> StreamError {
    let parsed: AwsErrorBody = serde_json::from_str(body).unwrap_or_default();
    let code = parsed.kind.rsplit('#').next().unwrap_or("").to_string();
    let detail = if parsed.message.is_empty() {
        format!("{} {}", status, code)
    } else {
        format!("{} {}: {}", status, code, parsed.message)
    };

    if AUTH_FAULTS.contains(&code.as_str()) {
        StreamError::Authentication(detail)
    } else if NOT_FOUND_FAULTS.contains(&code.as_str()) {
        StreamError::ResourceNotFound(detail)
    } else if THROTTLE_FAULTS.contains(&code.as_str()) {
        StreamError::TransientSource(detail)
    } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        StreamError::Authentication(detail)
    } else if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        StreamError::TransientSource(detail)
    } else {
        StreamError::Rejected(detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_aws_faults() {
        let auth = classify_response(
            StatusCode::BAD_REQUEST,
            r#"{"__type":"com.amazonaws#UnrecognizedClientException","message":"bad token"}"#,
        );
        assert!(matches!(auth, StreamError::Authentication(_)));

        let missing = classify_response(
            StatusCode::BAD_REQUEST,
            r#"{"__type":"TrailNotFoundException","Message":"Unknown trail"}"#,
        );
        assert!(matches!(missing, StreamError::ResourceNotFound(ref m) if m.contains("Unknown trail")));

        let throttled = classify_response(
            StatusCode::BAD_REQUEST,
            r#"{"__type":"ThrottlingException"}"#,
        );
        assert!(throttled.is_retryable());

        assert!(classify_response(StatusCode::BAD_GATEWAY, "<html>").is_retryable());
        assert!(matches!(
            classify_response(StatusCode::FORBIDDEN, ""),
            StreamError::Authentication(_)
        ));
        assert!(matches!(
            classify_response(
                StatusCode::BAD_REQUEST,
                r#"{"__type":"InvalidNextTokenException"}"#
            ),
            StreamError::Rejected(_)
        ));
    }

    #[test]
    fn parses_lookup_page() {
        let body = r#"{
            "Events": [
                {"EventId": "b", "EventName": "ListBuckets", "EventTime": 1704506460.0,
                 "CloudTrailEvent": "{\"eventName\":\"ListBuckets\",\"eventTime\":\"2024-01-06T02:01:00Z\"}"},
                {"EventId": "a", "EventTime": 1704506400, "CloudTrailEvent": "not json"}
            ],
            "NextToken": "tok"
        }"#;
        let page: LookupEventsResponse = serde_json::from_str(body).unwrap();
        assert_eq!(page.next_token.as_deref(), Some("tok"));
        let events: Vec<RawEvent> = page.events.into_iter().filter_map(into_raw).collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_name(), Some("ListBuckets"));
        assert_eq!(events[0].event_time.to_rfc3339(), "2024-01-06T02:01:00+00:00");
        assert!(events[1].detail.is_null());
    }

    #[test]
    fn lookup_request_uses_aws_field_names() {
        let body = serde_json::to_value(LookupEventsRequest {
            max_results: 50,
            next_token: None,
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({"MaxResults": 50}));
    }

    #[test]
    fn endpoint_override_sets_signed_host() {
        let config = SourceConfig {
            endpoint: Some("http://localhost:4566".into()),
            ..SourceConfig::default()
        };
        let client = CloudTrailClient::new(&config, Credentials::new("a", "b", None)).unwrap();
        assert_eq!(client.host, "localhost:4566");
        assert_eq!(client.endpoint, "http://localhost:4566");
    }
}
