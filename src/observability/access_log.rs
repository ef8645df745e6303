//! Structured access log — JSON-formatted request/response logging
//!
//! One entry per request and per logger the request's host routes to.
//! Extra fields added by handlers are merged into the record. An extra
//! field named like a built-in one is logged under an `extra_` prefix.

use super::ExtraLogFields;
use crate::context::RequestContext;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Request headers redacted unless credential logging is enabled
const CREDENTIAL_HEADERS: [&str; 4] = [
    "cookie",
    "set-cookie",
    "authorization",
    "proxy-authorization",
];

const REDACTED: &str = "REDACTED";

/// Top-level keys written by `AccessLogEntry` itself
const ENTRY_KEYS: [&str; 11] = [
    "timestamp",
    "logger",
    "client_ip",
    "method",
    "uri",
    "host",
    "proto",
    "status",
    "size",
    "duration_ms",
    "request_headers",
];

/// Copy extra fields, moving keys that clash with entry keys out of the way
fn merge_extra(fields: &ExtraLogFields) -> ExtraLogFields {
    let mut extra = ExtraLogFields::new();
    extra.extend(fields.iter().map(|field| {
        let mut field = field.clone();
        if ENTRY_KEYS.contains(&field.key.as_str()) {
            field.key = format!("extra_{}", field.key);
        }
        field
    }));
    extra
}

/// A single access log entry
#[derive(Debug, Clone, Serialize)]
pub struct AccessLogEntry {
    /// RFC 3339 timestamp
    pub timestamp: String,
    /// Logger this entry is written to
    pub logger: String,
    /// Client IP address
    pub client_ip: String,
    /// HTTP method
    pub method: String,
    /// Request URI (path and query)
    pub uri: String,
    /// Host header value
    pub host: Option<String>,
    /// Protocol version
    pub proto: String,
    /// HTTP status code
    pub status: u16,
    /// Response size in bytes
    pub size: u64,
    /// Request duration in milliseconds
    pub duration_ms: u64,
    /// Request headers, credentials redacted
    pub request_headers: BTreeMap<String, Vec<String>>,
    /// Fields added by handlers
    #[serde(flatten)]
    pub extra: ExtraLogFields,
}

/// Access log manager — tracks and emits structured log entries
pub struct AccessLog {
    total_entries: Arc<AtomicU64>,
}

impl AccessLog {
    /// Create a new access log manager
    pub fn new() -> Self {
        Self {
            total_entries: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Start tracking a request. Returns a RequestTracker to measure duration.
    pub fn start_request(&self) -> RequestTracker {
        RequestTracker {
            start: Instant::now(),
        }
    }

    /// Record and emit a log entry
    pub fn record(&self, entry: &AccessLogEntry) {
        self.total_entries.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            target: "access_log",
            logger = entry.logger,
            client_ip = entry.client_ip,
            method = entry.method,
            uri = entry.uri,
            status = entry.status,
            duration_ms = entry.duration_ms,
            size = entry.size,
            "{}",
            serde_json::to_string(entry).unwrap_or_default()
        );
    }

    /// Get total number of logged entries
    pub fn total_entries(&self) -> u64 {
        self.total_entries.load(Ordering::Relaxed)
    }
}

impl Default for AccessLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks request duration
pub struct RequestTracker {
    start: Instant,
}

impl RequestTracker {
    /// Get elapsed time in milliseconds since the request started
    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    /// Build an access log entry for `logger` from the finished request
    pub fn build_entry(
        &self,
        ctx: &RequestContext,
        logger: &str,
        log_credentials: bool,
    ) -> AccessLogEntry {
        let mut request_headers: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, value) in ctx.request.headers.iter() {
            let value = if !log_credentials && CREDENTIAL_HEADERS.contains(&name.as_str()) {
                REDACTED.to_string()
            } else {
                String::from_utf8_lossy(value.as_bytes()).into_owned()
            };
            request_headers
                .entry(name.as_str().to_string())
                .or_default()
                .push(value);
        }

        AccessLogEntry {
            timestamp: chrono::Utc::now().to_rfc3339(),
            logger: logger.to_string(),
            client_ip: ctx
                .remote_addr
                .map(|addr| addr.ip().to_string())
                .unwrap_or_default(),
            method: ctx.request.method.to_string(),
            uri: ctx
                .request
                .uri
                .path_and_query()
                .map(|pq| pq.as_str().to_string())
                .unwrap_or_else(|| "/".to_string()),
            host: ctx.host().map(str::to_string),
            proto: format!("{:?}", ctx.request.version),
            status: ctx.response.status().map(|s| s.as_u16()).unwrap_or(200),
            size: ctx.response.body().len() as u64,
            duration_ms: self.elapsed_ms(),
            request_headers,
            extra: merge_extra(&ctx.log_fields),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::StatusCode;

    fn ctx() -> RequestContext {
        let mut ctx = RequestContext::new(
            http::Request::builder()
                .method("POST")
                .uri("/api/submit?x=1")
                .header("Host", "api.example.com")
                .header("Authorization", "Bearer secret")
                .header("Cookie", "a=1")
                .header("Accept", "text/html")
                .header("Accept", "application/json")
                .body(Bytes::new())
                .unwrap(),
        )
        .with_remote_addr("10.0.0.1:5000".parse().unwrap());
        ctx.write_status(StatusCode::CREATED);
        ctx.write_body(b"done");
        ctx.log_fields.set("upstream", "backend:8080");
        ctx
    }

    #[test]
    fn test_build_entry() {
        let log = AccessLog::new();
        let entry = log.start_request().build_entry(&ctx(), "main", false);
        assert_eq!(entry.logger, "main");
        assert_eq!(entry.client_ip, "10.0.0.1");
        assert_eq!(entry.method, "POST");
        assert_eq!(entry.uri, "/api/submit?x=1");
        assert_eq!(entry.host.as_deref(), Some("api.example.com"));
        assert_eq!(entry.status, 201);
        assert_eq!(entry.size, 4);
        assert!(!entry.timestamp.is_empty());
        assert_eq!(entry.request_headers["accept"].len(), 2);
    }

    #[test]
    fn test_credentials_redacted() {
        let entry = AccessLog::new().start_request().build_entry(&ctx(), "main", false);
        assert_eq!(entry.request_headers["authorization"], vec![REDACTED]);
        assert_eq!(entry.request_headers["cookie"], vec![REDACTED]);

        let entry = AccessLog::new().start_request().build_entry(&ctx(), "main", true);
        assert_eq!(entry.request_headers["authorization"], vec!["Bearer secret"]);
    }

    #[test]
    fn test_entry_serialization_merges_extra_fields() {
        let entry = AccessLog::new().start_request().build_entry(&ctx(), "main", false);
        let json: serde_json::Value = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["method"], "POST");
        assert_eq!(json["status"], 201);
        assert_eq!(json["upstream"], "backend:8080");
        assert!(json.get("extra").is_none());
    }

    #[test]
    fn test_extra_fields_do_not_shadow_entry_keys() {
        let mut c = ctx();
        c.log_fields.add("status", "from-handler");
        c.log_fields.add("uri", "/other");
        let entry = AccessLog::new().start_request().build_entry(&c, "main", false);
        let text = serde_json::to_string(&entry).unwrap();
        assert_eq!(text.matches("\"status\":").count(), 1);
        assert_eq!(text.matches("\"uri\":").count(), 1);

        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["status"], 201);
        assert_eq!(json["uri"], "/api/submit?x=1");
        assert_eq!(json["extra_status"], "from-handler");
        assert_eq!(json["extra_uri"], "/other");
        assert_eq!(json["upstream"], "backend:8080");
        assert_eq!(c.log_fields.get("status").unwrap(), "from-handler");
    }

    #[test]
    fn test_uncommitted_response_logs_200() {
        let c = RequestContext::new(
            http::Request::builder()
                .uri("/")
                .body(Bytes::new())
                .unwrap(),
        );
        let entry = AccessLog::new().start_request().build_entry(&c, "main", false);
        assert_eq!(entry.status, 200);
        assert_eq!(entry.client_ip, "");
    }

    #[test]
    fn test_access_log_total_entries() {
        let log = AccessLog::new();
        assert_eq!(log.total_entries(), 0);
        let entry = log.start_request().build_entry(&ctx(), "main", false);
        log.record(&entry);
        assert_eq!(log.total_entries(), 1);
        log.record(&entry);
        assert_eq!(log.total_entries(), 2);
    }

    #[test]
    fn test_request_tracker_elapsed() {
        let log = AccessLog::new();
        let tracker = log.start_request();
        std::thread::sleep(std::time::Duration::from_millis(10));
        let elapsed = tracker.elapsed_ms();
        assert!(elapsed >= 5); // Allow for timing imprecision
    }
}
