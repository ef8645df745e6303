//! Per-request state threaded through the handler chain

use bytes::Bytes;
use http::{Request, StatusCode};
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::error::HandlerError;
use crate::middleware::headers::RespHeaderOps;
use crate::observability::ExtraLogFields;
use crate::proxy::UpstreamResponse;
use crate::replacer::{PlaceholderReplacer, Replacer};
use crate::response::ResponseBuffer;

/// Var that, when `true`, omits the request from access logs
pub const LOG_SKIP_VAR: &str = "log_skip";

/// Per-request variables
#[derive(Debug, Clone, Default)]
pub struct Vars(HashMap<String, Value>);

impl Vars {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// String form of a var; missing vars are the empty string
    pub fn get_str(&self, key: &str) -> String {
        match self.0.get(key) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// Whether the request is excluded from access logs
    pub fn log_skip(&self) -> bool {
        match self.0.get(LOG_SKIP_VAR) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s == "true",
            _ => false,
        }
    }
}

/// A handler error as seen by error routes
#[derive(Debug, Clone)]
pub struct ErrorInfo {
    pub status: StatusCode,
    pub id: String,
    pub message: String,
    pub trace: String,
}

impl From<&HandlerError> for ErrorInfo {
    fn from(err: &HandlerError) -> Self {
        Self {
            status: err.status,
            id: err.id.clone(),
            message: err.message(),
            trace: err.trace.clone(),
        }
    }
}

/// Everything one request owns while it moves through the pipeline.
///
/// The request head is mutable so handlers can rewrite headers before they
/// reach an upstream. The response is written through [`write_status`] and
/// [`write_body`], which fire deferred header hooks at commit.
///
/// [`write_status`]: RequestContext::write_status
/// [`write_body`]: RequestContext::write_body
pub struct RequestContext {
    pub request: http::request::Parts,
    pub body: Bytes,
    pub remote_addr: Option<SocketAddr>,
    pub vars: Vars,
    pub log_fields: ExtraLogFields,
    /// Upstream response under interception
    pub upstream: Option<UpstreamResponse>,
    /// Error being handled by error routes
    pub error: Option<ErrorInfo>,
    pub response: ResponseBuffer,
    replacer: Arc<dyn Replacer>,
}

impl RequestContext {
    pub fn new(request: Request<Bytes>) -> Self {
        let (parts, body) = request.into_parts();
        Self {
            request: parts,
            body,
            remote_addr: None,
            vars: Vars::default(),
            log_fields: ExtraLogFields::new(),
            upstream: None,
            error: None,
            response: ResponseBuffer::new(),
            replacer: Arc::new(PlaceholderReplacer),
        }
    }

    pub fn with_replacer(mut self, replacer: Arc<dyn Replacer>) -> Self {
        self.replacer = replacer;
        self
    }

    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    /// Host header, or the URI authority for absolute-form requests
    pub fn host(&self) -> Option<&str> {
        self.request
            .headers
            .get(http::header::HOST)
            .and_then(|v| v.to_str().ok())
            .or_else(|| self.request.uri.authority().map(|a| a.as_str()))
    }

    /// Expand placeholders in `template`
    pub fn expand(&self, template: &str) -> String {
        self.replacer.replace_all(template, self)
    }

    /// Commit the response status.
    ///
    /// Pending deferred header hooks fire first, innermost first, each only
    /// if its `require` matcher accepts the status and current headers. A
    /// second call is a no-op.
    pub fn write_status(&mut self, status: StatusCode) {
        if self.response.is_committed() {
            tracing::debug!(
                status = status.as_u16(),
                committed = ?self.response.status(),
                "Ignoring status write on committed response"
            );
            return;
        }

        let hooks = self.response.take_deferred();
        for hook in hooks.iter().rev() {
            if let Some(require) = &hook.require {
                if !require.matches(status, self.response.headers()) {
                    continue;
                }
            }
            let resolved = hook.ops.resolve(self);
            resolved.apply(self.response.headers_mut());
        }

        self.response.commit(status);
    }

    /// Append to the response body, committing 200 first if needed
    pub fn write_body(&mut self, chunk: &[u8]) {
        if !self.response.is_committed() {
            self.write_status(StatusCode::OK);
        }
        self.response.append_body(chunk);
    }

    /// Install a header hook that fires at commit. Returns a mark for
    /// [`cancel_deferred`](RequestContext::cancel_deferred).
    pub fn defer_header_ops(&mut self, ops: Arc<RespHeaderOps>) -> usize {
        self.response.push_deferred(ops)
    }

    /// Drop hooks installed at or after `mark`
    pub fn cancel_deferred(&mut self, mark: usize) {
        self.response.truncate_deferred(mark);
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("method", &self.request.method)
            .field("uri", &self.request.uri)
            .field("remote_addr", &self.remote_addr)
            .field("vars", &self.vars)
            .field("committed", &self.response.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Upper;

    impl Replacer for Upper {
        fn replace_all(&self, template: &str, _ctx: &RequestContext) -> String {
            template.to_uppercase()
        }
    }

    fn ctx() -> RequestContext {
        RequestContext::new(Request::builder().uri("/").body(Bytes::new()).unwrap())
    }

    #[test]
    fn test_vars_get_str() {
        let mut vars = Vars::default();
        vars.insert("s", "text");
        vars.insert("n", 42);
        vars.insert("b", true);
        vars.insert("null", Value::Null);
        assert_eq!(vars.get_str("s"), "text");
        assert_eq!(vars.get_str("n"), "42");
        assert_eq!(vars.get_str("b"), "true");
        assert_eq!(vars.get_str("null"), "");
        assert_eq!(vars.get_str("missing"), "");
    }

    #[test]
    fn test_vars_log_skip() {
        let mut vars = Vars::default();
        assert!(!vars.log_skip());
        vars.insert(LOG_SKIP_VAR, true);
        assert!(vars.log_skip());
        vars.insert(LOG_SKIP_VAR, "true");
        assert!(vars.log_skip());
        vars.insert(LOG_SKIP_VAR, "no");
        assert!(!vars.log_skip());
        vars.remove(LOG_SKIP_VAR);
        assert!(!vars.log_skip());
    }

    #[test]
    fn test_host_from_header_or_authority() {
        let c = RequestContext::new(
            Request::builder()
                .uri("/")
                .header("Host", "a.com")
                .body(Bytes::new())
                .unwrap(),
        );
        assert_eq!(c.host(), Some("a.com"));

        let c = RequestContext::new(
            Request::builder()
                .uri("http://b.com:81/x")
                .body(Bytes::new())
                .unwrap(),
        );
        assert_eq!(c.host(), Some("b.com:81"));

        assert_eq!(ctx().host(), None);
    }

    #[test]
    fn test_custom_replacer() {
        let c = ctx().with_replacer(Arc::new(Upper));
        assert_eq!(c.expand("abc"), "ABC");
    }

    #[test]
    fn test_write_status_once() {
        let mut c = ctx();
        c.write_status(StatusCode::ACCEPTED);
        c.write_status(StatusCode::NOT_FOUND);
        assert_eq!(c.response.status(), Some(StatusCode::ACCEPTED));
    }

    #[test]
    fn test_write_body_implies_ok() {
        let mut c = ctx();
        c.write_body(b"hello");
        c.write_body(b" world");
        assert_eq!(c.response.status(), Some(StatusCode::OK));
        assert_eq!(c.response.body(), b"hello world");
    }

    #[test]
    fn test_error_info_from_handler_error() {
        let err = HandlerError::new(StatusCode::BAD_GATEWAY, "upstream down");
        let info = ErrorInfo::from(&err);
        assert_eq!(info.status, StatusCode::BAD_GATEWAY);
        assert_eq!(info.id, err.id);
        assert_eq!(info.message, "upstream down");
        assert_eq!(info.trace, err.trace);
    }
}
