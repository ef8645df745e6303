//! Static responses and static errors

use super::{Handler, Next};
use crate::context::RequestContext;
use crate::error::{HandlerError, Result};
use async_trait::async_trait;
use http::header::{HeaderName, HeaderValue};
use http::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A number, or a string that may hold placeholders
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WeakString {
    Number(u64),
    Text(String),
}

impl WeakString {
    pub(crate) fn template(&self) -> String {
        match self {
            WeakString::Number(n) => n.to_string(),
            WeakString::Text(s) => s.clone(),
        }
    }

    /// Expand and parse as a status code
    pub(crate) fn status(&self, ctx: &RequestContext) -> Option<StatusCode> {
        let expanded = ctx.expand(&self.template());
        expanded
            .trim()
            .parse::<u16>()
            .ok()
            .and_then(|code| StatusCode::from_u16(code).ok())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticResponseConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<WeakString>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub body: String,
}

/// Writes a fixed response and ends the chain
#[derive(Debug, Clone)]
pub struct StaticResponse {
    config: StaticResponseConfig,
}

impl StaticResponse {
    pub fn from_config(config: StaticResponseConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Handler for StaticResponse {
    async fn handle(&self, ctx: &mut RequestContext, _next: Next<'_>) -> Result<()> {
        let status = match &self.config.status_code {
            None => StatusCode::OK,
            Some(code) => code.status(ctx).ok_or_else(|| {
                HandlerError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("invalid status code '{}'", ctx.expand(&code.template())),
                )
            })?,
        };

        for (name, values) in &self.config.headers {
            let Ok(name) = HeaderName::from_bytes(ctx.expand(name).as_bytes()) else {
                tracing::warn!(header = %name, "Skipping invalid header name");
                continue;
            };
            for value in values {
                match HeaderValue::from_str(&ctx.expand(value)) {
                    Ok(value) => {
                        ctx.response.headers_mut().append(name.clone(), value);
                    }
                    Err(_) => tracing::warn!(header = %name, "Skipping invalid header value"),
                }
            }
        }

        let body = ctx.expand(&self.config.body);
        ctx.write_status(status);
        if !body.is_empty() {
            ctx.write_body(body.as_bytes());
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "static_response"
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticErrorConfig {
    /// Error message, for the logs
    #[serde(default)]
    pub error: String,
    /// Status code (default 500)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<WeakString>,
}

/// Fails the request with a handler error
#[derive(Debug, Clone)]
pub struct StaticError {
    config: StaticErrorConfig,
}

impl StaticError {
    pub fn from_config(config: StaticErrorConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Handler for StaticError {
    async fn handle(&self, ctx: &mut RequestContext, _next: Next<'_>) -> Result<()> {
        let status = self
            .config
            .status_code
            .as_ref()
            .map(|code| code.status(ctx).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR))
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let message = ctx.expand(&self.config.error);
        if message.is_empty() {
            return Err(HandlerError::status(status).into());
        }
        Err(HandlerError::new(status, message).into())
    }

    fn name(&self) -> &str {
        "error"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use bytes::Bytes;

    fn ctx() -> RequestContext {
        RequestContext::new(
            http::Request::builder()
                .uri("/missing?x=1")
                .body(Bytes::new())
                .unwrap(),
        )
    }

    fn decode<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> T {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_static_response_defaults() {
        let handler = StaticResponse::from_config(StaticResponseConfig::default());
        let mut c = ctx();
        handler.handle(&mut c, Next::empty()).await.unwrap();
        assert_eq!(c.response.status(), Some(StatusCode::OK));
        assert!(c.response.body().is_empty());
    }

    #[tokio::test]
    async fn test_static_response_full() {
        let handler = StaticResponse::from_config(decode(serde_json::json!({
            "status_code": 404,
            "headers": {"Content-Type": ["text/plain"], "X-Path": ["{http.request.uri.path}"]},
            "body": "no {http.request.uri.path}"
        })));
        let mut c = ctx();
        handler.handle(&mut c, Next::empty()).await.unwrap();
        assert_eq!(c.response.status(), Some(StatusCode::NOT_FOUND));
        assert_eq!(c.response.headers()["content-type"], "text/plain");
        assert_eq!(c.response.headers()["x-path"], "/missing");
        assert_eq!(c.response.body(), b"no /missing");
    }

    #[tokio::test]
    async fn test_static_response_placeholder_status() {
        let handler = StaticResponse::from_config(decode(serde_json::json!({
            "status_code": "{http.vars.code}"
        })));
        let mut c = ctx();
        c.vars.insert("code", "503");
        handler.handle(&mut c, Next::empty()).await.unwrap();
        assert_eq!(c.response.status(), Some(StatusCode::SERVICE_UNAVAILABLE));
    }

    #[tokio::test]
    async fn test_static_response_bad_status() {
        let handler = StaticResponse::from_config(decode(serde_json::json!({
            "status_code": "teapot"
        })));
        let mut c = ctx();
        let err = handler.handle(&mut c, Next::empty()).await.unwrap_err();
        assert_eq!(HandlerError::from(err).status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!c.response.is_committed());
    }

    #[tokio::test]
    async fn test_static_error() {
        let handler = StaticError::from_config(decode(serde_json::json!({
            "error": "gone: {http.request.uri.path}",
            "status_code": 410
        })));
        let err = handler.handle(&mut ctx(), Next::empty()).await.unwrap_err();
        match err {
            PipelineError::Handler(e) => {
                assert_eq!(e.status, StatusCode::GONE);
                assert_eq!(e.message(), "gone: /missing");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_static_error_status_parse_failure_is_500() {
        let handler = StaticError::from_config(decode(serde_json::json!({
            "status_code": "{http.vars.none}"
        })));
        let err = handler.handle(&mut ctx(), Next::empty()).await.unwrap_err();
        let err = HandlerError::from(err);
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.source.is_none());
    }
}
