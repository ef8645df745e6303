//! Response interception — branch on an upstream response
//!
//! A reverse proxy may carry a list of response handlers. The first one
//! whose matcher accepts the upstream response (or that has no matcher)
//! takes over: its routes run with the upstream response stashed in
//! `ctx.upstream`, followed by the rest of the outer chain. The routes decide
//! whether the response reaches the client (`copy_response`) or the request
//! carries on (by not terminating).

use super::http_proxy::{is_hop_by_hop, UpstreamResponse};
use crate::config::{ResponseMatcherConfig, RouteConfig};
use crate::context::RequestContext;
use crate::error::{HandlerError, PipelineError, Result};
use crate::matcher::ResponseMatcher;
use crate::middleware::{Handler, HandlerRegistry, WeakString};
use crate::router::{Next, RouteList};
use async_trait::async_trait;
use http::header::HeaderName;
use http::{HeaderMap, StatusCode};
use serde::{Deserialize, Serialize};

/// One `handle_response` entry as configured
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseHandlerConfig {
    /// Response matcher; absent = matches any response
    #[serde(default, rename = "match", skip_serializing_if = "Option::is_none")]
    pub matcher: Option<ResponseMatcherConfig>,
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

/// A compiled `handle_response` entry
#[derive(Debug, Clone)]
pub struct ResponseHandler {
    pub matcher: Option<ResponseMatcher>,
    pub routes: RouteList,
}

impl ResponseHandler {
    pub fn compile(config: &ResponseHandlerConfig, registry: &HandlerRegistry) -> Result<Self> {
        let matcher = config
            .matcher
            .as_ref()
            .map(ResponseMatcher::compile)
            .transpose()
            .map_err(|e| e.at("match"))?;
        Ok(Self {
            matcher,
            routes: RouteList::compile(&config.routes, registry, "routes")?,
        })
    }

    pub fn matches(&self, status: StatusCode, headers: &HeaderMap) -> bool {
        self.matcher
            .as_ref()
            .map(|m| m.matches(status, headers))
            .unwrap_or(true)
    }
}

/// Write an upstream response to the client: headers (minus hop-by-hop),
/// then status, then body
pub(crate) fn copy_to_client(ctx: &mut RequestContext, resp: &UpstreamResponse) {
    let out = ctx.response.headers_mut();
    for (name, value) in resp.headers.iter() {
        if !is_hop_by_hop(name.as_str()) {
            out.append(name.clone(), value.clone());
        }
    }
    ctx.write_status(resp.status);
    if !resp.body.is_empty() {
        ctx.write_body(&resp.body);
    }
}

#[track_caller]
fn no_upstream(handler: &str) -> PipelineError {
    HandlerError::new(
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("{}: no upstream response to copy", handler),
    )
    .into()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CopyResponseConfig {
    /// Status to send instead of the upstream's
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<WeakString>,
}

/// Sends the intercepted response's status and body to the client; terminal
#[derive(Debug, Clone, Default)]
pub struct CopyResponse {
    status_code: Option<WeakString>,
}

impl CopyResponse {
    pub fn from_config(config: &CopyResponseConfig) -> Result<Self> {
        if let Some(WeakString::Number(n)) = &config.status_code {
            let valid = u16::try_from(*n)
                .ok()
                .and_then(|n| StatusCode::from_u16(n).ok())
                .is_some();
            if !valid {
                return Err(PipelineError::config(
                    "status_code",
                    format!("invalid status code {}", n),
                ));
            }
        }
        Ok(Self {
            status_code: config.status_code.clone(),
        })
    }
}

#[async_trait]
impl Handler for CopyResponse {
    async fn handle(&self, ctx: &mut RequestContext, _next: Next<'_>) -> Result<()> {
        let Some(upstream) = ctx.upstream.clone() else {
            return Err(no_upstream("copy_response"));
        };

        let status = match &self.status_code {
            None => upstream.status,
            Some(code) => code.status(ctx).ok_or_else(|| {
                HandlerError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("invalid status code '{}'", ctx.expand(&code.template())),
                )
            })?,
        };

        ctx.write_status(status);
        if !upstream.body.is_empty() {
            ctx.write_body(&upstream.body);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "copy_response"
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CopyResponseHeadersConfig {
    /// Only copy these fields
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<String>,
    /// Copy every field except these
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
}

/// Copies the intercepted response's headers onto the client response,
/// replacing fields of the same name, then continues
#[derive(Debug, Clone, Default)]
pub struct CopyResponseHeaders {
    include: Vec<HeaderName>,
    exclude: Vec<HeaderName>,
}

impl CopyResponseHeaders {
    pub fn from_config(config: CopyResponseHeadersConfig) -> Result<Self> {
        if !config.include.is_empty() && !config.exclude.is_empty() {
            return Err(PipelineError::config(
                "",
                "cannot define both 'include' and 'exclude'",
            ));
        }
        Ok(Self {
            include: parse_names(&config.include, "include")?,
            exclude: parse_names(&config.exclude, "exclude")?,
        })
    }

    fn allows(&self, name: &HeaderName) -> bool {
        if !self.include.is_empty() {
            return self.include.contains(name);
        }
        !self.exclude.contains(name)
    }
}

fn parse_names(names: &[String], location: &str) -> Result<Vec<HeaderName>> {
    names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                PipelineError::config(
                    format!("{}[{}]", location, i),
                    format!("invalid header name '{}': {}", name, e),
                )
            })
        })
        .collect()
}

#[async_trait]
impl Handler for CopyResponseHeaders {
    async fn handle(&self, ctx: &mut RequestContext, next: Next<'_>) -> Result<()> {
        let Some(upstream) = ctx.upstream.as_ref() else {
            return Err(no_upstream("copy_response_headers"));
        };
        let headers = upstream.headers.clone();

        let out = ctx.response.headers_mut();
        for name in headers.keys() {
            if !self.allows(name) {
                continue;
            }
            out.remove(name);
            for value in headers.get_all(name) {
                out.append(name.clone(), value.clone());
            }
        }

        next.run(ctx).await
    }

    fn name(&self) -> &str {
        "copy_response_headers"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::sync::Arc;

    fn ctx_with_upstream() -> RequestContext {
        let mut ctx = RequestContext::new(
            http::Request::builder()
                .uri("/")
                .body(Bytes::new())
                .unwrap(),
        );
        let mut headers = HeaderMap::new();
        headers.insert("www-authenticate", "Basic".parse().unwrap());
        headers.insert("connection", "close".parse().unwrap());
        headers.insert("x-reason", "expired".parse().unwrap());
        ctx.upstream = Some(UpstreamResponse {
            status: StatusCode::UNAUTHORIZED,
            headers,
            body: Bytes::from("denied"),
        });
        ctx
    }

    #[tokio::test]
    async fn test_copy_response() {
        let handler = CopyResponse::from_config(&CopyResponseConfig::default()).unwrap();
        let mut c = ctx_with_upstream();
        handler.handle(&mut c, Next::empty()).await.unwrap();
        assert_eq!(c.response.status(), Some(StatusCode::UNAUTHORIZED));
        assert_eq!(c.response.body(), b"denied");
    }

    #[tokio::test]
    async fn test_copy_response_status_override() {
        let handler = CopyResponse::from_config(&CopyResponseConfig {
            status_code: Some(WeakString::Number(403)),
        })
        .unwrap();
        let mut c = ctx_with_upstream();
        handler.handle(&mut c, Next::empty()).await.unwrap();
        assert_eq!(c.response.status(), Some(StatusCode::FORBIDDEN));
    }

    #[test]
    fn test_copy_response_rejects_bad_status() {
        let result = CopyResponse::from_config(&CopyResponseConfig {
            status_code: Some(WeakString::Number(70000)),
        });
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_copy_without_upstream_is_500() {
        let mut c = ctx_with_upstream();
        c.upstream = None;
        let err = CopyResponse::default()
            .handle(&mut c, Next::empty())
            .await
            .unwrap_err();
        assert_eq!(HandlerError::from(err).status, StatusCode::INTERNAL_SERVER_ERROR);

        let err = CopyResponseHeaders::default()
            .handle(&mut c, Next::empty())
            .await
            .unwrap_err();
        assert_eq!(HandlerError::from(err).status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_copy_response_headers_exclude() {
        let handler = CopyResponseHeaders::from_config(CopyResponseHeadersConfig {
            exclude: vec!["Connection".to_string(), "X-Reason".to_string()],
            ..Default::default()
        })
        .unwrap();
        let mut c = ctx_with_upstream();
        c.response
            .headers_mut()
            .insert("www-authenticate", "Bearer".parse().unwrap());
        handler.handle(&mut c, Next::empty()).await.unwrap();

        let headers = c.response.headers();
        assert_eq!(headers.get_all("www-authenticate").iter().count(), 1);
        assert_eq!(headers["www-authenticate"], "Basic");
        assert!(!headers.contains_key("connection"));
        assert!(!headers.contains_key("x-reason"));
        assert!(!c.response.is_committed());
    }

    #[tokio::test]
    async fn test_copy_response_headers_include_then_continue() {
        let handler = CopyResponseHeaders::from_config(CopyResponseHeadersConfig {
            include: vec!["x-reason".to_string()],
            ..Default::default()
        })
        .unwrap();
        let copy = CopyResponse::default();
        let chain: Vec<Arc<dyn Handler>> = vec![Arc::new(handler), Arc::new(copy)];
        let mut c = ctx_with_upstream();
        Next::from_handlers(&chain).run(&mut c).await.unwrap();

        let headers = c.response.headers();
        assert_eq!(headers["x-reason"], "expired");
        assert!(!headers.contains_key("www-authenticate"));
        assert_eq!(c.response.status(), Some(StatusCode::UNAUTHORIZED));
    }

    #[test]
    fn test_copy_response_headers_include_and_exclude_conflict() {
        let result = CopyResponseHeaders::from_config(CopyResponseHeadersConfig {
            include: vec!["a".to_string()],
            exclude: vec!["b".to_string()],
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_response_handler_without_matcher_matches_all() {
        let handler = ResponseHandler::compile(
            &ResponseHandlerConfig::default(),
            &HandlerRegistry::with_builtins(),
        )
        .unwrap();
        assert!(handler.matches(StatusCode::INTERNAL_SERVER_ERROR, &HeaderMap::new()));
    }

    #[tokio::test]
    async fn test_copy_to_client_strips_hop_by_hop() {
        let mut c = ctx_with_upstream();
        let resp = c.upstream.clone().unwrap();
        copy_to_client(&mut c, &resp);
        assert_eq!(c.response.status(), Some(StatusCode::UNAUTHORIZED));
        assert!(!c.response.headers().contains_key("connection"));
        assert_eq!(c.response.headers()["x-reason"], "expired");
        assert_eq!(c.response.body(), b"denied");
    }
}
