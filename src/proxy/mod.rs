//! Proxy layer — the `reverse_proxy` handler
//!
//! Forwards the request to one of its upstreams (round-robin), then either
//! writes the upstream response to the client or hands it to the first
//! matching response handler. Response handlers are matched against the
//! response as received; response header ops only apply when it is
//! written to the client.

pub mod http_proxy;
pub mod intercept;

pub use http_proxy::{HttpTransport, Transport, UpstreamRequest, UpstreamResponse};
pub use intercept::{
    CopyResponse, CopyResponseConfig, CopyResponseHeaders, CopyResponseHeadersConfig,
    ResponseHandler, ResponseHandlerConfig,
};

use crate::context::RequestContext;
use crate::error::{HandlerError, PipelineError, Result};
use crate::middleware::headers::{HeaderOps, HeadersConfig, RespHeaderOps};
use crate::middleware::{Handler, HandlerRegistry};
use crate::router::Next;
use async_trait::async_trait;
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method, StatusCode};
use http_proxy::is_hop_by_hop;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Parameters of the `reverse_proxy` handler
///
/// # Example
///
/// ```json
/// {
///   "handler": "reverse_proxy",
///   "upstreams": ["127.0.0.1:9091"],
///   "headers": {"request": {"set": {"X-Forwarded-Method": ["{http.request.method}"]}}},
///   "rewrite": {"method": "GET", "uri": "/verify"},
///   "handle_response": [
///     {"match": {"status_code": [2]}, "routes": []},
///     {"routes": [{"handle": [{"handler": "copy_response"}]}]}
///   ]
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReverseProxyConfig {
    /// Upstream addresses (`host:port` or base URLs)
    pub upstreams: Vec<String>,
    /// Header operations on the upstream request and response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HeadersConfig>,
    /// Rewrite the upstream request's method and URI
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rewrite: Option<RewriteConfig>,
    /// Response handlers, tried in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub handle_response: Vec<ResponseHandlerConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RewriteConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// URI template. Without a `?`, the original query is kept.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

#[derive(Debug, Clone)]
struct Rewrite {
    method: Option<Method>,
    uri: Option<String>,
}

/// Reverse proxy handler
pub struct ReverseProxy {
    upstreams: Vec<String>,
    next_upstream: AtomicUsize,
    request_ops: Option<HeaderOps>,
    response_ops: Option<RespHeaderOps>,
    rewrite: Option<Rewrite>,
    handle_response: Vec<ResponseHandler>,
    transport: Arc<dyn Transport>,
}

impl ReverseProxy {
    /// Compile the handler; proxied requests go through the registry's transport
    pub fn from_config(config: &ReverseProxyConfig, registry: &HandlerRegistry) -> Result<Self> {
        if config.upstreams.is_empty() {
            return Err(PipelineError::config(
                "upstreams",
                "at least one upstream is required",
            ));
        }

        let (request_ops, response_ops) = match &config.headers {
            Some(headers) => (
                headers.request.as_ref().map(HeaderOps::from_config),
                headers
                    .response
                    .as_ref()
                    .map(RespHeaderOps::from_config)
                    .transpose()
                    .map_err(|e| e.at("headers.response"))?,
            ),
            None => (None, None),
        };

        let rewrite = match &config.rewrite {
            Some(rewrite) => {
                let method = rewrite
                    .method
                    .as_ref()
                    .map(|m| {
                        Method::from_bytes(m.to_ascii_uppercase().as_bytes()).map_err(|e| {
                            PipelineError::config(
                                "rewrite.method",
                                format!("invalid method '{}': {}", m, e),
                            )
                        })
                    })
                    .transpose()?;
                Some(Rewrite {
                    method,
                    uri: rewrite.uri.clone(),
                })
            }
            None => None,
        };

        let handle_response = config
            .handle_response
            .iter()
            .enumerate()
            .map(|(i, h)| {
                ResponseHandler::compile(h, registry)
                    .map_err(|e| e.at(&format!("handle_response[{}]", i)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            upstreams: config.upstreams.clone(),
            next_upstream: AtomicUsize::new(0),
            request_ops,
            response_ops,
            rewrite,
            handle_response,
            transport: registry.transport(),
        })
    }

    fn select_upstream(&self) -> &str {
        let i = self.next_upstream.fetch_add(1, Ordering::Relaxed) % self.upstreams.len();
        &self.upstreams[i]
    }

    /// Prepare the upstream request from the client request
    fn build_request(&self, ctx: &RequestContext) -> UpstreamRequest {
        let mut headers = HeaderMap::new();
        for (name, value) in ctx.request.headers.iter() {
            if !is_hop_by_hop(name.as_str()) {
                headers.append(name.clone(), value.clone());
            }
        }
        set_forwarded_headers(ctx, &mut headers);

        if let Some(ops) = &self.request_ops {
            ops.resolve(ctx).apply(&mut headers);
        }

        let mut method = ctx.request.method.clone();
        let mut uri = ctx
            .request
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());
        let mut body = ctx.body.clone();

        if let Some(rewrite) = &self.rewrite {
            if let Some(m) = &rewrite.method {
                method = m.clone();
                if method == Method::GET || method == Method::HEAD {
                    body = Bytes::new();
                }
            }
            if let Some(template) = &rewrite.uri {
                let expanded = ctx.expand(template);
                uri = match ctx.request.uri.query() {
                    Some(query) if !expanded.contains('?') => format!("{}?{}", expanded, query),
                    _ => expanded,
                };
            }
        }

        UpstreamRequest {
            method,
            uri,
            headers,
            body,
        }
    }
}

fn set_forwarded_headers(ctx: &RequestContext, headers: &mut HeaderMap) {
    const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
    const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
    const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");

    if let Some(addr) = ctx.remote_addr {
        let client_ip = addr.ip().to_string();
        let value = match headers.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
            Some(prior) => format!("{}, {}", prior, client_ip),
            None => client_ip,
        };
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(X_FORWARDED_FOR, value);
        }
    }

    headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static("http"));

    if let Some(host) = ctx.host() {
        if let Ok(value) = HeaderValue::from_str(host) {
            headers.insert(X_FORWARDED_HOST, value);
        }
    }
}

/// Map a transport failure to the status the client sees
#[track_caller]
fn transport_error(err: PipelineError) -> HandlerError {
    let timed_out = match &err {
        PipelineError::Http(e) => e.is_timeout(),
        PipelineError::Io(e) => e.kind() == std::io::ErrorKind::TimedOut,
        _ => false,
    };
    match err {
        PipelineError::Handler(inner) => inner,
        other if timed_out => HandlerError::new(StatusCode::GATEWAY_TIMEOUT, other),
        other => HandlerError::new(StatusCode::BAD_GATEWAY, other),
    }
}

#[async_trait]
impl Handler for ReverseProxy {
    async fn handle(&self, ctx: &mut RequestContext, next: Next<'_>) -> Result<()> {
        let upstream = self.select_upstream();
        let request = self.build_request(ctx);
        tracing::debug!(
            upstream = upstream,
            method = %request.method,
            uri = %request.uri,
            "Proxying request"
        );

        let start = Instant::now();
        let result = self.transport.round_trip(upstream, request).await;
        ctx.log_fields.set("upstream", upstream);
        ctx.log_fields
            .set("upstream_duration_ms", start.elapsed().as_millis() as u64);

        let mut response = result.map_err(transport_error)?;

        // response handlers see the upstream's own headers
        let selected = self
            .handle_response
            .iter()
            .find(|h| h.matches(response.status, &response.headers));

        match selected {
            Some(handler) => {
                tracing::debug!(
                    status = response.status.as_u16(),
                    "Handling upstream response with response handler"
                );
                let previous = ctx.upstream.replace(response);
                let result = handler.routes.execute_with(ctx, next).await;
                ctx.upstream = previous;
                result
            }
            None => {
                if let Some(ops) = &self.response_ops {
                    let applies = ops
                        .require
                        .as_ref()
                        .map(|m| m.matches(response.status, &response.headers))
                        .unwrap_or(true);
                    if applies {
                        ops.ops.resolve(ctx).apply(&mut response.headers);
                    }
                }
                intercept::copy_to_client(ctx, &response);
                Ok(())
            }
        }
    }

    fn name(&self) -> &str {
        "reverse_proxy"
    }
}
