//! Upstream transport — sends a prepared request to one upstream

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use std::time::Duration;

/// A request ready to send upstream
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: Method,
    /// Path and query
    pub uri: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// A fully buffered upstream response
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Sends requests to upstream addresses
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `req` to `upstream` (`host:port` or a base URL)
    async fn round_trip(&self, upstream: &str, req: UpstreamRequest) -> Result<UpstreamResponse>;
}

/// HTTP/1.1 transport backed by reqwest
pub struct HttpTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpTransport {
    /// Create a new transport with default settings
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(30))
    }

    /// Create a new transport with a custom timeout
    pub fn with_timeout(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(100)
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .build()
            .unwrap_or_default();

        Self { client, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the upstream URL; bare `host:port` upstreams get `http://`
pub fn upstream_url(upstream: &str, uri: &str) -> String {
    let base = upstream.trim_end_matches('/');
    let uri = if uri.starts_with('/') {
        uri.to_string()
    } else {
        format!("/{}", uri)
    };
    if base.contains("://") {
        format!("{}{}", base, uri)
    } else {
        format!("http://{}{}", base, uri)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn round_trip(&self, upstream: &str, req: UpstreamRequest) -> Result<UpstreamResponse> {
        let url = upstream_url(upstream, &req.uri);
        let mut builder = self.client.request(req.method, &url);

        // Framing headers are recomputed from the buffered body
        for (name, value) in req.headers.iter() {
            if is_hop_by_hop(name.as_str()) || *name == http::header::CONTENT_LENGTH {
                continue;
            }
            builder = builder.header(name.clone(), value.clone());
        }
        builder = builder.body(req.body);

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }
}

/// Check if a header is a hop-by-hop header that should not be forwarded
pub fn is_hop_by_hop(name: &str) -> bool {
    matches!(
        name.to_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
    )
}
