//! Forward auth — delegate authentication to an external service
//!
//! A shortcut that expands into a `reverse_proxy` handler. The request is
//! sent to the auth service as a bodiless GET to `uri`, carrying the original
//! method and URI in `X-Forwarded-Method` / `X-Forwarded-Uri`. Then:
//!
//! - 2xx: `copy_headers` are copied from the auth response onto the request
//!   and the chain continues to the backend.
//! - anything else: the auth response (headers, status, body) is sent to the
//!   client and the chain stops.

use super::HandlerRegistry;
use crate::error::{PipelineError, Result};
use crate::proxy::{ReverseProxy, ReverseProxyConfig};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Parameters of the `forward_auth` handler
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ForwardAuthConfig {
    /// Auth service addresses
    pub upstreams: Vec<String>,
    /// Verification URI on the auth service (required)
    #[serde(default)]
    pub uri: String,
    /// Auth response headers copied onto the request on success
    #[serde(default)]
    pub copy_headers: Vec<String>,
}

/// Hop-by-hop fields never copied back to the client on denial
const DENIAL_EXCLUDED_HEADERS: [&str; 6] = [
    "Connection",
    "Keep-Alive",
    "Te",
    "Trailers",
    "Transfer-Encoding",
    "Upgrade",
];

/// Expand a forward-auth config into the equivalent reverse proxy config
pub fn proxy_config(config: &ForwardAuthConfig) -> Result<ReverseProxyConfig> {
    if config.uri.is_empty() {
        return Err(PipelineError::config("uri", "the 'uri' field is required"));
    }

    let good_routes = if config.copy_headers.is_empty() {
        json!([])
    } else {
        let set: serde_json::Map<String, serde_json::Value> = config
            .copy_headers
            .iter()
            .map(|field| {
                (
                    field.clone(),
                    json!([format!("{{http.reverse_proxy.header.{}}}", field)]),
                )
            })
            .collect();
        json!([{ "handle": [{ "handler": "headers", "request": { "set": set } }] }])
    };

    let value = json!({
        "upstreams": config.upstreams,
        "headers": {
            "request": {
                "set": {
                    "X-Forwarded-Method": ["{http.request.method}"],
                    "X-Forwarded-Uri": ["{http.request.uri}"]
                }
            }
        },
        "rewrite": { "method": "GET", "uri": config.uri },
        "handle_response": [
            {
                "match": { "status_code": [2] },
                "routes": good_routes
            },
            {
                "routes": [
                    { "handle": [{ "handler": "copy_response_headers", "exclude": DENIAL_EXCLUDED_HEADERS }] },
                    { "handle": [{ "handler": "copy_response" }] }
                ]
            }
        ]
    });

    Ok(serde_json::from_value(value)?)
}

/// Build the forward-auth reverse proxy
pub fn build(config: ForwardAuthConfig, registry: &HandlerRegistry) -> Result<ReverseProxy> {
    ReverseProxy::from_config(&proxy_config(&config)?, registry)
}
