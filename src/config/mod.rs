//! Configuration types for A3S Pipeline
//!
//! The pipeline consumes structured configuration: a list of listen
//! addresses, an ordered route list, optional error routes, and access-log
//! routing. HCL is the primary file format; `.json` and `.toml` files are
//! accepted too.

mod logging;
mod route;

pub use logging::ServerLogConfig;
pub use route::{HandlerConfig, MatcherSetConfig, ResponseMatcherConfig, RouteConfig};

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

use crate::error::{PipelineError, Result};

/// Top-level pipeline configuration
///
/// # HCL Example
///
/// ```hcl
/// listen = ["0.0.0.0:8080"]
///
/// routes = [
///   {
///     match = [{ path = ["/api*"] }]
///     handle = [
///       { handler = "forward_auth", upstreams = ["127.0.0.1:9091"], uri = "/verify", copy_headers = ["Remote-User"] },
///       { handler = "reverse_proxy", upstreams = ["127.0.0.1:3000"] },
///     ]
///   },
/// ]
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Listen addresses (`host:port`)
    #[serde(default = "default_listen")]
    pub listen: Vec<String>,

    /// Primary routes, evaluated in order
    #[serde(default)]
    pub routes: Vec<RouteConfig>,

    /// Routes run when the primary routes fail
    #[serde(default)]
    pub errors: Vec<RouteConfig>,

    /// Access log routing; `None` disables access logs
    #[serde(default)]
    pub logs: Option<ServerLogConfig>,

    /// Graceful shutdown timeout in seconds (default: 30)
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

fn default_listen() -> Vec<String> {
    vec!["0.0.0.0:8080".to_string()]
}

fn default_shutdown_timeout() -> u64 {
    30
}

impl PipelineConfig {
    /// Load configuration from a file.
    ///
    /// `.json` and `.toml` files are parsed by extension; everything else is
    /// parsed as HCL.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            PipelineError::config(
                path.display().to_string(),
                format!("failed to read config file: {}", e),
            )
        })?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&content),
            Some("toml") => Self::from_toml(&content),
            _ => Self::from_hcl(&content),
        }
    }

    /// Parse configuration from an HCL string
    pub fn from_hcl(content: &str) -> Result<Self> {
        hcl::from_str(content)
            .map_err(|e| PipelineError::config("config", format!("failed to parse HCL: {}", e)))
    }

    /// Parse configuration from a JSON string
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| PipelineError::config("config", format!("failed to parse JSON: {}", e)))
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| PipelineError::config("config", format!("failed to parse TOML: {}", e)))
    }

    /// Parsed listen addresses
    pub fn listen_addrs(&self) -> Result<Vec<SocketAddr>> {
        self.listen
            .iter()
            .enumerate()
            .map(|(i, addr)| {
                addr.parse().map_err(|e| {
                    PipelineError::config(
                        format!("listen[{}]", i),
                        format!("invalid address '{}': {}", addr, e),
                    )
                })
            })
            .collect()
    }

    /// Validate the configuration for consistency.
    ///
    /// Route contents are validated when they are compiled; this checks the
    /// parts that are not compiled.
    pub fn validate(&self) -> Result<()> {
        if self.listen.is_empty() {
            return Err(PipelineError::config(
                "listen",
                "at least one listen address is required",
            ));
        }
        self.listen_addrs()?;

        for (i, route) in self.routes.iter().enumerate() {
            validate_route(route, &format!("routes[{}]", i))?;
        }
        for (i, route) in self.errors.iter().enumerate() {
            validate_route(route, &format!("errors[{}]", i))?;
        }
        Ok(())
    }
}

fn validate_route(route: &RouteConfig, location: &str) -> Result<()> {
    if route.rule.is_some() && !route.matchers.is_empty() {
        return Err(PipelineError::config(
            location,
            "'rule' and 'match' cannot be combined",
        ));
    }
    for (i, handler) in route.handle.iter().enumerate() {
        if handler.handler.is_empty() {
            return Err(PipelineError::config(
                format!("{}.handle[{}]", location, i),
                "handler name cannot be empty",
            ));
        }
    }
    Ok(())
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            routes: Vec::new(),
            errors: Vec::new(),
            logs: None,
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}
