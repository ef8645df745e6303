//! Headers handler — add, set and delete request and response headers
//!
//! Field names and values are templates, expanded right before they are
//! applied. Operations always run in the order add → set → delete; a delete
//! of a field the same operation set also sets is skipped, so `set` wins.
//!
//! Response operations normally apply at once. With `deferred` or a
//! `require` matcher they are installed as a hook that fires when the
//! response status is committed, for as long as the rest of the chain runs.

use super::{Handler, Next};
use crate::config::ResponseMatcherConfig;
use crate::context::RequestContext;
use crate::error::Result;
use crate::matcher::ResponseMatcher;
use async_trait::async_trait;
use http::header::{HeaderName, HeaderValue};
use http::HeaderMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Header operations as configured
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeaderOpsConfig {
    /// Append values, keeping existing ones
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub add: BTreeMap<String, Vec<String>>,
    /// Replace the field with the comma-joined values
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub set: BTreeMap<String, Vec<String>>,
    /// Remove the field
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub delete: Vec<String>,
}

/// Response header operations as configured
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RespHeaderOpsConfig {
    #[serde(flatten)]
    pub ops: HeaderOpsConfig,
    /// Only apply when the response matches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require: Option<ResponseMatcherConfig>,
    /// Apply when the status is committed instead of immediately
    #[serde(default)]
    pub deferred: bool,
}

/// Parameters of the `headers` handler
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeadersConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<HeaderOpsConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<RespHeaderOpsConfig>,
}

/// Unexpanded header operations
#[derive(Debug, Clone, Default)]
pub struct HeaderOps {
    add: Vec<(String, Vec<String>)>,
    set: Vec<(String, Vec<String>)>,
    delete: Vec<String>,
}

impl HeaderOps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &HeaderOpsConfig) -> Self {
        Self {
            add: config
                .add
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            set: config
                .set
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            delete: config.delete.clone(),
        }
    }

    pub fn add(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.add.push((name.into(), vec![value.into()]));
        self
    }

    pub fn set(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set.push((name.into(), vec![value.into()]));
        self
    }

    pub fn delete(mut self, name: impl Into<String>) -> Self {
        self.delete.push(name.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.set.is_empty() && self.delete.is_empty()
    }

    /// Expand every name and value against `ctx`.
    ///
    /// Names or values that are invalid after expansion are skipped.
    pub fn resolve(&self, ctx: &RequestContext) -> ResolvedHeaderOps {
        let expand_pairs = |pairs: &[(String, Vec<String>)], join: bool| {
            let mut out = Vec::new();
            for (name, values) in pairs {
                let Some(name) = header_name(&ctx.expand(name)) else {
                    continue;
                };
                let expanded: Vec<String> = values.iter().map(|v| ctx.expand(v)).collect();
                if join {
                    if let Some(value) = header_value(&name, &expanded.join(",")) {
                        out.push((name, value));
                    }
                } else {
                    out.extend(
                        expanded
                            .iter()
                            .filter_map(|v| header_value(&name, v))
                            .map(|v| (name.clone(), v)),
                    );
                }
            }
            out
        };

        ResolvedHeaderOps {
            add: expand_pairs(&self.add, false),
            set: expand_pairs(&self.set, true),
            delete: self
                .delete
                .iter()
                .filter_map(|name| header_name(&ctx.expand(name)))
                .collect(),
        }
    }
}

fn header_name(name: &str) -> Option<HeaderName> {
    match HeaderName::from_bytes(name.as_bytes()) {
        Ok(name) => Some(name),
        Err(_) => {
            tracing::warn!(header = name, "Skipping invalid header name");
            None
        }
    }
}

fn header_value(name: &HeaderName, value: &str) -> Option<HeaderValue> {
    match HeaderValue::from_str(value) {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(header = %name, "Skipping invalid header value");
            None
        }
    }
}

/// Header operations with every template expanded
#[derive(Debug, Clone, Default)]
pub struct ResolvedHeaderOps {
    add: Vec<(HeaderName, HeaderValue)>,
    set: Vec<(HeaderName, HeaderValue)>,
    delete: Vec<HeaderName>,
}

impl ResolvedHeaderOps {
    /// Apply add, then set, then delete
    pub fn apply(&self, headers: &mut HeaderMap) {
        for (name, value) in &self.add {
            headers.append(name.clone(), value.clone());
        }
        for (name, value) in &self.set {
            headers.insert(name.clone(), value.clone());
        }
        for name in &self.delete {
            if self.set.iter().any(|(set, _)| set == name) {
                continue;
            }
            headers.remove(name);
        }
    }
}

/// Response header operations, optionally conditional or deferred
#[derive(Debug, Clone, Default)]
pub struct RespHeaderOps {
    pub ops: HeaderOps,
    pub require: Option<ResponseMatcher>,
    pub deferred: bool,
}

impl RespHeaderOps {
    pub fn from_config(config: &RespHeaderOpsConfig) -> Result<Self> {
        Ok(Self {
            ops: HeaderOps::from_config(&config.ops),
            require: config
                .require
                .as_ref()
                .map(ResponseMatcher::compile)
                .transpose()
                .map_err(|e| e.at("require"))?,
            deferred: config.deferred,
        })
    }

    /// Whether the ops must wait for the status to be known
    pub fn is_deferred(&self) -> bool {
        self.deferred || self.require.is_some()
    }
}

/// The `headers` handler
#[derive(Debug, Clone, Default)]
pub struct Headers {
    request: Option<HeaderOps>,
    response: Option<Arc<RespHeaderOps>>,
}

impl Headers {
    pub fn new(request: Option<HeaderOps>, response: Option<RespHeaderOps>) -> Self {
        Self {
            request,
            response: response.map(Arc::new),
        }
    }

    pub fn from_config(config: &HeadersConfig) -> Result<Self> {
        let response = config
            .response
            .as_ref()
            .map(RespHeaderOps::from_config)
            .transpose()
            .map_err(|e| e.at("response"))?;
        Ok(Self::new(
            config.request.as_ref().map(HeaderOps::from_config),
            response,
        ))
    }
}

#[async_trait]
impl Handler for Headers {
    async fn handle(&self, ctx: &mut RequestContext, next: Next<'_>) -> Result<()> {
        if let Some(ops) = &self.request {
            let resolved = ops.resolve(ctx);
            resolved.apply(&mut ctx.request.headers);
        }

        let Some(response) = &self.response else {
            return next.run(ctx).await;
        };

        if !response.is_deferred() {
            let resolved = response.ops.resolve(ctx);
            resolved.apply(ctx.response.headers_mut());
            return next.run(ctx).await;
        }

        let mark = ctx.defer_header_ops(response.clone());
        let result = next.run(ctx).await;
        ctx.cancel_deferred(mark);
        result
    }

    fn name(&self) -> &str {
        "headers"
    }
}
