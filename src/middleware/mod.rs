//! Handlers — the units a route chain is built from
//!
//! Every handler receives the request context and the rest of the chain:
//!
//! ```text
//! terminal      write a response, never call next
//! pass-through  do some work, then `next.run(ctx).await`
//! wrapping      work on both sides of `next.run(ctx).await`
//! ```
//!
//! Handlers are created by name through a [`HandlerRegistry`], which is
//! built once at startup and passed to the route compiler.

pub mod forward_auth;
pub mod headers;
mod log_append;
mod static_response;
mod subroute;
mod vars;

pub use headers::{Headers, HeaderOps, RespHeaderOps, ResolvedHeaderOps};
pub use log_append::LogAppend;
pub use static_response::{StaticError, StaticResponse, WeakString};
pub use subroute::Subroute;
pub use vars::VarsHandler;

use crate::config::HandlerConfig;
use crate::context::RequestContext;
use crate::error::{PipelineError, Result};
use crate::proxy::{CopyResponse, CopyResponseHeaders, HttpTransport, ReverseProxy, Transport};
use crate::router::Next;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;

/// A unit of request handling
#[async_trait]
pub trait Handler: Send + Sync {
    /// Handle the request. Call `next.run(ctx)` to continue the chain.
    async fn handle(&self, ctx: &mut RequestContext, next: Next<'_>) -> Result<()>;

    /// Handler name for logging
    fn name(&self) -> &str;
}

/// Builds a handler from its JSON parameters
pub type HandlerFactory =
    Arc<dyn Fn(serde_json::Value, &HandlerRegistry) -> Result<Arc<dyn Handler>> + Send + Sync>;

/// Handler name → factory
pub struct HandlerRegistry {
    factories: HashMap<String, HandlerFactory>,
    transport: Arc<dyn Transport>,
}

impl HandlerRegistry {
    /// An empty registry using the HTTP transport
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            transport: Arc::new(HttpTransport::new()),
        }
    }

    /// A registry with every built-in handler registered
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("headers", |params, _| {
            Ok(Arc::new(Headers::from_config(&decode("headers", params)?)?))
        });
        registry.register("vars", |params, _| {
            Ok(Arc::new(VarsHandler::new(decode("vars", params)?)))
        });
        registry.register("subroute", |params, registry| {
            Ok(Arc::new(Subroute::from_config(
                &decode("subroute", params)?,
                registry,
            )?))
        });
        registry.register("static_response", |params, _| {
            Ok(Arc::new(StaticResponse::from_config(decode(
                "static_response",
                params,
            )?)))
        });
        registry.register("error", |params, _| {
            Ok(Arc::new(StaticError::from_config(decode("error", params)?)))
        });
        registry.register("log_append", |params, _| {
            Ok(Arc::new(LogAppend::from_config(decode("log_append", params)?)))
        });
        registry.register("reverse_proxy", |params, registry| {
            Ok(Arc::new(ReverseProxy::from_config(
                &decode("reverse_proxy", params)?,
                registry,
            )?))
        });
        registry.register("copy_response", |params, _| {
            Ok(Arc::new(CopyResponse::from_config(&decode(
                "copy_response",
                params,
            )?)?))
        });
        registry.register("copy_response_headers", |params, _| {
            Ok(Arc::new(CopyResponseHeaders::from_config(decode(
                "copy_response_headers",
                params,
            )?)?))
        });
        registry.register("forward_auth", |params, registry| {
            Ok(Arc::new(forward_auth::build(
                decode("forward_auth", params)?,
                registry,
            )?))
        });
        registry
    }

    /// Use `transport` for every proxy handler built from now on
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    /// Register (or replace) a handler factory
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(serde_json::Value, &HandlerRegistry) -> Result<Arc<dyn Handler>>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        self.transport.clone()
    }

    /// Build a handler from its configuration
    pub fn build(&self, config: &HandlerConfig) -> Result<Arc<dyn Handler>> {
        let factory = self.factories.get(&config.handler).ok_or_else(|| {
            PipelineError::config("", format!("unknown handler '{}'", config.handler))
        })?;
        factory(serde_json::Value::Object(config.params.clone()), self)
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// Decode a handler's parameters into its typed config
pub(crate) fn decode<T: DeserializeOwned>(handler: &str, params: serde_json::Value) -> Result<T> {
    serde_json::from_value(params)
        .map_err(|e| PipelineError::config("", format!("invalid {} config: {}", handler, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    struct Hello;

    #[async_trait]
    impl Handler for Hello {
        async fn handle(&self, ctx: &mut RequestContext, _next: Next<'_>) -> Result<()> {
            ctx.write_body(b"hello");
            Ok(())
        }

        fn name(&self) -> &str {
            "hello"
        }
    }

    #[test]
    fn test_builtins_registered() {
        let registry = HandlerRegistry::with_builtins();
        for name in [
            "headers",
            "vars",
            "subroute",
            "static_response",
            "error",
            "log_append",
            "reverse_proxy",
            "copy_response",
            "copy_response_headers",
            "forward_auth",
        ] {
            assert!(registry.contains(name), "missing {}", name);
        }
        assert!(!HandlerRegistry::new().contains("headers"));
    }

    #[test]
    fn test_build_unknown_handler() {
        let registry = HandlerRegistry::with_builtins();
        let result = registry.build(&HandlerConfig::new("nope", serde_json::json!({})));
        let err = result.err().unwrap();
        assert!(err.to_string().contains("unknown handler 'nope'"));
    }

    #[test]
    fn test_build_invalid_params() {
        let registry = HandlerRegistry::with_builtins();
        let result = registry.build(&HandlerConfig::new(
            "log_append",
            serde_json::json!({"key": 5}),
        ));
        let err = result.err().unwrap();
        assert!(err.to_string().contains("invalid log_append config"));
    }

    #[tokio::test]
    async fn test_register_custom_handler() {
        let mut registry = HandlerRegistry::new();
        registry.register("hello", |_, _| Ok(Arc::new(Hello)));
        let handler = registry
            .build(&HandlerConfig::new("hello", serde_json::json!({})))
            .unwrap();
        assert_eq!(handler.name(), "hello");

        let mut ctx = RequestContext::new(
            http::Request::builder()
                .uri("/")
                .body(Bytes::new())
                .unwrap(),
        );
        handler.handle(&mut ctx, Next::empty()).await.unwrap();
        assert_eq!(ctx.response.body(), b"hello");
    }
}
