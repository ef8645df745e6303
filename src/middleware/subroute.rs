//! Subroute handler — a nested route list inside a chain

use super::{Handler, HandlerRegistry, Next};
use crate::config::RouteConfig;
use crate::context::{ErrorInfo, RequestContext};
use crate::error::{HandlerError, Result};
use crate::router::RouteList;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubrouteConfig {
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
    /// Routes that handle errors raised by `routes`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<RouteConfig>,
}

/// Runs its routes, then the outer chain.
///
/// When `errors` is configured, a failure inside the subroute is handed to
/// the error routes instead of propagating; the outer chain does not resume.
#[derive(Debug, Clone)]
pub struct Subroute {
    routes: RouteList,
    errors: RouteList,
}

impl Subroute {
    pub fn new(routes: RouteList) -> Self {
        Self {
            routes,
            errors: RouteList::default(),
        }
    }

    pub fn from_config(config: &SubrouteConfig, registry: &HandlerRegistry) -> Result<Self> {
        Ok(Self {
            routes: RouteList::compile(&config.routes, registry, "routes")?,
            errors: RouteList::compile(&config.errors, registry, "errors")?,
        })
    }
}

#[async_trait]
impl Handler for Subroute {
    async fn handle(&self, ctx: &mut RequestContext, next: Next<'_>) -> Result<()> {
        let result = self.routes.execute_with(ctx, next).await;
        let Err(err) = result else {
            return Ok(());
        };
        if self.errors.is_empty() {
            return Err(err);
        }

        let err = HandlerError::from(err);
        tracing::debug!(err_id = %err.id, status = err.status.as_u16(), "Subroute handling error");
        let previous = ctx.error.replace(ErrorInfo::from(&err));
        let handled = self.errors.execute(ctx).await;
        ctx.error = previous;
        handled
    }

    fn name(&self) -> &str {
        "subroute"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HandlerConfig;
    use bytes::Bytes;
    use http::StatusCode;
    use std::sync::Arc;

    fn ctx(path: &str) -> RequestContext {
        RequestContext::new(
            http::Request::builder()
                .uri(path)
                .body(Bytes::new())
                .unwrap(),
        )
    }

    fn route(handler: &str, params: serde_json::Value) -> RouteConfig {
        RouteConfig {
            handle: vec![HandlerConfig::new(handler, params)],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_subroute_continues_outer_chain() {
        let registry = HandlerRegistry::with_builtins();
        let subroute = Subroute::from_config(
            &SubrouteConfig {
                routes: vec![route("vars", serde_json::json!({"inner": "yes"}))],
                ..Default::default()
            },
            &registry,
        )
        .unwrap();
        let outer = registry
            .build(&HandlerConfig::new(
                "static_response",
                serde_json::json!({"body": "{http.vars.inner}"}),
            ))
            .unwrap();
        let chain: Vec<Arc<dyn Handler>> = vec![Arc::new(subroute), outer];

        let mut c = ctx("/");
        Next::from_handlers(&chain).run(&mut c).await.unwrap();
        assert_eq!(c.response.body(), b"yes");
    }

    #[tokio::test]
    async fn test_subroute_errors_handle_failure() {
        let registry = HandlerRegistry::with_builtins();
        let subroute = Subroute::from_config(
            &SubrouteConfig {
                routes: vec![route("error", serde_json::json!({"status_code": 418}))],
                errors: vec![route(
                    "static_response",
                    serde_json::json!({"body": "handled {http.error.status_code}"}),
                )],
            },
            &registry,
        )
        .unwrap();

        let mut c = ctx("/");
        subroute.handle(&mut c, Next::empty()).await.unwrap();
        assert_eq!(c.response.body(), b"handled 418");
        assert!(c.error.is_none());
    }

    #[tokio::test]
    async fn test_subroute_without_errors_propagates() {
        let registry = HandlerRegistry::with_builtins();
        let subroute = Subroute::from_config(
            &SubrouteConfig {
                routes: vec![route("error", serde_json::json!({"status_code": 401}))],
                ..Default::default()
            },
            &registry,
        )
        .unwrap();

        let err = subroute.handle(&mut ctx("/"), Next::empty()).await.unwrap_err();
        assert_eq!(HandlerError::from(err).status, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_subroute_compile_error_location() {
        let registry = HandlerRegistry::with_builtins();
        let result = registry.build(&HandlerConfig::new(
            "subroute",
            serde_json::json!({"routes": [{"handle": [{"handler": "missing"}]}]}),
        ));
        let err = result.err().unwrap();
        assert!(err.to_string().contains("routes[0].handle[0]"));
    }
}
