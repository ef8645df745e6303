//! Router — route lists compiled into executable handler chains
//!
//! A route list is walked in declaration order. Each route whose matcher
//! sets accept the request contributes its handlers to the chain; a matched
//! terminal route ends the walk, dropping every later route and the outer
//! continuation.
//!
//! Matching is lazy: a route's matchers are evaluated only when the chain
//! reaches it, so vars written by earlier handlers are visible to later
//! matchers.

pub mod rule;

use crate::config::RouteConfig;
use crate::context::RequestContext;
use crate::error::{PipelineError, Result};
use crate::matcher::MatcherSets;
use crate::middleware::{Handler, HandlerRegistry};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// A compiled route
#[derive(Clone)]
pub struct Route {
    pub matchers: MatcherSets,
    pub handlers: Vec<Arc<dyn Handler>>,
    pub terminal: bool,
}

impl Route {
    pub fn new(matchers: MatcherSets, handlers: Vec<Arc<dyn Handler>>) -> Self {
        Self {
            matchers,
            handlers,
            terminal: false,
        }
    }

    pub fn terminal(mut self) -> Self {
        self.terminal = true;
        self
    }

    /// Compile one route from configuration
    pub fn compile(config: &RouteConfig, registry: &HandlerRegistry) -> Result<Self> {
        let matchers = match &config.rule {
            Some(_) if !config.matchers.is_empty() => {
                return Err(PipelineError::config(
                    "",
                    "'rule' and 'match' cannot be combined",
                ));
            }
            Some(expr) => rule::parse(expr)?,
            None => MatcherSets::compile(&config.matchers)?,
        };

        let handlers = config
            .handle
            .iter()
            .enumerate()
            .map(|(i, h)| registry.build(h).map_err(|e| e.at(&format!("handle[{}]", i))))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            matchers,
            handlers,
            terminal: config.terminal,
        })
    }
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("matchers", &self.matchers)
            .field(
                "handlers",
                &self.handlers.iter().map(|h| h.name()).collect::<Vec<_>>(),
            )
            .field("terminal", &self.terminal)
            .finish()
    }
}

/// An ordered, immutable list of routes
#[derive(Debug, Clone, Default)]
pub struct RouteList {
    routes: Vec<Route>,
}

impl RouteList {
    pub fn new(routes: Vec<Route>) -> Self {
        Self { routes }
    }

    /// Compile routes from configuration. Errors are reported at
    /// `location[i]...`.
    pub fn compile(
        configs: &[RouteConfig],
        registry: &HandlerRegistry,
        location: &str,
    ) -> Result<Self> {
        let routes = configs
            .iter()
            .enumerate()
            .map(|(i, config)| {
                Route::compile(config, registry).map_err(|e| e.at(&format!("{}[{}]", location, i)))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { routes })
    }

    /// Run the routes against `ctx`
    pub async fn execute(&self, ctx: &mut RequestContext) -> Result<()> {
        Next {
            handlers: &[],
            routes: &self.routes,
            then: None,
        }
        .run(ctx)
        .await
    }

    /// Run the routes, continuing with `next` once the list is exhausted
    pub async fn execute_with(&self, ctx: &mut RequestContext, next: Next<'_>) -> Result<()> {
        Next {
            handlers: &[],
            routes: &self.routes,
            then: Some(&next),
        }
        .run(ctx)
        .await
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// The rest of the chain after the current handler.
///
/// A handler that never calls [`Next::run`] terminates the chain. One that
/// calls it and then returns is pass-through. One that works on both sides of
/// the call wraps the rest of the chain.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    handlers: &'a [Arc<dyn Handler>],
    routes: &'a [Route],
    then: Option<&'a Next<'a>>,
}

impl<'a> Next<'a> {
    /// A continuation that does nothing
    pub fn empty() -> Self {
        Self {
            handlers: &[],
            routes: &[],
            then: None,
        }
    }

    /// A continuation over a plain handler list
    pub fn from_handlers(handlers: &'a [Arc<dyn Handler>]) -> Self {
        Self {
            handlers,
            routes: &[],
            then: None,
        }
    }

    /// Invoke the rest of the chain
    pub fn run<'b>(
        self,
        ctx: &'b mut RequestContext,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'b>>
    where
        'a: 'b,
    {
        Box::pin(async move {
            let mut next = self;
            loop {
                if let Some((handler, rest)) = next.handlers.split_first() {
                    let cont = Next {
                        handlers: rest,
                        ..next
                    };
                    return handler.handle(ctx, cont).await;
                }

                if let Some((route, rest)) = next.routes.split_first() {
                    next = if !route.matchers.matches(ctx) {
                        Next {
                            routes: rest,
                            ..next
                        }
                    } else if route.terminal {
                        Next {
                            handlers: &route.handlers,
                            routes: &[],
                            then: None,
                        }
                    } else {
                        Next {
                            handlers: &route.handlers,
                            routes: rest,
                            then: next.then,
                        }
                    };
                    continue;
                }

                match next.then {
                    Some(then) => next = *then,
                    None => return Ok(()),
                }
            }
        })
    }
}

impl std::fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Next")
            .field("handlers", &self.handlers.len())
            .field("routes", &self.routes.len())
            .field("then", &self.then.is_some())
            .finish()
    }
}
