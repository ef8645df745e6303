//! # A3S Pipeline
//!
//! A programmable HTTP server core. Requests flow through an ordered list of
//! routes; every matching route contributes its handlers to one chain, and
//! each handler decides whether to answer, pass the request on, or wrap the
//! rest of the chain.
//!
//! ## Architecture
//!
//! ```text
//! Listener → Routes (matchers) → Handler chain → Response buffer
//!                                    │
//!                                    ├─ headers / vars / log_append
//!                                    ├─ subroute (nested routes)
//!                                    └─ reverse_proxy → handle_response routes
//! ```
//!
//! ## Core Features
//!
//! - **Matchers**: host (with wildcard labels), path globs, method, header, vars
//! - **Header mutation**: add → set → delete, optionally deferred until the
//!   response status is written and gated on the response
//! - **Response interception**: branch on the upstream status class and headers
//! - **Forward auth**: delegate authentication to an external service
//! - **Error routes**: turn handler errors into deliberate responses
//! - **Access logs**: per-host routing to named loggers
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use a3s_pipeline::{config::PipelineConfig, HandlerRegistry, Server};
//!
//! #[tokio::main]
//! async fn main() -> a3s_pipeline::Result<()> {
//!     let config = PipelineConfig::from_file("pipeline.hcl").await?;
//!     let server = Server::new(&config, &HandlerRegistry::with_builtins())?;
//!     server.start().await?;
//!     server.wait_for_shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod matcher;
pub mod middleware;
pub mod observability;
pub mod proxy;
pub mod replacer;
pub mod response;
pub mod router;
pub mod server;

// Re-export main types
pub use config::PipelineConfig;
pub use context::RequestContext;
pub use error::{HandlerError, PipelineError, Result};
pub use middleware::{Handler, HandlerRegistry};
pub use router::{Next, RouteList};
pub use server::{Pipeline, Server};
