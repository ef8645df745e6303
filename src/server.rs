//! Server — HTTP listeners feeding requests into the compiled pipeline
//!
//! Each listener accepts connections and serves HTTP/1.1 with hyper. Every
//! request body is collected, the request runs through the primary routes,
//! and failures are handed to the error routes. One access log entry is
//! written per logger the request's host routes to.

use crate::config::PipelineConfig;
use crate::context::{ErrorInfo, RequestContext};
use crate::error::{log_values, HandlerError, PipelineError, Result};
use crate::middleware::HandlerRegistry;
use crate::observability::{AccessLog, LoggerRouting, RequestTracker};
use crate::replacer::{PlaceholderReplacer, Replacer};
use crate::router::RouteList;
use bytes::Bytes;
use http::{Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};

/// The compiled request pipeline shared by every connection
pub struct Pipeline {
    routes: RouteList,
    errors: RouteList,
    logging: Option<LoggerRouting>,
    access_log: AccessLog,
    replacer: Arc<dyn Replacer>,
}

impl Pipeline {
    /// Compile the primary and error routes
    pub fn compile(config: &PipelineConfig, registry: &HandlerRegistry) -> Result<Self> {
        let routes = RouteList::compile(&config.routes, registry, "routes")?;
        let errors = RouteList::compile(&config.errors, registry, "errors")?;
        tracing::info!(
            routes = routes.len(),
            error_routes = errors.len(),
            "Routes compiled"
        );
        Ok(Self {
            routes,
            errors,
            logging: config.logs.as_ref().map(LoggerRouting::new),
            access_log: AccessLog::new(),
            replacer: Arc::new(PlaceholderReplacer),
        })
    }

    /// Use a different placeholder replacer for every request
    pub fn with_replacer(mut self, replacer: Arc<dyn Replacer>) -> Self {
        self.replacer = replacer;
        self
    }

    pub fn access_log(&self) -> &AccessLog {
        &self.access_log
    }

    /// Run one request through the pipeline
    pub async fn handle(
        &self,
        request: Request<Bytes>,
        remote_addr: Option<SocketAddr>,
    ) -> Response<Full<Bytes>> {
        let tracker = self.access_log.start_request();
        let mut ctx = RequestContext::new(request).with_replacer(self.replacer.clone());
        if let Some(addr) = remote_addr {
            ctx = ctx.with_remote_addr(addr);
        }

        if let Err(err) = self.routes.execute(&mut ctx).await {
            self.handle_error(&mut ctx, err).await;
        }

        self.log_access(&ctx, &tracker);
        ctx.response.into_response()
    }

    async fn handle_error(&self, ctx: &mut RequestContext, err: PipelineError) {
        let values = log_values(&err);
        let field = |key: &str| {
            values
                .field(key)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };
        tracing::error!(
            status = values.status.as_u16(),
            err_id = %field("err_id"),
            err_trace = %field("err_trace"),
            method = %ctx.request.method,
            uri = %ctx.request.uri,
            "{}",
            values.message
        );

        let info = ErrorInfo::from(&HandlerError::from(err));
        ctx.log_fields.set("err_id", info.id.as_str());

        if ctx.response.is_committed() {
            tracing::debug!("Response already written, not running error routes");
            return;
        }

        let status = info.status;
        if !self.errors.is_empty() {
            let previous = ctx.error.replace(info);
            if let Err(e) = self.errors.execute(ctx).await {
                let values = log_values(&e);
                tracing::error!(
                    status = values.status.as_u16(),
                    "Error routes failed: {}",
                    values.message
                );
            }
            ctx.error = previous;
        }

        if !ctx.response.is_committed() {
            ctx.write_status(status);
        }
    }

    fn log_access(&self, ctx: &RequestContext, tracker: &RequestTracker) {
        let Some(routing) = &self.logging else {
            return;
        };
        if ctx.vars.log_skip() {
            return;
        }
        let host = ctx.host().unwrap_or_default();
        if routing.should_skip(host) {
            return;
        }
        for logger in routing.logger_names_for(host) {
            let entry = tracker.build_entry(ctx, &logger, routing.should_log_credentials());
            self.access_log.record(&entry);
        }
    }
}

/// HTTP server — binds the listen addresses and serves the pipeline
pub struct Server {
    listen: Vec<SocketAddr>,
    pipeline: Arc<Pipeline>,
    shutdown_timeout: Duration,
    stop: watch::Sender<bool>,
    shutdown: AtomicBool,
    handles: Mutex<Vec<JoinHandle<()>>>,
    local_addrs: Mutex<Vec<SocketAddr>>,
}

impl Server {
    /// Validate the configuration and compile its routes
    pub fn new(config: &PipelineConfig, registry: &HandlerRegistry) -> Result<Self> {
        config.validate()?;
        let (stop, _) = watch::channel(false);
        Ok(Self {
            listen: config.listen_addrs()?,
            pipeline: Arc::new(Pipeline::compile(config, registry)?),
            shutdown_timeout: Duration::from_secs(config.shutdown_timeout_secs),
            stop,
            shutdown: AtomicBool::new(false),
            handles: Mutex::new(Vec::new()),
            local_addrs: Mutex::new(Vec::new()),
        })
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// Bind every listen address and start accepting connections
    pub async fn start(&self) -> Result<()> {
        let mut handles = Vec::with_capacity(self.listen.len());
        let mut bound = Vec::with_capacity(self.listen.len());

        for addr in &self.listen {
            let listener = TcpListener::bind(addr)
                .await
                .map_err(|e| PipelineError::Other(format!("Failed to bind {}: {}", addr, e)))?;
            let local = listener.local_addr()?;
            tracing::info!(address = %local, "HTTP listener started");

            bound.push(local);
            handles.push(tokio::spawn(accept_loop(
                listener,
                self.pipeline.clone(),
                self.stop.subscribe(),
                self.shutdown_timeout,
            )));
        }

        *self.local_addrs.lock().unwrap_or_else(PoisonError::into_inner) = bound;
        *self.handles.lock().unwrap_or_else(PoisonError::into_inner) = handles;
        Ok(())
    }

    /// Addresses actually bound (resolves port 0)
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.local_addrs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Stop accepting and drain in-flight connections
    pub async fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("Server shutting down");
        let _ = self.stop.send(true);

        let handles: Vec<_> = self
            .handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for handle in handles {
            let _ = handle.await;
        }
        tracing::info!("Server stopped");
    }

    /// Wait for Ctrl+C, then shut down
    pub async fn wait_for_shutdown(&self) {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        }
        self.shutdown().await;
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

async fn accept_loop(
    listener: TcpListener,
    pipeline: Arc<Pipeline>,
    mut stop: watch::Receiver<bool>,
    drain_timeout: Duration,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = stop.changed() => break,
            accepted = listener.accept() => {
                let (stream, remote_addr) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to accept connection");
                        continue;
                    }
                };
                connections.spawn(serve_connection(
                    stream,
                    remote_addr,
                    pipeline.clone(),
                    stop.clone(),
                ));
            }
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    let drained = tokio::time::timeout(drain_timeout, async {
        while connections.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        tracing::warn!(
            remaining = connections.len(),
            "Shutdown timeout reached, closing open connections"
        );
    }
}

async fn serve_connection(
    stream: tokio::net::TcpStream,
    remote_addr: SocketAddr,
    pipeline: Arc<Pipeline>,
    mut stop: watch::Receiver<bool>,
) {
    let io = TokioIo::new(stream);
    let conn = http1::Builder::new().serve_connection(
        io,
        service_fn(move |req| serve_request(req, remote_addr, pipeline.clone())),
    );
    tokio::pin!(conn);

    let mut stopping = false;
    loop {
        tokio::select! {
            result = conn.as_mut() => {
                if let Err(e) = result {
                    tracing::debug!(error = %e, client = %remote_addr, "Connection closed with error");
                }
                break;
            }
            _ = stop.changed(), if !stopping => {
                stopping = true;
                conn.as_mut().graceful_shutdown();
            }
        }
    }
}

async fn serve_request(
    req: hyper::Request<Incoming>,
    remote_addr: SocketAddr,
    pipeline: Arc<Pipeline>,
) -> std::result::Result<Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            tracing::debug!(error = %e, "Failed to read request body");
            let mut response = Response::new(Full::new(Bytes::new()));
            *response.status_mut() = StatusCode::BAD_REQUEST;
            return Ok(response);
        }
    };

    Ok(pipeline
        .handle(Request::from_parts(parts, body), Some(remote_addr))
        .await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pipeline(config: serde_json::Value) -> Pipeline {
        let config: PipelineConfig = serde_json::from_value(config).unwrap();
        Pipeline::compile(&config, &HandlerRegistry::with_builtins()).unwrap()
    }

    fn request(host: &str, path: &str) -> Request<Bytes> {
        Request::builder()
            .uri(path)
            .header("Host", host)
            .body(Bytes::new())
            .unwrap()
    }

    async fn body_of(response: Response<Full<Bytes>>) -> (StatusCode, String) {
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_static_route() {
        let p = pipeline(json!({
            "routes": [
                {"match": [{"path": ["/hello"]}], "handle": [{"handler": "static_response", "body": "hi"}]}
            ]
        }));
        let (status, body) = body_of(p.handle(request("a.local", "/hello"), None).await).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "hi");
    }

    #[tokio::test]
    async fn test_unmatched_request_is_empty_200() {
        let p = pipeline(json!({"routes": []}));
        let (status, body) = body_of(p.handle(request("a.local", "/"), None).await).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_error_without_error_routes_writes_status() {
        let p = pipeline(json!({
            "routes": [{"handle": [{"handler": "error", "error": "nope", "status_code": 403}]}]
        }));
        let (status, body) = body_of(p.handle(request("a.local", "/"), None).await).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(body.is_empty(), "internal message must not leak: {}", body);
    }

    #[tokio::test]
    async fn test_error_routes_see_error_placeholders() {
        let p = pipeline(json!({
            "routes": [{"handle": [{"handler": "error", "error": "missing", "status_code": 404}]}],
            "errors": [{"handle": [{
                "handler": "static_response",
                "status_code": "{http.error.status_code}",
                "body": "{http.error.status_code} {http.error.status_text}"
            }]}]
        }));
        let (status, body) = body_of(p.handle(request("a.local", "/x"), None).await).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, "404 Not Found");
    }

    #[tokio::test]
    async fn test_failing_error_routes_fall_back_to_status() {
        let p = pipeline(json!({
            "routes": [{"handle": [{"handler": "error", "status_code": 502}]}],
            "errors": [{"handle": [{"handler": "error", "status_code": 500}]}]
        }));
        let (status, _) = body_of(p.handle(request("a.local", "/"), None).await).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_access_log_per_logger() {
        let p = pipeline(json!({
            "routes": [{"handle": [{"handler": "static_response", "body": "ok"}]}],
            "logs": {
                "default_logger_name": "main",
                "logger_mapping": {"*.example.com": ["edge", "audit"]},
                "skip_hosts": ["health.local"]
            }
        }));
        p.handle(request("a.example.com:443", "/"), None).await;
        assert_eq!(p.access_log().total_entries(), 2);
        p.handle(request("other.net", "/"), None).await;
        assert_eq!(p.access_log().total_entries(), 3);
        p.handle(request("health.local", "/"), None).await;
        assert_eq!(p.access_log().total_entries(), 3);
    }

    #[tokio::test]
    async fn test_log_skip_var() {
        let p = pipeline(json!({
            "routes": [{"handle": [
                {"handler": "vars", "log_skip": true},
                {"handler": "static_response", "body": "ok"}
            ]}],
            "logs": {"default_logger_name": "main"}
        }));
        p.handle(request("a.local", "/"), None).await;
        assert_eq!(p.access_log().total_entries(), 0);
    }

    #[tokio::test]
    async fn test_no_logs_config_disables_access_log() {
        let p = pipeline(json!({
            "routes": [{"handle": [{"handler": "static_response"}]}]
        }));
        p.handle(request("a.local", "/"), None).await;
        assert_eq!(p.access_log().total_entries(), 0);
    }

    #[test]
    fn test_compile_error_location() {
        let config: PipelineConfig = serde_json::from_value(json!({
            "errors": [{"handle": [{"handler": "bogus"}]}]
        }))
        .unwrap();
        let err = Pipeline::compile(&config, &HandlerRegistry::with_builtins())
            .err()
            .unwrap();
        assert!(err.to_string().contains("errors[0].handle[0]"), "{}", err);
    }

    #[tokio::test]
    async fn test_server_start_and_shutdown() {
        let config: PipelineConfig = serde_json::from_value(json!({
            "listen": ["127.0.0.1:0"],
            "shutdown_timeout_secs": 1
        }))
        .unwrap();
        let server = Server::new(&config, &HandlerRegistry::with_builtins()).unwrap();
        server.start().await.unwrap();
        let addrs = server.local_addrs();
        assert_eq!(addrs.len(), 1);
        assert_ne!(addrs[0].port(), 0);

        server.shutdown().await;
        assert!(server.is_shutdown());
        server.shutdown().await;
    }
}
