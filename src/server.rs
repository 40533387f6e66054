//! HTTP server and request pipeline
//!
//! One task per connection. Each request walks the same fixed pipeline:
//! RequestReceived hooks, routing, RequestRouted hooks, logger acquisition,
//! middleware + handler dispatch, ResponseReady hooks, flush, and finally the
//! ResponseAlways hooks and logger release, which run on every path out of
//! the pipeline including panic recovery.

use crate::config::Config;
use crate::error::{Result, ServerError};
use crate::handler::Handler;
use crate::health::{healthz, HEALTHZ};
use crate::hooks::{HookRegistry, HookStage};
use crate::logger::{LoggerPool, RequestLogger};
use crate::request::{Request, REQUEST_ID_HEADER};
use crate::response::{empty_response, Response};
use crate::router::{MethodRouter, RouteMatch, Router};
use crate::service::{RouteGroup, Service};
use bytes::Bytes;
use futures_util::FutureExt;
use http::{header, StatusCode};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use http_body_util::BodyExt;
use std::collections::HashMap;
use std::convert::Infallible;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::net::{TcpListener, UnixListener};
use tokio::sync::Notify;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

/// Application server.
///
/// Built from a [`Config`], populated with routes and services, then consumed
/// by [`run`](AppServer::run). All registration must happen before `run`;
/// route and hook state is read-only once the server is listening.
pub struct AppServer {
    config: Config,
    router: Router,
    hooks: HookRegistry,
    pool: Arc<LoggerPool>,
    address: Arc<RwLock<String>>,
    shutdown: Arc<Notify>,
}

impl AppServer {
    /// Create a server from a config.
    ///
    /// Opens the logger sink; an unopenable sink is startup-fatal and
    /// surfaces here rather than at request time.
    pub fn new(config: Config) -> Result<Self> {
        // Initialize tracing if not already done
        let _ = tracing_subscriber::registry()
            .with(
                EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| EnvFilter::new("info,gantry=debug")),
            )
            .with(tracing_subscriber::fmt::layer())
            .try_init();

        let pool = LoggerPool::new(&config.logger.output, &config.logger.filename)?;

        let mut router = Router::new();
        router.route(HEALTHZ, crate::router::get(healthz));

        Ok(Self {
            config,
            router,
            hooks: HookRegistry::new(),
            pool: Arc::new(pool),
            address: Arc::new(RwLock::new(String::new())),
            shutdown: Arc::new(Notify::new()),
        })
    }

    /// The config this server was built from.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Register a method router at a path.
    pub fn route(mut self, path: &str, method_router: MethodRouter) -> Self {
        self.router.route(path, method_router);
        self
    }

    /// Register a GET handler
    pub fn get<H: Handler>(self, path: &str, handler: H) -> Self {
        self.route(path, crate::router::get(handler))
    }

    /// Register a POST handler
    pub fn post<H: Handler>(self, path: &str, handler: H) -> Self {
        self.route(path, crate::router::post(handler))
    }

    /// Register a PUT handler
    pub fn put<H: Handler>(self, path: &str, handler: H) -> Self {
        self.route(path, crate::router::put(handler))
    }

    /// Register a PATCH handler
    pub fn patch<H: Handler>(self, path: &str, handler: H) -> Self {
        self.route(path, crate::router::patch(handler))
    }

    /// Register a DELETE handler
    pub fn delete<H: Handler>(self, path: &str, handler: H) -> Self {
        self.route(path, crate::router::delete(handler))
    }

    /// Register a service.
    ///
    /// Calls `init`, `middlewares`, `resources` in that order, mounts the
    /// group's routes with its middleware chain wrapped around every handler,
    /// then appends the service's hook contributions to the four stages.
    /// Hooks from multiple services concatenate in registration order.
    pub fn register_service<S: Service>(mut self, mut service: S) -> Self {
        let group = RouteGroup::new("/");
        service.init(&self.config, group.clone());
        service.middlewares();
        service.resources();

        let (chain, routes) = group.into_parts();
        for (path, method_router) in routes {
            self.router.route(&path, method_router.layered(&chain));
        }

        self.hooks
            .append(HookStage::RequestReceived, service.request_received_hooks());
        self.hooks
            .append(HookStage::RequestRouted, service.request_routed_hooks());
        self.hooks
            .append(HookStage::ResponseReady, service.response_ready_hooks());
        self.hooks
            .append(HookStage::ResponseAlways, service.response_always_hooks());
        self
    }

    /// A handle for observing the bound address and stopping the server.
    /// Valid across the consuming [`run`](AppServer::run) call.
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            address: self.address.clone(),
            shutdown: self.shutdown.clone(),
        }
    }

    /// Bind the configured listener and serve until stopped.
    ///
    /// A configured unix socket path takes precedence over tcp. The bound
    /// address is published to [`ServerHandle::address`] only after binding
    /// completes; with tcp port 0 the published address carries the resolved
    /// ephemeral port.
    pub async fn run(self) -> Result<()> {
        match self.config.server.unix.clone() {
            Some(path) => self.run_unix(&path).await,
            None => {
                let addr = format!("{}:{}", self.config.server.addr, self.config.server.port);
                let listener =
                    TcpListener::bind(&addr)
                        .await
                        .map_err(|source| ServerError::Bind { addr, source })?;
                self.serve(listener).await
            }
        }
    }

    /// Serve on an externally supplied tcp listener.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let local = listener.local_addr()?.to_string();
        let shutdown = self.shutdown.clone();
        let pipeline = self.into_pipeline(&local);
        info!(addr = %local, "server listening");

        loop {
            tokio::select! {
                _ = shutdown.notified() => break Ok(()),
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => spawn_connection(pipeline.clone(), stream),
                    Err(err) => break Err(ServerError::Io(err)),
                },
            }
        }
    }

    async fn run_unix(self, path: &str) -> Result<()> {
        // Stale socket files from a previous run block the bind.
        if std::path::Path::new(path).exists() {
            std::fs::remove_file(path).map_err(|source| ServerError::Bind {
                addr: path.to_string(),
                source,
            })?;
        }
        let listener = UnixListener::bind(path).map_err(|source| ServerError::Bind {
            addr: path.to_string(),
            source,
        })?;

        let shutdown = self.shutdown.clone();
        let pipeline = self.into_pipeline(path);
        info!(path = %path, "server listening on unix socket");

        let result = loop {
            tokio::select! {
                _ = shutdown.notified() => break Ok(()),
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => spawn_connection(pipeline.clone(), stream),
                    Err(err) => break Err(ServerError::Io(err)),
                },
            }
        };

        let _ = std::fs::remove_file(path);
        result
    }

    fn into_pipeline(self, address: &str) -> Arc<Pipeline> {
        *self
            .address
            .write()
            .unwrap_or_else(PoisonError::into_inner) = address.to_string();
        Arc::new(Pipeline {
            router: self.router,
            hooks: self.hooks,
            pool: self.pool,
        })
    }
}

/// Observer/control handle for a running server.
#[derive(Clone)]
pub struct ServerHandle {
    address: Arc<RwLock<String>>,
    shutdown: Arc<Notify>,
}

impl ServerHandle {
    /// The bound address: `host:port` for tcp, the socket path for unix.
    /// Empty until the listener is bound; callers needing the address poll
    /// until it is non-empty.
    pub fn address(&self) -> String {
        self.address
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Stop the accept loop. In-flight connections finish on their own
    /// tasks. Idempotent; a stop issued before the listener is bound is
    /// honored as soon as the accept loop starts.
    pub fn stop(&self) {
        self.shutdown.notify_one();
    }
}

/// Read-only request-processing state shared by all connection tasks.
struct Pipeline {
    router: Router,
    hooks: HookRegistry,
    pool: Arc<LoggerPool>,
}

fn spawn_connection<S>(pipeline: Arc<Pipeline>, stream: S)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let io = TokioIo::new(stream);
        let service = service_fn(move |req: hyper::Request<Incoming>| {
            let pipeline = pipeline.clone();
            async move {
                let response = handle_request(pipeline, req).await;
                Ok::<_, Infallible>(response)
            }
        });

        if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
            error!("connection error: {}", err);
        }
    });
}

/// Handle a single HTTP request
async fn handle_request(pipeline: Arc<Pipeline>, req: hyper::Request<Incoming>) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let start = std::time::Instant::now();

    let (parts, body) = req.into_parts();
    let mut logger = None;
    let (mut request, mut response) = match body.collect().await {
        Ok(collected) => {
            let mut request = Request::new(parts, collected.to_bytes(), HashMap::new());
            let response = run_guarded(&pipeline, &mut request, &mut logger).await;
            (request, response)
        }
        Err(err) => {
            // An unreadable body skips the pipeline but not the
            // always-stage below.
            warn!(method = %method, path = %path, "failed to read request body: {}", err);
            (
                Request::new(parts, Bytes::new(), HashMap::new()),
                empty_response(StatusCode::BAD_REQUEST),
            )
        }
    };

    // ResponseAlways runs on every path out of the stages above, return
    // value ignored.
    let _ = pipeline
        .hooks
        .run_stage(HookStage::ResponseAlways, &mut response, &mut request);

    if let Some(handle) = logger {
        pipeline.pool.release(handle);
    }

    log_request(&method, &path, response.status(), start);
    response
}

/// Panic boundary around [`run_stages`]. Hooks and handlers are third-party
/// code; a panic anywhere in routing, the hook stages, or dispatch becomes a
/// plain 500 so the always-stage and logger release still run. A handle
/// acquired before the panic stays in the `logger` slot for release.
async fn run_guarded(
    pipeline: &Pipeline,
    request: &mut Request,
    logger: &mut Option<Arc<RequestLogger>>,
) -> Response {
    match AssertUnwindSafe(run_stages(pipeline, request, logger))
        .catch_unwind()
        .await
    {
        Ok(response) => response,
        Err(_) => {
            error!(method = %request.method(), path = %request.path(), "request pipeline panicked");
            empty_response(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Steps 1-6 of the pipeline: receive hooks, routing, routed hooks, logger
/// acquisition, dispatch, ready hooks. Every early return still flows
/// through the always-stage and logger release in [`handle_request`];
/// panics unwind into [`run_guarded`].
async fn run_stages(
    pipeline: &Pipeline,
    request: &mut Request,
    logger: &mut Option<Arc<RequestLogger>>,
) -> Response {
    // Hooks before dispatch write into a pending response; an aborting hook
    // owns it and it becomes final.
    let mut pending = empty_response(StatusCode::OK);
    if !pipeline
        .hooks
        .run_stage(HookStage::RequestReceived, &mut pending, request)
    {
        return pending;
    }

    // Routing. A miss still walks the remaining stages; the prepared
    // not-found response stands in for handler output.
    let dispatch = match pipeline.router.match_route(request.path(), request.method()) {
        RouteMatch::Found { handler, params } => {
            request.set_path_params(params);
            Ok(handler)
        }
        RouteMatch::NotFound => Err(empty_response(StatusCode::NOT_FOUND)),
        RouteMatch::MethodNotAllowed { allowed } => {
            let mut response = empty_response(StatusCode::METHOD_NOT_ALLOWED);
            let joined = allowed
                .iter()
                .map(|m| m.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            if let Ok(value) = joined.parse() {
                response.headers_mut().insert(header::ALLOW, value);
            }
            Err(response)
        }
    };

    if !pipeline
        .hooks
        .run_stage(HookStage::RequestRouted, &mut pending, request)
    {
        return pending;
    }

    // Logger handle keyed by the client-supplied request id, or a generated
    // one. Attached to the request so handlers and middleware can retrieve
    // it; released by the caller once the request is done.
    let request_id = request
        .header(REQUEST_ID_HEADER)
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let handle = pipeline.pool.acquire(&request_id);
    request.extensions_mut().insert(handle.clone());
    *logger = Some(handle);

    let mut response = match dispatch {
        Ok(handler) => handler(request.clone()).await,
        Err(miss) => miss,
    };

    // Headers the routing-stage hooks wrote carry over onto the final
    // response.
    let carried = std::mem::take(pending.headers_mut());
    for (name, value) in carried.iter() {
        response.headers_mut().append(name.clone(), value.clone());
    }

    // Advisory: a false return stops the remaining ready-hooks but the
    // response is flushed regardless.
    let _ = pipeline
        .hooks
        .run_stage(HookStage::ResponseReady, &mut response, request);

    response
}

/// Log request completion
fn log_request(method: &http::Method, path: &str, status: StatusCode, start: std::time::Instant) {
    let elapsed = start.elapsed();

    if status.is_server_error() {
        error!(
            method = %method,
            path = %path,
            status = %status.as_u16(),
            duration_ms = %elapsed.as_millis(),
            "request failed"
        );
    } else {
        info!(
            method = %method,
            path = %path,
            status = %status.as_u16(),
            duration_ms = %elapsed.as_millis(),
            "request completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::NamedHook;
    use bytes::Bytes;

    fn null_server() -> AppServer {
        let config = Config::from_str(r#"{"logger": {"output": "nil"}}"#).unwrap();
        AppServer::new(config).unwrap()
    }

    fn make_request(method: http::Method, path: &str) -> Request {
        let req = http::Request::builder()
            .method(method)
            .uri(path)
            .body(())
            .unwrap();
        let (parts, _) = req.into_parts();
        Request::new(parts, Bytes::new(), HashMap::new())
    }

    struct HookedService;

    impl Service for HookedService {
        fn init(&mut self, _config: &Config, _group: RouteGroup) {}
        fn middlewares(&mut self) {}
        fn resources(&mut self) {}
        fn request_received_hooks(&mut self) -> Vec<NamedHook> {
            vec![NamedHook::new("received@test", |_res, _req| true)]
        }
        fn response_always_hooks(&mut self) -> Vec<NamedHook> {
            vec![NamedHook::new("always@test", |_res, _req| true)]
        }
    }

    #[test]
    fn address_is_empty_before_binding() {
        let server = null_server();
        assert_eq!(server.handle().address(), "");
    }

    #[test]
    fn service_hooks_merge_into_stages() {
        let server = null_server()
            .register_service(HookedService)
            .register_service(HookedService);
        assert_eq!(server.hooks.len(HookStage::RequestReceived), 2);
        assert_eq!(server.hooks.len(HookStage::ResponseAlways), 2);
        assert!(server.hooks.is_empty(HookStage::RequestRouted));
    }

    #[tokio::test]
    async fn pipeline_serves_healthz() {
        let server = null_server();
        let pipeline = server.into_pipeline("test");

        let mut request = make_request(http::Method::GET, HEALTHZ);
        let mut logger = None;
        let response = run_guarded(&pipeline, &mut request, &mut logger).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert!(logger.is_some());
    }

    #[tokio::test]
    async fn unrouted_path_is_not_found_with_logger() {
        let server = null_server();
        let pipeline = server.into_pipeline("test");

        let mut request = make_request(http::Method::GET, "/missing");
        let mut logger = None;
        let response = run_guarded(&pipeline, &mut request, &mut logger).await;

        // Misses still walk the later stages, so a logger was acquired.
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(logger.is_some());
    }

    #[tokio::test]
    async fn wrong_method_reports_allow_header() {
        let server = null_server();
        let pipeline = server.into_pipeline("test");

        let mut request = make_request(http::Method::POST, HEALTHZ);
        let mut logger = None;
        let response = run_guarded(&pipeline, &mut request, &mut logger).await;

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers().get(header::ALLOW).unwrap(), "GET");
    }

    #[tokio::test]
    async fn aborting_received_hook_owns_the_response() {
        struct Abort;
        impl Service for Abort {
            fn init(&mut self, _config: &Config, _group: RouteGroup) {}
            fn middlewares(&mut self) {}
            fn resources(&mut self) {}
            fn request_received_hooks(&mut self) -> Vec<NamedHook> {
                vec![NamedHook::new("reject@test", |res: &mut Response, _req: &mut Request| {
                    *res.status_mut() = StatusCode::FORBIDDEN;
                    false
                })]
            }
        }

        let server = null_server().register_service(Abort);
        let pipeline = server.into_pipeline("test");

        let mut request = make_request(http::Method::GET, HEALTHZ);
        let mut logger = None;
        let response = run_guarded(&pipeline, &mut request, &mut logger).await;

        // Aborted before routing, so no logger was ever acquired.
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(logger.is_none());
    }

    #[tokio::test]
    async fn panicking_handler_becomes_server_error() {
        let server = null_server().get("/boom", |_req: Request| async {
            panic!("kaboom");
            #[allow(unreachable_code)]
            StatusCode::OK
        });
        let pipeline = server.into_pipeline("test");

        let mut request = make_request(http::Method::GET, "/boom");
        let mut logger = None;
        let response = run_guarded(&pipeline, &mut request, &mut logger).await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(logger.is_some());
    }

    #[tokio::test]
    async fn panicking_ready_hook_becomes_server_error() {
        struct Exploding;
        impl Service for Exploding {
            fn init(&mut self, _config: &Config, _group: RouteGroup) {}
            fn middlewares(&mut self) {}
            fn resources(&mut self) {}
            fn response_ready_hooks(&mut self) -> Vec<NamedHook> {
                vec![NamedHook::new("explode@test", |_res, _req| {
                    panic!("ready hook blew up")
                })]
            }
        }

        let server = null_server().register_service(Exploding);
        let pipeline = server.into_pipeline("test");

        let mut request = make_request(http::Method::GET, HEALTHZ);
        let mut logger = None;
        let response = run_guarded(&pipeline, &mut request, &mut logger).await;

        // The handle was acquired before the ready stage ran, so it still
        // comes back for release.
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(logger.is_some());
    }
}
