//! Service registration
//!
//! A service is a user-supplied unit that registers middleware, routes, and
//! lifecycle hooks at startup. Registration calls `init`, `middlewares`, and
//! `resources` in that fixed order, then collects the four optional hook
//! sequences. All services must be registered before the server starts
//! listening; hook and route state is read-only afterwards.

use crate::config::Config;
use crate::handler::Handler;
use crate::hooks::NamedHook;
use crate::middleware::{Middleware, MiddlewareChain};
use crate::router::MethodRouter;
use std::sync::{Arc, Mutex, PoisonError};

/// A pluggable unit of routes, middleware, and hooks.
///
/// The three required operations always run, in order, even for a service
/// that implements none of the optional hook producers. The hook producers
/// default to empty sequences; override any subset to contribute hooks to
/// the corresponding stage.
pub trait Service: Send + 'static {
    /// Configure the service and hand it its routing group. Always called
    /// first, exactly once.
    fn init(&mut self, config: &Config, group: RouteGroup);

    /// Register middleware onto the routing group. Registration order is
    /// execution order within the group.
    fn middlewares(&mut self);

    /// Register route handlers onto the routing group.
    fn resources(&mut self);

    /// Hooks to run when a request is received, before routing.
    fn request_received_hooks(&mut self) -> Vec<NamedHook> {
        Vec::new()
    }

    /// Hooks to run after routing, before handler dispatch.
    fn request_routed_hooks(&mut self) -> Vec<NamedHook> {
        Vec::new()
    }

    /// Hooks to run once the response is ready, before it is flushed.
    fn response_ready_hooks(&mut self) -> Vec<NamedHook> {
        Vec::new()
    }

    /// Hooks to run unconditionally after every request.
    fn response_always_hooks(&mut self) -> Vec<NamedHook> {
        Vec::new()
    }
}

#[derive(Default)]
struct GroupInner {
    chain: MiddlewareChain,
    routes: Vec<(String, MethodRouter)>,
}

/// A scoped handle for registering routes and middleware under a path
/// prefix.
///
/// Cheap to clone; a service typically stores the clone it receives in
/// `init` and registers against it from `middlewares` and `resources`.
#[derive(Clone)]
pub struct RouteGroup {
    prefix: String,
    inner: Arc<Mutex<GroupInner>>,
}

impl RouteGroup {
    pub(crate) fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            inner: Arc::new(Mutex::new(GroupInner::default())),
        }
    }

    /// The path prefix this group mounts under.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Register a middleware on this group.
    pub fn use_middleware<M: Middleware>(&self, middleware: M) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .chain
            .push(Box::new(middleware));
    }

    /// Register a method router at a path under this group's prefix.
    pub fn route(&self, path: &str, method_router: MethodRouter) {
        let full = join_path(&self.prefix, path);
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .routes
            .push((full, method_router));
    }

    /// Register a GET handler
    pub fn get<H: Handler>(&self, path: &str, handler: H) {
        self.route(path, crate::router::get(handler));
    }

    /// Register a POST handler
    pub fn post<H: Handler>(&self, path: &str, handler: H) {
        self.route(path, crate::router::post(handler));
    }

    /// Register a PUT handler
    pub fn put<H: Handler>(&self, path: &str, handler: H) {
        self.route(path, crate::router::put(handler));
    }

    /// Register a PATCH handler
    pub fn patch<H: Handler>(&self, path: &str, handler: H) {
        self.route(path, crate::router::patch(handler));
    }

    /// Register a DELETE handler
    pub fn delete<H: Handler>(&self, path: &str, handler: H) {
        self.route(path, crate::router::delete(handler));
    }

    /// Drain the collected middleware chain and routes.
    pub(crate) fn into_parts(self) -> (MiddlewareChain, Vec<(String, MethodRouter)>) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let drained = std::mem::take(&mut *inner);
        (drained.chain, drained.routes)
    }
}

fn join_path(prefix: &str, path: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        if prefix.is_empty() {
            "/".to_string()
        } else {
            prefix.to_string()
        }
    } else {
        format!("{}/{}", prefix, path)
    }
}
