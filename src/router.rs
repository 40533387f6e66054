//! Route matching, backed by a matchit radix tree
//!
//! Paths use `{param}` placeholders:
//!
//! - `/users` - static path
//! - `/users/{id}` - single parameter
//! - `/users/{user_id}/posts/{post_id}` - multiple parameters

use crate::handler::{into_boxed_handler, BoxedHandler, Handler};
use crate::middleware::MiddlewareChain;
use http::Method;
use matchit::Router as MatchitRouter;
use std::collections::HashMap;

/// HTTP method router for a single path
#[derive(Default)]
pub struct MethodRouter {
    handlers: HashMap<Method, BoxedHandler>,
}

impl Clone for MethodRouter {
    fn clone(&self) -> Self {
        Self {
            handlers: self.handlers.clone(),
        }
    }
}

impl MethodRouter {
    pub fn new() -> Self {
        Self::default()
    }

    fn on(mut self, method: Method, handler: BoxedHandler) -> Self {
        self.handlers.insert(method, handler);
        self
    }

    /// Chain a GET handler onto this path
    pub fn get<H: Handler>(self, handler: H) -> Self {
        self.on(Method::GET, into_boxed_handler(handler))
    }

    /// Chain a POST handler onto this path
    pub fn post<H: Handler>(self, handler: H) -> Self {
        self.on(Method::POST, into_boxed_handler(handler))
    }

    /// Chain a PUT handler onto this path
    pub fn put<H: Handler>(self, handler: H) -> Self {
        self.on(Method::PUT, into_boxed_handler(handler))
    }

    /// Chain a PATCH handler onto this path
    pub fn patch<H: Handler>(self, handler: H) -> Self {
        self.on(Method::PATCH, into_boxed_handler(handler))
    }

    /// Chain a DELETE handler onto this path
    pub fn delete<H: Handler>(self, handler: H) -> Self {
        self.on(Method::DELETE, into_boxed_handler(handler))
    }

    pub(crate) fn get_handler(&self, method: &Method) -> Option<&BoxedHandler> {
        self.handlers.get(method)
    }

    /// Allowed methods for a 405 response
    pub(crate) fn allowed_methods(&self) -> Vec<Method> {
        self.handlers.keys().cloned().collect()
    }

    /// Merge another method router into this one. Later registrations win on
    /// method collisions.
    pub(crate) fn merge(&mut self, other: MethodRouter) {
        self.handlers.extend(other.handlers);
    }

    /// Wrap every handler with a middleware chain.
    pub(crate) fn layered(self, chain: &MiddlewareChain) -> MethodRouter {
        if chain.is_empty() {
            return self;
        }
        let handlers = self
            .handlers
            .into_iter()
            .map(|(method, handler)| {
                let chain = chain.clone();
                let wrapped: BoxedHandler =
                    std::sync::Arc::new(move |req| chain.execute(req, handler.clone()));
                (method, wrapped)
            })
            .collect();
        MethodRouter { handlers }
    }
}

/// Create a GET route handler
pub fn get<H: Handler>(handler: H) -> MethodRouter {
    MethodRouter::new().get(handler)
}

/// Create a POST route handler
pub fn post<H: Handler>(handler: H) -> MethodRouter {
    MethodRouter::new().post(handler)
}

/// Create a PUT route handler
pub fn put<H: Handler>(handler: H) -> MethodRouter {
    MethodRouter::new().put(handler)
}

/// Create a PATCH route handler
pub fn patch<H: Handler>(handler: H) -> MethodRouter {
    MethodRouter::new().patch(handler)
}

/// Create a DELETE route handler
pub fn delete<H: Handler>(handler: H) -> MethodRouter {
    MethodRouter::new().delete(handler)
}

/// Main router
pub(crate) struct Router {
    inner: MatchitRouter<MethodRouter>,
    routes: HashMap<String, MethodRouter>,
}

impl Router {
    pub fn new() -> Self {
        Self {
            inner: MatchitRouter::new(),
            routes: HashMap::new(),
        }
    }

    /// Register (or merge into) a path. Registration happens before the
    /// server starts listening, so the rebuild cost is irrelevant.
    pub fn route(&mut self, path: &str, method_router: MethodRouter) {
        let key = convert_path_params(path);
        self.routes.entry(key).or_default().merge(method_router);
        self.rebuild();
    }

    fn rebuild(&mut self) {
        let mut inner = MatchitRouter::new();
        for (path, method_router) in &self.routes {
            if let Err(err) = inner.insert(path.clone(), method_router.clone()) {
                panic!("conflicting route {}: {}", path, err);
            }
        }
        self.inner = inner;
    }

    /// Match a request path and method against the registered routes.
    pub fn match_route(&self, path: &str, method: &Method) -> RouteMatch {
        match self.inner.at(path) {
            Ok(matched) => {
                if let Some(handler) = matched.value.get_handler(method) {
                    let params: HashMap<String, String> = matched
                        .params
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect();
                    RouteMatch::Found {
                        handler: handler.clone(),
                        params,
                    }
                } else {
                    RouteMatch::MethodNotAllowed {
                        allowed: matched.value.allowed_methods(),
                    }
                }
            }
            Err(_) => RouteMatch::NotFound,
        }
    }
}

/// Result of route matching
pub(crate) enum RouteMatch {
    Found {
        handler: BoxedHandler,
        params: HashMap<String, String>,
    },
    NotFound,
    MethodNotAllowed {
        allowed: Vec<Method>,
    },
}

/// Convert `{param}` style to `:param` for matchit
fn convert_path_params(path: &str) -> String {
    let mut result = String::with_capacity(path.len());
    for ch in path.chars() {
        match ch {
            '{' => result.push(':'),
            '}' => {}
            _ => result.push(ch),
        }
    }
    result
}
