//! Middleware chain execution

use crate::request::Request;
use crate::response::Response;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// The continuation to the next link in the chain (or the handler itself).
pub type BoxedNext =
    Arc<dyn Fn(Request) -> Pin<Box<dyn Future<Output = Response> + Send + 'static>> + Send + Sync>;

/// Trait for middleware in the request chain.
///
/// Calling `next` advances the chain; not calling it short-circuits by
/// omission and the middleware's own response is final.
pub trait Middleware: Send + Sync + 'static {
    /// Apply this middleware to a request, calling `next` to continue.
    fn call(
        &self,
        req: Request,
        next: BoxedNext,
    ) -> Pin<Box<dyn Future<Output = Response> + Send + 'static>>;

    /// Clone this middleware into a boxed trait object
    fn clone_box(&self) -> Box<dyn Middleware>;
}

impl Clone for Box<dyn Middleware> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// An ordered chain of middleware.
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    links: Vec<Box<dyn Middleware>>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self { links: Vec::new() }
    }

    /// Add a link. Registration order is execution order (outermost first).
    pub fn push(&mut self, middleware: Box<dyn Middleware>) {
        self.links.push(middleware);
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    /// Execute the chain around a final handler.
    pub fn execute(
        &self,
        req: Request,
        handler: BoxedNext,
    ) -> Pin<Box<dyn Future<Output = Response> + Send + 'static>> {
        if self.links.is_empty() {
            return handler(req);
        }

        // Build the chain from the inside out so the first registered link
        // is the first to see the request.
        let mut next = handler;
        for link in self.links.iter().rev() {
            let link = link.clone_box();
            let inner = next;
            next = Arc::new(move |req: Request| {
                let link = link.clone_box();
                let inner = inner.clone();
                Box::pin(async move { link.call(req, inner).await })
                    as Pin<Box<dyn Future<Output = Response> + Send + 'static>>
            });
        }

        next(req)
    }
}

/// Adapt an async closure into a [`Middleware`].
pub fn from_fn<F, Fut>(f: F) -> FnMiddleware<F>
where
    F: Fn(Request, BoxedNext) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    FnMiddleware { f }
}

/// Closure-backed middleware, built with [`from_fn`].
pub struct FnMiddleware<F> {
    f: F,
}

impl<F: Clone> Clone for FnMiddleware<F> {
    fn clone(&self) -> Self {
        Self { f: self.f.clone() }
    }
}

impl<F, Fut> Middleware for FnMiddleware<F>
where
    F: Fn(Request, BoxedNext) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    fn call(
        &self,
        req: Request,
        next: BoxedNext,
    ) -> Pin<Box<dyn Future<Output = Response> + Send + 'static>> {
        Box::pin((self.f)(req, next))
    }

    fn clone_box(&self) -> Box<dyn Middleware> {
        Box::new(self.clone())
    }
}
