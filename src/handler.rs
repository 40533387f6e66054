//! Handler trait and utilities

use crate::middleware::BoxedNext;
use crate::request::Request;
use crate::response::{IntoResponse, Response};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Trait representing an async handler function.
///
/// Implemented for any `async fn(Request) -> impl IntoResponse` (and cloneable
/// closures of the same shape).
pub trait Handler: Clone + Send + Sync + Sized + 'static {
    /// The response future
    type Future: Future<Output = Response> + Send + 'static;

    /// Call the handler with the request
    fn call(self, req: Request) -> Self::Future;
}

impl<F, Fut, Res> Handler for F
where
    F: FnOnce(Request) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Res> + Send + 'static,
    Res: IntoResponse,
{
    type Future = Pin<Box<dyn Future<Output = Response> + Send>>;

    fn call(self, req: Request) -> Self::Future {
        Box::pin(async move { self(req).await.into_response() })
    }
}

// Type-erased handler for storage in the router. Identical in shape to a
// middleware continuation, so a stored handler can terminate a chain.
pub(crate) type BoxedHandler = BoxedNext;

/// Create a boxed handler from any Handler
pub(crate) fn into_boxed_handler<H: Handler>(handler: H) -> BoxedHandler {
    Arc::new(move |req| {
        let handler = handler.clone();
        Box::pin(async move { handler.call(req).await })
    })
}
