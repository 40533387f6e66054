//! Middleware infrastructure
//!
//! Middleware wrap handler dispatch with continue-semantics: each link
//! receives the request and a `next` continuation. A link that never calls
//! `next` ends the chain there; there is no explicit abort signal.

mod chain;

pub use chain::{from_fn, BoxedNext, Middleware, MiddlewareChain};
