//! Built-in health endpoint
//!
//! Registered on every server before user services, so a fresh server with no
//! services is still probeable.

use crate::request::Request;
use crate::response::{empty_response, Response};
use http::StatusCode;

/// Path of the built-in liveness probe.
pub const HEALTHZ: &str = "/-/healthz";

pub(crate) async fn healthz(_req: Request) -> Response {
    empty_response(StatusCode::OK)
}
