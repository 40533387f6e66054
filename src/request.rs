//! Request type

use crate::logger::RequestLogger;
use bytes::Bytes;
use http::{request::Parts, Extensions, HeaderMap, Method, Uri, Version};
use std::collections::HashMap;
use std::sync::Arc;

/// Header consulted for the per-request id; a v4 UUID is generated when the
/// client did not supply one.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// HTTP Request wrapper
///
/// Carries the parsed request head, the buffered body, and the route
/// parameters the router matched.
pub struct Request {
    pub(crate) parts: Parts,
    pub(crate) body: Option<Bytes>,
    pub(crate) path_params: HashMap<String, String>,
}

impl Request {
    pub(crate) fn new(parts: Parts, body: Bytes, path_params: HashMap<String, String>) -> Self {
        Self {
            parts,
            body: Some(body),
            path_params,
        }
    }

    /// Get the HTTP method
    pub fn method(&self) -> &Method {
        &self.parts.method
    }

    /// Get the URI
    pub fn uri(&self) -> &Uri {
        &self.parts.uri
    }

    /// Get the HTTP version
    pub fn version(&self) -> Version {
        self.parts.version
    }

    /// Get the headers
    pub fn headers(&self) -> &HeaderMap {
        &self.parts.headers
    }

    /// Get mutable headers. Lifecycle hooks use this to annotate the request
    /// for downstream handlers.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.parts.headers
    }

    /// A single header value as a str, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.parts.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Get request extensions
    pub fn extensions(&self) -> &Extensions {
        &self.parts.extensions
    }

    /// Get mutable extensions
    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.parts.extensions
    }

    /// Get the request path
    pub fn path(&self) -> &str {
        self.parts.uri.path()
    }

    /// Get the query string
    pub fn query_string(&self) -> Option<&str> {
        self.parts.uri.query()
    }

    /// Take the body bytes (can only be called once)
    pub fn take_body(&mut self) -> Option<Bytes> {
        self.body.take()
    }

    /// Get path parameters
    pub fn path_params(&self) -> &HashMap<String, String> {
        &self.path_params
    }

    /// Get a specific path parameter
    pub fn path_param(&self, name: &str) -> Option<&String> {
        self.path_params.get(name)
    }

    pub(crate) fn set_path_params(&mut self, params: HashMap<String, String>) {
        self.path_params = params;
    }

    /// The logger handle attached to this request, or a stderr-backed
    /// fallback when none is attached (e.g. outside the pipeline).
    pub fn logger(&self) -> Arc<RequestLogger> {
        self.parts
            .extensions
            .get::<Arc<RequestLogger>>()
            .cloned()
            .unwrap_or_else(RequestLogger::fallback)
    }
}

impl Clone for Request {
    fn clone(&self) -> Self {
        // http::request::Parts cannot be constructed directly; go through a
        // throwaway request to rebuild one.
        let mut rebuilt = http::Request::new(());
        *rebuilt.method_mut() = self.parts.method.clone();
        *rebuilt.uri_mut() = self.parts.uri.clone();
        *rebuilt.version_mut() = self.parts.version;
        *rebuilt.headers_mut() = self.parts.headers.clone();
        *rebuilt.extensions_mut() = self.parts.extensions.clone();
        let (parts, _) = rebuilt.into_parts();

        Self {
            parts,
            body: self.body.clone(),
            path_params: self.path_params.clone(),
        }
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.parts.method)
            .field("uri", &self.parts.uri)
            .field("version", &self.parts.version)
            .finish()
    }
}
