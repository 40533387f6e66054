//! Response types

use bytes::Bytes;
use http::{header, StatusCode};
use http_body_util::Full;

/// HTTP Response type
pub type Response = http::Response<Full<Bytes>>;

/// Build an empty-body response with the given status.
pub(crate) fn empty_response(status: StatusCode) -> Response {
    let mut response = http::Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}

/// Trait for types that can be converted into an HTTP response
pub trait IntoResponse {
    /// Convert self into a Response
    fn into_response(self) -> Response;
}

impl IntoResponse for Response {
    fn into_response(self) -> Response {
        self
    }
}

// () returns 200 OK with empty body
impl IntoResponse for () {
    fn into_response(self) -> Response {
        empty_response(StatusCode::OK)
    }
}

impl IntoResponse for &'static str {
    fn into_response(self) -> Response {
        let mut response = http::Response::new(Full::new(Bytes::from(self)));
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        response
    }
}

impl IntoResponse for String {
    fn into_response(self) -> Response {
        let mut response = http::Response::new(Full::new(Bytes::from(self)));
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        response
    }
}

impl IntoResponse for StatusCode {
    fn into_response(self) -> Response {
        empty_response(self)
    }
}

impl<R: IntoResponse> IntoResponse for (StatusCode, R) {
    fn into_response(self) -> Response {
        let mut response = self.1.into_response();
        *response.status_mut() = self.0;
        response
    }
}

impl<T: IntoResponse, E: IntoResponse> IntoResponse for Result<T, E> {
    fn into_response(self) -> Response {
        match self {
            Ok(v) => v.into_response(),
            Err(e) => e.into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn str_response_is_plain_text() {
        let response = "hello".into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/plain; charset=utf-8"
        );
    }

    #[test]
    fn status_tuple_overrides_status() {
        let response = (StatusCode::NOT_IMPLEMENTED, "nope").into_response();
        assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
    }
}
