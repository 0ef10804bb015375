//! HTTP response utilities.
//!
//! Builds the façade's own replies: JSON bodies, the uniform error envelope and
//! verbatim passthrough of upstream replies.

use crate::config::{GatewayError, retry_after_secs};
use crate::core::proxy::headers::inject_security_headers;
use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::header::{CONTENT_TYPE, HeaderValue, RETRY_AFTER, SET_COOKIE};
use hyper::{Response, StatusCode};
use serde_json::{Value, json};
use std::convert::Infallible;
use tracing::warn;

pub type GatewayBody = BoxBody<Bytes, Infallible>;

const JSON_CONTENT_TYPE: &str = "application/json";

#[must_use]
pub fn full(body: impl Into<Bytes>) -> GatewayBody {
    Full::new(body.into()).boxed()
}

/// Serves a JSON reply with security headers.
#[must_use]
pub fn json_response(status: StatusCode, body: &Value) -> Response<GatewayBody> {
    let mut response = Response::new(full(body.to_string()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
    inject_security_headers(response.headers_mut());
    response
}

/// HTTP status for an error.
#[must_use]
pub const fn error_status(err: &GatewayError) -> StatusCode {
    match err {
        GatewayError::Config(_) | GatewayError::Crypto(_) => StatusCode::INTERNAL_SERVER_ERROR,
        GatewayError::BackendUnreachable { .. }
        | GatewayError::MalformedUpstreamResponse { .. } => StatusCode::BAD_GATEWAY,
        GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        GatewayError::SessionInvalid => StatusCode::UNAUTHORIZED,
        GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
        GatewayError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
        GatewayError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
        GatewayError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Renders an error as the uniform `{"error", "message"}` envelope.
#[must_use]
pub fn error_response(err: &GatewayError) -> Response<GatewayBody> {
    let status = error_status(err);
    let message = match err {
        GatewayError::Config(_) | GatewayError::Crypto(_) => {
            warn!(error = %err, "Internal error");
            "internal error".to_string()
        }
        GatewayError::MalformedUpstreamResponse { .. } => "no backend reachable".to_string(),
        _ => err.to_string(),
    };

    let mut body = json!({ "error": err.code(), "message": message });
    let retry_after = match err {
        GatewayError::RateLimited { retry_after } => Some(retry_after_secs(*retry_after)),
        _ => None,
    };
    if let Some(secs) = retry_after {
        body["retry_after"] = json!(secs);
    }

    let mut response = json_response(status, &body);
    if let Some(secs) = retry_after {
        response
            .headers_mut()
            .insert(RETRY_AFTER, HeaderValue::from(secs));
    }
    response
}

/// Relays an upstream reply: status, body, content type and every `Set-Cookie`.
#[must_use]
pub fn passthrough(
    status: StatusCode,
    content_type: Option<&HeaderValue>,
    set_cookies: &[HeaderValue],
    body: Bytes,
) -> Response<GatewayBody> {
    let mut response = Response::new(full(body));
    *response.status_mut() = status;

    let headers = response.headers_mut();
    if let Some(content_type) = content_type {
        headers.insert(CONTENT_TYPE, content_type.clone());
    }
    for cookie in set_cookies {
        headers.append(SET_COOKIE, cookie.clone());
    }
    inject_security_headers(headers);
    response
}

/// Appends a `Set-Cookie` value, skipping values that are not valid header text.
pub fn append_cookie(response: &mut Response<GatewayBody>, cookie: &str) {
    if let Ok(value) = HeaderValue::from_str(cookie) {
        response.headers_mut().append(SET_COOKIE, value);
    }
}
