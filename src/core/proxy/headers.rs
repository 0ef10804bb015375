//! Security header injection.
//!
//! Strips backend fingerprinting headers and adds the fixed security set to
//! every façade response.

use hyper::HeaderMap;
use hyper::header::{
    CACHE_CONTROL, HeaderName, HeaderValue, REFERRER_POLICY, SERVER, STRICT_TRANSPORT_SECURITY,
    VIA, X_CONTENT_TYPE_OPTIONS, X_FRAME_OPTIONS,
};

const X_POWERED_BY: HeaderName = HeaderName::from_static("x-powered-by");

/// Injects standard security headers into a response header map.
pub fn inject_security_headers(headers: &mut HeaderMap) {
    headers.remove(SERVER);
    headers.remove(X_POWERED_BY);
    headers.remove(VIA);

    headers.insert(
        STRICT_TRANSPORT_SECURITY,
        HeaderValue::from_static("max-age=63072000; includeSubDomains; preload"),
    );
    headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    headers.insert(REFERRER_POLICY, HeaderValue::from_static("no-referrer"));
    headers.insert(X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
}

/// Marks a response as uncacheable.
pub fn inject_no_store(headers: &mut HeaderMap) {
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
}
