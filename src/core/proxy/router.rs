//! Façade route table.
//!
//! Maps an inbound method and path onto the handler that owns it. Everything the
//! gateway does not answer itself mirrors the same path on the backend.

use crate::config::{GatewayError, Result};
use hyper::Method;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
    Login,
    Logout,
    SessionCheck,
    EventStream,
    /// Pass-through to the backend; `protected` routes need a valid session.
    Forward { protected: bool },
}

impl RouteKind {
    /// Routes whose replies must never be cached by the browser.
    #[must_use]
    pub const fn is_auth(self) -> bool {
        matches!(self, Self::Login | Self::Logout | Self::SessionCheck)
    }
}

pub const LOGIN_PATH: &str = "/api/auth/login";
pub const LOGOUT_PATH: &str = "/api/auth/logout";
pub const SESSION_PATH: &str = "/api/auth/session";
pub const EVENTS_PATH: &str = "/api/sse/alerts";

const PUBLIC: RouteKind = RouteKind::Forward { protected: false };
const PROTECTED: RouteKind = RouteKind::Forward { protected: true };

const ROUTES: &[(&str, Method, RouteKind)] = &[
    (LOGIN_PATH, Method::POST, RouteKind::Login),
    (LOGOUT_PATH, Method::POST, RouteKind::Logout),
    (SESSION_PATH, Method::GET, RouteKind::SessionCheck),
    ("/api/auth/register", Method::POST, PUBLIC),
    ("/api/password-resets/request", Method::POST, PUBLIC),
    ("/api/password-resets/reset", Method::POST, PUBLIC),
    ("/api/health", Method::GET, PUBLIC),
    ("/api/users/me", Method::GET, PROTECTED),
    ("/api/users/email", Method::PUT, PROTECTED),
    ("/api/users/phone", Method::PUT, PROTECTED),
    ("/api/users/password", Method::PUT, PROTECTED),
    ("/api/devices/me", Method::GET, PROTECTED),
    ("/api/devices/status", Method::GET, PROTECTED),
    ("/api/alerts", Method::GET, PROTECTED),
    (EVENTS_PATH, Method::GET, RouteKind::EventStream),
];

/// Classifies a request path (without query).
///
/// # Errors
///
/// Returns `NotFound` for paths outside the façade and `MethodNotAllowed` when the
/// path exists under a different method.
pub fn classify(method: &Method, path: &str) -> Result<RouteKind> {
    let path = normalize_path(path);
    let mut path_known = false;

    for (route, route_method, kind) in ROUTES {
        if *route != path {
            continue;
        }
        if route_method == method {
            return Ok(*kind);
        }
        path_known = true;
    }

    if path_known {
        Err(GatewayError::MethodNotAllowed {
            method: method.to_string(),
            path: path.to_string(),
        })
    } else {
        Err(GatewayError::NotFound(path.to_string()))
    }
}

fn normalize_path(path: &str) -> &str {
    match path.strip_suffix('/') {
        Some(stripped) if !stripped.is_empty() => stripped,
        _ => path,
    }
}
