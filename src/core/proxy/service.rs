//! Gateway service logic.
//!
//! Composes routing, login limiting, sessions, backend failover and the event
//! relay into one request handler.

use crate::config::{Config, GatewayError, Result, retry_after_secs};
use crate::core::middleware::{
    LoginRateLimiter, SESSION_COOKIE_NAME, SessionManager, SessionStatus, strip_cookie, unix_now,
};
use crate::core::proxy::headers::inject_no_store;
use crate::core::proxy::relay::EventRelay;
use crate::core::proxy::response::{
    GatewayBody, append_cookie, error_response, json_response, passthrough,
};
use crate::core::proxy::router::{RouteKind, classify};
use crate::core::proxy::selector::{BackendSelector, UpstreamReply, UpstreamRequest};
use crate::store::CounterStore;
use bytes::Bytes;
use http_body::Body;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::header::{ACCEPT, CONTENT_TYPE, COOKIE, HeaderName, HeaderValue};
use hyper::http::request::Parts;
use hyper::{HeaderMap, Request, Response, StatusCode};
use serde_json::{Value, json};
use std::net::IpAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// Main gateway service.
pub struct Gateway {
    config: Arc<Config>,
    selector: Arc<BackendSelector>,
    limiter: LoginRateLimiter,
    sessions: SessionManager,
    relay: EventRelay,
}

impl Gateway {
    /// Creates a new `Gateway`.
    ///
    /// Event streams end when `shutdown` is cancelled.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Config` if the upstream HTTP client cannot be built.
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn CounterStore>,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let selector = Arc::new(BackendSelector::from_config(&config)?);
        let limiter = LoginRateLimiter::new(store, config.login_max_attempts, config.login_window);
        let sessions = SessionManager::new(&config.session_secret, config.session_ttl);
        let relay = EventRelay::new(Arc::clone(&selector), config.sse_reconnect_delay, shutdown);

        Ok(Self {
            config,
            selector,
            limiter,
            sessions,
            relay,
        })
    }

    /// Serves one inbound request from client `origin`. Never fails: errors are
    /// rendered as envelopes.
    pub async fn handle<B>(&self, req: Request<B>, origin: IpAddr) -> Response<GatewayBody>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        let route = classify(&method, &path);
        let is_auth = route.as_ref().is_ok_and(|route| route.is_auth());
        let result = match route {
            Ok(route) => self.dispatch(route, req, origin).await,
            Err(e) => Err(e),
        };

        let mut response = result.unwrap_or_else(|e| error_response(&e));
        if is_auth {
            inject_no_store(response.headers_mut());
        }

        let status = response.status().as_u16();
        if response.status().is_server_error() {
            warn!(
                http_method = %method,
                http_path = %path,
                origin = %origin,
                status = status,
                "Request error"
            );
        } else {
            debug!(
                http_method = %method,
                http_path = %path,
                origin = %origin,
                status = status,
                "Request completed"
            );
        }
        response
    }

    async fn dispatch<B>(
        &self,
        route: RouteKind,
        req: Request<B>,
        origin: IpAddr,
    ) -> Result<Response<GatewayBody>>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let (parts, body) = req.into_parts();

        match route {
            RouteKind::SessionCheck => Ok(self.session_check(&parts.headers)),
            RouteKind::EventStream => Ok(self.event_stream(&parts, origin)),
            RouteKind::Login => {
                let body = self.read_json_body(body).await?;
                self.login(&parts, body, origin).await
            }
            RouteKind::Logout => {
                // The session is cleared even when the body is unusable.
                let body = self.read_json_body(body).await.unwrap_or_else(|e| {
                    debug!(origin = %origin, error = %e, "Ignoring logout body");
                    Bytes::new()
                });
                Ok(self.logout(&parts, body, origin).await)
            }
            RouteKind::Forward { protected } => {
                if protected {
                    if let Err(response) = self.require_session(&parts.headers) {
                        return Ok(response);
                    }
                }
                let body = self.read_json_body(body).await?;
                let reply = self.forward(&upstream_request(&parts, body, origin)).await?;
                Ok(reply_response(reply))
            }
        }
    }

    async fn login(
        &self,
        parts: &Parts,
        body: Bytes,
        origin: IpAddr,
    ) -> Result<Response<GatewayBody>> {
        let credentials: Value = serde_json::from_slice(&body)
            .map_err(|_| GatewayError::BadRequest("login body must be a JSON object".into()))?;
        let email = credentials
            .get("email")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|email| !email.is_empty())
            .ok_or_else(|| GatewayError::BadRequest("email is required".into()))?
            .to_string();
        let device_id = credentials
            .get("device_id")
            .and_then(Value::as_str)
            .map(str::to_string);

        let check = self.limiter.check(&email, origin).await?;
        if !check.allowed {
            warn!(
                origin = %origin,
                retry_after = retry_after_secs(check.retry_after),
                action = "RATE_LIMIT",
                "Login attempt blocked"
            );
            return Err(GatewayError::RateLimited {
                retry_after: check.retry_after,
            });
        }

        let reply = self.forward(&upstream_request(parts, body, origin)).await?;

        if reply.status.is_success() {
            if let Err(e) = self.limiter.record_success(&email, origin).await {
                warn!(origin = %origin, error = %e, "Failed to clear login counter");
            }
            let device_id = device_id.or_else(|| reply_device_id(reply.json.as_ref()));
            let (_, cookie) = self.sessions.issue(&email, device_id, unix_now())?;
            info!(origin = %origin, action = "LOGIN", "Session issued");

            let mut response = reply_response(reply);
            append_cookie(&mut response, &cookie);
            return Ok(response);
        }

        if reply.status.is_client_error() {
            match self.limiter.record_failure(&email, origin).await {
                Ok(attempts) => {
                    info!(origin = %origin, attempts = attempts, "Login rejected by backend");
                }
                Err(e) => warn!(origin = %origin, error = %e, "Failed to record login failure"),
            }
        }
        Ok(reply_response(reply))
    }

    async fn logout(&self, parts: &Parts, body: Bytes, origin: IpAddr) -> Response<GatewayBody> {
        let mut response = match self.forward(&upstream_request(parts, body, origin)).await {
            Ok(reply) => reply_response(reply),
            Err(e) => {
                warn!(
                    origin = %origin,
                    error = %e,
                    "Backend logout failed, clearing session locally"
                );
                json_response(StatusCode::OK, &json!({ "message": "Logged out" }))
            }
        };
        append_cookie(&mut response, &self.sessions.clear_cookie());
        response
    }

    fn session_check(&self, headers: &HeaderMap) -> Response<GatewayBody> {
        let now = unix_now();
        match self.sessions.check(headers, now) {
            SessionStatus::Authenticated(session) => json_response(
                StatusCode::OK,
                &json!({
                    "logged_in": true,
                    "email": session.email,
                    "device_id": session.device_id,
                    "expires_in": session.expires_in(now, self.sessions.ttl()),
                }),
            ),
            status => {
                let err = GatewayError::SessionInvalid;
                let mut response = json_response(
                    StatusCode::UNAUTHORIZED,
                    &json!({
                        "logged_in": false,
                        "error": err.code(),
                        "message": err.to_string(),
                    }),
                );
                if status.needs_clearing() {
                    append_cookie(&mut response, &self.sessions.clear_cookie());
                }
                response
            }
        }
    }

    fn event_stream(&self, parts: &Parts, origin: IpAddr) -> Response<GatewayBody> {
        if let Err(response) = self.require_session(&parts.headers) {
            return response;
        }

        let mut upstream = upstream_request(parts, Bytes::new(), origin);
        upstream
            .headers
            .insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        debug!(origin = %origin, "Opening event stream");
        EventRelay::response(self.relay.open(upstream))
    }

    /// Rejects requests without a valid session, clearing stale cookies.
    fn require_session(
        &self,
        headers: &HeaderMap,
    ) -> std::result::Result<(), Response<GatewayBody>> {
        let status = self.sessions.check(headers, unix_now());
        if status.session().is_some() {
            return Ok(());
        }

        let mut response = error_response(&GatewayError::SessionInvalid);
        if status.needs_clearing() {
            append_cookie(&mut response, &self.sessions.clear_cookie());
        }
        Err(response)
    }

    async fn forward(&self, upstream: &UpstreamRequest) -> Result<UpstreamReply> {
        let selected = self.selector.send(upstream).await?;
        UpstreamReply::read(selected).await
    }

    /// Reads the body under the size cap; non-empty bodies must be JSON.
    async fn read_json_body<B>(&self, body: B) -> Result<Bytes>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let limit = self.config.client_max_body_size;
        let bytes = match Limited::new(body, limit).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) if e.is::<LengthLimitError>() => {
                return Err(GatewayError::PayloadTooLarge { limit });
            }
            Err(e) => return Err(GatewayError::BadRequest(format!("unreadable body: {e}"))),
        };

        if !bytes.is_empty() && serde_json::from_slice::<serde::de::IgnoredAny>(&bytes).is_err() {
            return Err(GatewayError::BadRequest("body must be JSON".into()));
        }
        Ok(bytes)
    }
}

/// Builds the upstream call: same method and path, JSON-relevant headers, the
/// client's cookies minus the gateway session, and the client origin.
fn upstream_request(parts: &Parts, body: Bytes, origin: IpAddr) -> UpstreamRequest {
    let mut headers = HeaderMap::new();
    for name in [CONTENT_TYPE, ACCEPT] {
        if let Some(value) = parts.headers.get(&name) {
            headers.insert(name, value.clone());
        }
    }
    if let Some(cookies) = strip_cookie(&parts.headers, SESSION_COOKIE_NAME)
        .and_then(|c| HeaderValue::from_str(&c).ok())
    {
        headers.insert(COOKIE, cookies);
    }
    if let Ok(origin) = HeaderValue::from_str(&origin.to_string()) {
        headers.insert(X_FORWARDED_FOR, origin);
    }

    let path_and_query = parts
        .uri
        .path_and_query()
        .map_or_else(|| parts.uri.path().to_string(), ToString::to_string);

    UpstreamRequest {
        method: parts.method.clone(),
        path_and_query,
        headers,
        body,
    }
}

fn reply_response(reply: UpstreamReply) -> Response<GatewayBody> {
    passthrough(
        reply.status,
        reply.content_type.as_ref(),
        &reply.set_cookies,
        reply.body,
    )
}

/// Device id reported by the backend, either top-level or under `user`.
fn reply_device_id(json: Option<&Value>) -> Option<String> {
    let json = json?;
    json.get("device_id")
        .or_else(|| json.get("user").and_then(|user| user.get("device_id")))
        .and_then(Value::as_str)
        .map(str::to_string)
}
