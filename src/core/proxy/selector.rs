//! Backend failover.
//!
//! Tries the configured endpoints strictly in order, one bounded attempt each,
//! and returns the first one that answers with any status. Nothing is cached
//! between calls.

use crate::config::{BackendEndpoint, Config, GatewayError, Result};
use bytes::Bytes;
use hyper::header::{CONTENT_TYPE, HeaderValue, SET_COOKIE};
use hyper::{HeaderMap, Method, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// An inbound call reduced to what is forwarded upstream.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: Method,
    /// Façade path including any query string.
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// A reachable endpoint and its unread response.
pub struct Selected<'a> {
    pub endpoint: &'a BackendEndpoint,
    pub response: reqwest::Response,
}

pub struct BackendSelector {
    client: reqwest::Client,
    endpoints: Vec<BackendEndpoint>,
}

impl BackendSelector {
    /// Creates a selector over `endpoints` in the given order.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Config` if the HTTP client cannot be built.
    pub fn new(endpoints: Vec<BackendEndpoint>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .no_proxy()
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .map_err(|e| GatewayError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, endpoints })
    }

    /// Creates a selector over the configured active backends.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Config` if the HTTP client cannot be built.
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(config.active_backends().cloned().collect())
    }

    #[must_use]
    pub fn endpoints(&self) -> &[BackendEndpoint] {
        &self.endpoints
    }

    /// Sends `request` to the first endpoint that answers.
    ///
    /// Only connection errors and timeouts move on to the next endpoint; an
    /// answer with any status, 5xx included, ends the search.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::BackendUnreachable` if every endpoint failed.
    pub async fn send(&self, request: &UpstreamRequest) -> Result<Selected<'_>> {
        for (attempt, endpoint) in self.endpoints.iter().enumerate() {
            let url = endpoint.url_for(&request.path_and_query);
            let mut builder = self
                .client
                .request(request.method.clone(), &url)
                .headers(request.headers.clone());
            if !request.body.is_empty() {
                builder = builder.body(request.body.clone());
            }

            match tokio::time::timeout(endpoint.timeout, builder.send()).await {
                Ok(Ok(response)) => {
                    debug!(
                        backend = %endpoint.base_url,
                        attempt = attempt + 1,
                        status = response.status().as_u16(),
                        "Backend answered"
                    );
                    return Ok(Selected { endpoint, response });
                }
                Ok(Err(e)) => {
                    warn!(
                        backend = %endpoint.base_url,
                        attempt = attempt + 1,
                        error = %e,
                        "Backend attempt failed"
                    );
                }
                Err(_) => {
                    warn!(
                        backend = %endpoint.base_url,
                        attempt = attempt + 1,
                        timeout_ms = timeout_ms(endpoint.timeout),
                        "Backend attempt timed out"
                    );
                }
            }
        }

        Err(GatewayError::BackendUnreachable {
            attempts: self.endpoints.len(),
        })
    }
}

/// A fully read upstream reply.
#[derive(Debug)]
pub struct UpstreamReply {
    pub status: StatusCode,
    pub content_type: Option<HeaderValue>,
    pub set_cookies: Vec<HeaderValue>,
    pub body: Bytes,
    /// Parsed body; `None` when the body is empty.
    pub json: Option<Value>,
}

impl UpstreamReply {
    /// Reads the whole body within the endpoint's timeout and checks it is JSON.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::MalformedUpstreamResponse` if the body cannot be
    /// read in time or is non-empty and not JSON.
    pub async fn read(selected: Selected<'_>) -> Result<Self> {
        let Selected { endpoint, response } = selected;
        let malformed = |reason: String| GatewayError::MalformedUpstreamResponse {
            endpoint: endpoint.base_url.clone(),
            reason,
        };

        let status = response.status();
        let content_type = response.headers().get(CONTENT_TYPE).cloned();
        let set_cookies = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .cloned()
            .collect();

        let body = match tokio::time::timeout(endpoint.timeout, response.bytes()).await {
            Ok(Ok(body)) => body,
            Ok(Err(e)) => return Err(malformed(e.to_string())),
            Err(_) => return Err(malformed("body read timed out".to_string())),
        };

        let json = if body.is_empty() {
            None
        } else {
            Some(serde_json::from_slice(&body).map_err(|e| malformed(e.to_string()))?)
        };

        Ok(Self {
            status,
            content_type,
            set_cookies,
            body,
            json,
        })
    }
}

fn timeout_ms(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)
}
