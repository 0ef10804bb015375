//! Test utilities and shared configuration.
//!
//! This module provides common helpers for unit and integration tests,
//! reducing duplication across the codebase.

#[cfg(any(test, feature = "testing"))]
use crate::config::{BackendEndpoint, BackendRole, Config};
#[cfg(any(test, feature = "testing"))]
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
#[cfg(any(test, feature = "testing"))]
use std::sync::Arc;
#[cfg(any(test, feature = "testing"))]
use std::time::Duration;

/// Creates a standard configuration for testing purposes.
///
/// This configuration has:
/// - A single primary backend on localhost:9000
/// - 5 attempts per 900 s login window
/// - 3600 s sessions
/// - A short event relay backoff
#[cfg(any(test, feature = "testing"))]
#[must_use]
pub fn create_test_config() -> Arc<Config> {
    Arc::new(Config {
        listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
        backends: vec![BackendEndpoint {
            base_url: "http://127.0.0.1:9000".to_string(),
            role: BackendRole::Primary,
            timeout: Duration::from_secs(2),
        }],
        fallback_only: false,
        login_max_attempts: 5,
        login_window: Duration::from_secs(900),
        session_ttl: Duration::from_secs(3600),
        session_secret: "0000000000000000000000000000000000000000000000000000000000000000"
            .to_string(),
        sse_reconnect_delay: Duration::from_millis(100),
        counter_store_url: None,
        proxy_protocol: false,
        concurrency_limit: 64,
        client_max_body_size: 4096,
        client_header_timeout: Duration::from_secs(2),
        log_format: "pretty".to_string(),
    })
}

/// Builds ordered primary endpoints for the given base URLs.
#[cfg(any(test, feature = "testing"))]
#[must_use]
pub fn endpoints(urls: &[String], timeout: Duration) -> Vec<BackendEndpoint> {
    urls.iter()
        .map(|url| BackendEndpoint {
            base_url: url.clone(),
            role: BackendRole::Primary,
            timeout,
        })
        .collect()
}

/// A loopback HTTP backend that counts the requests it serves.
#[cfg(any(test, feature = "testing"))]
pub struct MockBackend {
    pub url: String,
    pub hits: Arc<std::sync::atomic::AtomicUsize>,
}

#[cfg(any(test, feature = "testing"))]
impl MockBackend {
    #[must_use]
    pub fn hits(&self) -> usize {
        self.hits.load(std::sync::atomic::Ordering::SeqCst)
    }
}

/// Spawns a hyper backend answering every request with `handler`.
///
/// # Panics
///
/// Panics if no loopback port can be bound.
#[cfg(any(test, feature = "testing"))]
pub async fn spawn_backend<F>(handler: F) -> MockBackend
where
    F: Fn(hyper::Request<bytes::Bytes>) -> hyper::Response<http_body_util::Full<bytes::Bytes>>
        + Send
        + Sync
        + 'static,
{
    use http_body_util::BodyExt;
    use hyper::body::Incoming;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper_util::rt::TokioIo;
    use std::sync::atomic::{AtomicUsize, Ordering};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let hits = Arc::new(AtomicUsize::new(0));
    let handler = Arc::new(handler);

    let counter = Arc::clone(&hits);
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let handler = Arc::clone(&handler);
            let counter = Arc::clone(&counter);
            tokio::spawn(async move {
                let service = service_fn(move |req: hyper::Request<Incoming>| {
                    let handler = Arc::clone(&handler);
                    let counter = Arc::clone(&counter);
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        let (parts, body) = req.into_parts();
                        let body = body
                            .collect()
                            .await
                            .map(http_body_util::Collected::to_bytes)
                            .unwrap_or_default();
                        Ok::<_, std::convert::Infallible>(handler(hyper::Request::from_parts(
                            parts, body,
                        )))
                    }
                });
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });

    MockBackend { url, hits }
}

/// Builds a mock reply with a JSON body.
///
/// # Panics
///
/// Panics if `status` is not a valid HTTP status code.
#[cfg(any(test, feature = "testing"))]
#[must_use]
pub fn json_reply(status: u16, body: &str) -> hyper::Response<http_body_util::Full<bytes::Bytes>> {
    hyper::Response::builder()
        .status(status)
        .header(hyper::header::CONTENT_TYPE, "application/json")
        .body(http_body_util::Full::new(bytes::Bytes::from(body.to_string())))
        .unwrap()
}

/// Base URL of a loopback port with nothing listening on it.
///
/// # Panics
///
/// Panics if no loopback port can be bound.
#[cfg(any(test, feature = "testing"))]
pub async fn dead_endpoint() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

/// Base URL of a backend that accepts connections and never answers.
///
/// # Panics
///
/// Panics if no loopback port can be bound.
#[cfg(any(test, feature = "testing"))]
pub async fn stalled_endpoint() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    format!("http://{addr}")
}
