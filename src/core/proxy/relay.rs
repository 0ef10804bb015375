//! Event stream relay.
//!
//! Each client stream is served by its own task that drives
//! `Connecting -> Streaming -> Backoff -> Connecting` until the client goes
//! away or the process shuts down. Every upstream failure produces exactly one
//! error event before the backoff.

use crate::core::proxy::headers::inject_security_headers;
use crate::core::proxy::response::GatewayBody;
use crate::core::proxy::selector::{BackendSelector, Selected, UpstreamRequest};
use bytes::Bytes;
use http_body::{Body, Frame};
use http_body_util::BodyExt;
use hyper::Response;
use hyper::header::{CACHE_CONTROL, CONNECTION, CONTENT_TYPE, HeaderName, HeaderValue};
use serde_json::json;
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, warn};

/// Longest upstream line kept; longer lines are dropped whole.
pub const MAX_LINE_LEN: usize = 64 * 1024;

const CHANNEL_CAPACITY: usize = 32;

const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

/// Spawns relay tasks bound to the process shutdown token.
#[derive(Clone)]
pub struct EventRelay {
    selector: Arc<BackendSelector>,
    reconnect_delay: Duration,
    shutdown: CancellationToken,
}

impl EventRelay {
    #[must_use]
    pub const fn new(
        selector: Arc<BackendSelector>,
        reconnect_delay: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            selector,
            reconnect_delay,
            shutdown,
        }
    }

    /// Starts relaying `request` and returns the client-facing body.
    ///
    /// Dropping the body cancels the task.
    #[must_use]
    pub fn open(&self, request: UpstreamRequest) -> RelayBody {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let cancel = self.shutdown.child_token();

        let task = RelayTask {
            selector: Arc::clone(&self.selector),
            request,
            reconnect_delay: self.reconnect_delay,
            tx,
            cancel: cancel.clone(),
        };
        tokio::spawn(task.run());

        RelayBody {
            rx,
            _guard: cancel.drop_guard(),
        }
    }

    /// Wraps a relay body in an event-stream response.
    #[must_use]
    pub fn response(body: RelayBody) -> Response<GatewayBody> {
        let mut response = Response::new(body.boxed());
        let headers = response.headers_mut();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert(X_ACCEL_BUFFERING, HeaderValue::from_static("no"));
        inject_security_headers(headers);
        response
    }
}

/// Client-facing stream body fed by a relay task.
pub struct RelayBody {
    rx: mpsc::Receiver<Bytes>,
    _guard: DropGuard,
}

impl Body for RelayBody {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        self.rx
            .poll_recv(cx)
            .map(|event| event.map(|bytes| Ok(Frame::data(bytes))))
    }
}

enum RelayState {
    Connecting,
    Streaming(reqwest::Response),
    Backoff,
    Terminated,
}

struct RelayTask {
    selector: Arc<BackendSelector>,
    request: UpstreamRequest,
    reconnect_delay: Duration,
    tx: mpsc::Sender<Bytes>,
    cancel: CancellationToken,
}

impl RelayTask {
    async fn run(self) {
        let mut state = RelayState::Connecting;
        loop {
            state = match state {
                RelayState::Connecting => self.connect().await,
                RelayState::Streaming(response) => self.stream(response).await,
                RelayState::Backoff => self.backoff().await,
                RelayState::Terminated => break,
            };
        }
        debug!("Event relay stopped");
    }

    async fn connect(&self) -> RelayState {
        let attempt = tokio::select! {
            () = self.cancel.cancelled() => return RelayState::Terminated,
            attempt = self.selector.send(&self.request) => attempt,
        };

        match attempt {
            Ok(Selected { endpoint, response }) if response.status().is_success() => {
                debug!(backend = %endpoint.base_url, "Event stream connected");
                RelayState::Streaming(response)
            }
            Ok(Selected { response, .. }) => {
                self.fail(&format!("backend answered {}", response.status()))
                    .await
            }
            Err(e) => self.fail(&e.to_string()).await,
        }
    }

    async fn stream(&self, mut response: reqwest::Response) -> RelayState {
        let mut framer = EventFramer::default();
        loop {
            let chunk = tokio::select! {
                () = self.cancel.cancelled() => return RelayState::Terminated,
                chunk = response.chunk() => chunk,
            };

            match chunk {
                Ok(Some(bytes)) => {
                    for event in framer.push(&bytes) {
                        if !self.emit(event).await {
                            return RelayState::Terminated;
                        }
                    }
                }
                Ok(None) => return self.fail("upstream stream closed").await,
                Err(e) => return self.fail(&e.to_string()).await,
            }
        }
    }

    async fn backoff(&self) -> RelayState {
        tokio::select! {
            () = self.cancel.cancelled() => RelayState::Terminated,
            () = tokio::time::sleep(self.reconnect_delay) => RelayState::Connecting,
        }
    }

    async fn fail(&self, reason: &str) -> RelayState {
        warn!(reason = reason, "Event stream interrupted");
        if self.emit(error_event(reason)).await {
            RelayState::Backoff
        } else {
            RelayState::Terminated
        }
    }

    /// Returns `false` once the client is gone.
    async fn emit(&self, event: Bytes) -> bool {
        tokio::select! {
            () = self.cancel.cancelled() => false,
            sent = self.tx.send(event) => sent.is_ok(),
        }
    }
}

/// Synthetic event sent to the client when the upstream stream fails.
#[must_use]
pub fn error_event(reason: &str) -> Bytes {
    Bytes::from(format!("data: {}\n\n", json!({ "error": reason })))
}

/// Splits upstream bytes into lines and re-frames `data:` lines as events.
#[derive(Debug, Default)]
pub struct EventFramer {
    line: Vec<u8>,
    overflow: bool,
}

impl EventFramer {
    /// Feeds one chunk and returns the complete events it finished.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        let mut events = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            self.append(&rest[..pos]);
            if !self.overflow {
                events.extend(frame_line(&self.line));
            }
            self.line.clear();
            self.overflow = false;
            rest = &rest[pos + 1..];
        }
        self.append(rest);

        events
    }

    fn append(&mut self, bytes: &[u8]) {
        if self.overflow {
            return;
        }
        if self.line.len() + bytes.len() > MAX_LINE_LEN {
            warn!(limit = MAX_LINE_LEN, "Dropping oversized event line");
            self.line.clear();
            self.overflow = true;
            return;
        }
        self.line.extend_from_slice(bytes);
    }
}

fn frame_line(line: &[u8]) -> Option<Bytes> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let payload = line.strip_prefix(b"data:")?;
    let payload = payload.strip_prefix(b" ").unwrap_or(payload);

    let mut event = Vec::with_capacity(payload.len() + 8);
    event.extend_from_slice(b"data: ");
    event.extend_from_slice(payload);
    event.extend_from_slice(b"\n\n");
    Some(Bytes::from(event))
}
