//! TCP accept loop and PROXY protocol handling.
//!
//! Serves HTTP/1.1 connections under a concurrency limit. With PROXY protocol
//! enabled, the client origin is taken from the v1/v2 header sent by the load
//! balancer, falling back to the TCP peer when the header is absent or invalid.
//! A connection that sends neither a PROXY header nor a request head within
//! `client_header_timeout` is dropped and its permit released.

use crate::config::Config;
use crate::core::proxy::service::Gateway;
use hyper::Request;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::{TokioIo, TokioTimer};
use proxy_header::{ParseConfig, ProxyHeader};
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Large enough for a v1 header and a v2 header with common TLVs.
const PROXY_HEADER_PEEK: usize = 512;

/// Accepts connections until `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    gateway: Arc<Gateway>,
    config: Arc<Config>,
    shutdown: CancellationToken,
) {
    if let Ok(addr) = listener.local_addr() {
        info!(
            listen_addr = %addr,
            proxy_protocol = config.proxy_protocol,
            concurrency_limit = config.concurrency_limit,
            "Gateway listening"
        );
    }

    let connection_limit = Arc::new(Semaphore::new(config.concurrency_limit));

    loop {
        let permit = tokio::select! {
            () = shutdown.cancelled() => break,
            permit = Arc::clone(&connection_limit).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let accepted = tokio::select! {
            () = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer_addr)) => {
                let gateway = Arc::clone(&gateway);
                let proxy_protocol = config.proxy_protocol;
                let header_timeout = config.client_header_timeout;
                tokio::spawn(async move {
                    let _permit = permit;
                    configure_tcp_stream(&stream);
                    let (stream, origin) = if proxy_protocol {
                        match tokio::time::timeout(
                            header_timeout,
                            read_proxy_header(stream, peer_addr),
                        )
                        .await
                        {
                            Ok(accepted) => accepted,
                            Err(_) => {
                                debug!(peer_addr = %peer_addr, "PROXY header timed out");
                                return;
                            }
                        }
                    } else {
                        (stream, peer_addr.ip())
                    };
                    handle_connection(stream, origin, gateway, header_timeout).await;
                });
            }
            Err(e) => {
                error!(error = %e, "Accept error");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }

    info!("Listener stopped");
}

async fn handle_connection(
    stream: TcpStream,
    origin: IpAddr,
    gateway: Arc<Gateway>,
    header_timeout: Duration,
) {
    let service = service_fn(move |req: Request<Incoming>| {
        let gateway = Arc::clone(&gateway);
        async move { Ok::<_, Infallible>(gateway.handle(req, origin).await) }
    });

    if let Err(e) = http1::Builder::new()
        .timer(TokioTimer::new())
        .header_read_timeout(header_timeout)
        .serve_connection(TokioIo::new(stream), service)
        .await
    {
        debug!(origin = %origin, error = %e, "Connection error");
    }
}

fn configure_tcp_stream(stream: &TcpStream) {
    let sock = socket2::SockRef::from(stream);

    let _ = stream.set_nodelay(true);

    let mut ka = socket2::TcpKeepalive::new()
        .with_time(Duration::from_secs(60))
        .with_interval(Duration::from_secs(10));

    #[cfg(not(target_os = "openbsd"))]
    {
        ka = ka.with_retries(3);
    }

    let _ = sock.set_tcp_keepalive(&ka);
}

/// Consumes a leading PROXY header and returns the origin it names.
async fn read_proxy_header(mut stream: TcpStream, peer_addr: SocketAddr) -> (TcpStream, IpAddr) {
    let mut buf = [0u8; PROXY_HEADER_PEEK];
    let n = match stream.peek(&mut buf).await {
        Ok(n) if n > 0 => n,
        _ => return (stream, peer_addr.ip()),
    };

    let Some((consumed, source)) = parse_proxy_header(&buf[..n]) else {
        debug!(peer_addr = %peer_addr, "No PROXY header, using peer address");
        return (stream, peer_addr.ip());
    };

    let mut discard = vec![0u8; consumed];
    if stream.read_exact(&mut discard).await.is_err() {
        return (stream, peer_addr.ip());
    }

    (stream, source.map_or_else(|| peer_addr.ip(), |addr| addr.ip()))
}

/// Returns the header length and the proxied source, if the header carries one.
fn parse_proxy_header(buf: &[u8]) -> Option<(usize, Option<SocketAddr>)> {
    match ProxyHeader::parse(buf, ParseConfig::default()) {
        Ok((header, consumed)) => {
            let source = header.proxied_address().map(|addr| addr.source);
            debug!(source = ?source, "PROXY header parsed");
            Some((consumed, source))
        }
        Err(e) => {
            debug!(error = ?e, "PROXY header parse failed");
            None
        }
    }
}
