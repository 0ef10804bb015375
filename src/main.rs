//! `HomeGate` - Edge gateway for the home security dashboard.
//!
//! Copyright (C) 2026 Maverick
//! SPDX-License-Identifier: AGPL-3.0-only
//!
//! Initializes the runtime, loads configuration, sets up logging, connects the
//! counter store and serves the façade until interrupted.

use homegate::{Config, Gateway, serve, store};

use std::process::ExitCode;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let (non_blocking, _guard) = tracing_appender::non_blocking(std::io::stdout());
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string());

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(non_blocking);

    if log_format.eq_ignore_ascii_case("pretty") {
        subscriber.init();
    } else {
        subscriber.json().init();
    }

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Gateway failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> homegate::Result<()> {
    let config = Config::from_env()?;
    info!(
        listen_addr = %config.listen_addr,
        backends = config.active_backends().count(),
        fallback_only = config.fallback_only,
        login_max_attempts = config.login_max_attempts,
        login_window_secs = config.login_window.as_secs(),
        session_ttl_secs = config.session_ttl.as_secs(),
        log_format = %config.log_format,
        "Server initialized"
    );

    let store = store::connect(&config).await?;
    let shutdown = CancellationToken::new();
    let gateway = Arc::new(Gateway::new(Arc::clone(&config), store, shutdown.clone())?);

    let listener = TcpListener::bind(config.listen_addr).await.map_err(|e| {
        homegate::GatewayError::Config(format!("failed to bind {}: {e}", config.listen_addr))
    })?;

    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown requested");
                signal.cancel();
            }
            Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
        }
    });

    serve(listener, gateway, config, shutdown).await;
    Ok(())
}
