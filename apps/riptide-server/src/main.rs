//! Riptide Server - event-driven HTTP server.
//!
//! Binds one or more plaintext and TLS listeners across a fixed pool of
//! reactor threads and answers requests with a minimal demo responder.
//! Routing, templating, and the rest of the application surface are
//! external collaborators; this binary wires configuration into the
//! listener manager and handles process signals.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `LISTEN` | `0.0.0.0:8080` | Comma-separated plaintext `ip:port` pairs |
//! | `TLS_LISTEN` | *(empty)* | Comma-separated TLS `ip:port` pairs |
//! | `TLS_CERT` | *(unset)* | Global fallback certificate path |
//! | `TLS_KEY` | *(unset)* | Global fallback private key path |
//! | `IO_LOOPS` | `0` (one per core) | Reactor thread count |
//! | `LOG_LEVEL` | `info` | Log level filter |
//! | `RUST_LOG` | *(unset)* | Fine-grained tracing filter (overrides `LOG_LEVEL`) |
//!
//! On Unix, `SIGHUP` re-reads the TLS certificate/key material for every
//! TLS listener without interrupting established connections.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use riptide_core::ServerConfig;
use riptide_http::Request;
use riptide_net::{IoLoopPool, ListenerConfig, ListenerManager};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Server version reported in the demo response.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the tracing subscriber.
///
/// Uses `RUST_LOG` if set, otherwise falls back to the `LOG_LEVEL` config value.
fn init_tracing(log_level: &str) -> Result<()> {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::try_new(log_level)
            .with_context(|| format!("invalid log level filter: {log_level}"))?
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    Ok(())
}

/// Parse a comma-separated `ip:port` list into listener configs.
fn parse_listen_value(raw: &str, use_tls: bool) -> Result<Vec<ListenerConfig>> {
    let mut configs = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (ip, port) = entry
            .rsplit_once(':')
            .with_context(|| format!("listen entry `{entry}` is not ip:port"))?;
        let port: u16 = port
            .parse()
            .with_context(|| format!("invalid port in listen entry `{entry}`"))?;
        let config = ListenerConfig::new(ip.trim_matches(['[', ']']), port);
        configs.push(if use_tls {
            config.with_global_tls()
        } else {
            config
        });
    }
    Ok(configs)
}

/// Build the listener set from `LISTEN` / `TLS_LISTEN`.
fn listener_configs_from_env() -> Result<Vec<ListenerConfig>> {
    let plain = std::env::var("LISTEN").unwrap_or_else(|_| "0.0.0.0:8080".to_owned());
    let tls = std::env::var("TLS_LISTEN").unwrap_or_default();

    let mut configs = parse_listen_value(&plain, false)?;
    configs.extend(parse_listen_value(&tls, true)?);
    if configs.is_empty() {
        anyhow::bail!("no listeners configured. Check the LISTEN environment variable.");
    }
    Ok(configs)
}

/// Global TLS fallback material from `TLS_CERT` / `TLS_KEY`.
fn global_tls_from_env() -> (Option<PathBuf>, Option<PathBuf>) {
    (
        std::env::var_os("TLS_CERT").map(PathBuf::from),
        std::env::var_os("TLS_KEY").map(PathBuf::from),
    )
}

/// Demo dispatch collaborator: answers every request with a small status
/// payload. Response serialization is the collaborator's own concern —
/// the listener subsystem only transports the returned bytes.
fn respond(request: Request) -> Bytes {
    let body = format!(
        "riptide {VERSION}: {} {} from {}\n",
        request.method(),
        request.path(),
        request
            .peer_addr()
            .map_or_else(|| "unknown".to_owned(), |a| a.to_string()),
    );
    let connection = if request.keep_alive() {
        "keep-alive"
    } else {
        "close"
    };
    Bytes::from(format!(
        "HTTP/1.1 200 OK\r\ncontent-type: text/plain\r\ncontent-length: {}\r\nconnection: {connection}\r\n\r\n{body}",
        body.len(),
    ))
}

/// Wait for shutdown, reloading TLS material on SIGHUP (Unix).
async fn wait_for_signals(manager: &ListenerManager) {
    #[cfg(unix)]
    {
        let mut hangup = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())
        {
            Ok(signal) => signal,
            Err(e) => {
                warn!(error = %e, "cannot install SIGHUP handler");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                _ = hangup.recv() => {
                    info!("SIGHUP received, reloading TLS material");
                    if let Err(e) = manager.reload_tls_files() {
                        error!(error = %e, "TLS reload failed, previous material stays active");
                    }
                }
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        let _ = manager;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServerConfig::from_env().context("invalid configuration")?;
    init_tracing(&config.log_level)?;

    let listeners = listener_configs_from_env()?;
    let (global_cert, global_key) = global_tls_from_env();

    let pool = Arc::new(
        IoLoopPool::new(config.effective_io_loops()).context("failed to start reactor pool")?,
    );
    info!(reactors = pool.len(), version = VERSION, "starting riptide server");

    let manager = ListenerManager::new(config);
    manager
        .set_dispatch_callback(Arc::new(respond))
        .context("failed to install dispatch callback")?;

    for listener in listeners {
        manager
            .add_listener_config(listener)
            .context("failed to register listener")?;
    }

    manager
        .create_listeners(global_cert.as_deref(), global_key.as_deref(), &[], pool)
        .context("listener setup failed")?;

    for addr in manager.bound_addrs()? {
        info!(%addr, "listener bound");
    }

    manager.start_listening().context("failed to start listening")?;

    wait_for_signals(&manager).await;

    info!("shutting down");
    manager.stop_listening();
    Ok(())
}
