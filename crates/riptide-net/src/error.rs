//! Error types for the listener/acceptor subsystem.

use std::net::SocketAddr;
use std::path::PathBuf;

/// Errors raised while creating, starting, or reloading listeners.
///
/// Listener setup failures are fatal to the whole startup sequence: a
/// server silently running with fewer listeners than configured is a
/// deployment-visible misconfiguration.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// The configured address string did not parse.
    #[error("invalid listen address {address}:{port}")]
    InvalidAddress {
        /// Configured address string.
        address: String,
        /// Configured port.
        port: u16,
    },

    /// Binding or listening on an address failed.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// The address that could not be bound.
        addr: SocketAddr,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// A TLS listener was configured without certificate material and no
    /// global fallback was provided.
    #[error("TLS listener {address}:{port} has no certificate/key material")]
    MissingTlsMaterial {
        /// Configured address string.
        address: String,
        /// Configured port.
        port: u16,
    },

    /// A certificate or key file could not be read.
    #[error("failed to read TLS file {path}: {source}")]
    TlsFileRead {
        /// Path of the unreadable file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The key file contained no usable private key.
    #[error("no private key found in {path}")]
    NoPrivateKey {
        /// Path of the key file.
        path: PathBuf,
    },

    /// The TLS engine rejected the certificate/key material.
    #[error("TLS engine rejected material: {0}")]
    Tls(#[from] rustls::Error),

    /// Lifecycle calls arrived in the wrong order.
    #[error("listener manager is in the wrong state: {0}")]
    Lifecycle(&'static str),

    /// Spawning a reactor thread failed.
    #[error("failed to start reactor pool: {0}")]
    Reactor(#[source] std::io::Error),

    /// Any other I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Convenience result alias for listener operations.
pub type NetResult<T> = Result<T, NetError>;
