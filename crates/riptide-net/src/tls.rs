//! TLS material: loading, holding, and hot-swapping certificates.
//!
//! Each TLS listener owns a [`TlsMaterial`]: the cert/key paths it was
//! configured with plus the currently active `rustls::ServerConfig`
//! behind an [`ArcSwap`]. New handshakes snapshot the current config, so
//! a [`TlsMaterial::reload`] affects connections accepted afterwards
//! while handshakes already in flight keep the material they started
//! with. A failed reload leaves the previous material active.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::TlsAcceptor;
use tracing::{info, warn};

use crate::error::{NetError, NetResult};

/// Certificate/key material for one TLS listener, hot-swappable.
pub struct TlsMaterial {
    cert_path: PathBuf,
    key_path: PathBuf,
    options: Vec<(String, String)>,
    active: ArcSwap<rustls::ServerConfig>,
}

impl std::fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsMaterial")
            .field("cert_path", &self.cert_path)
            .field("key_path", &self.key_path)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl TlsMaterial {
    /// Read the certificate chain and private key and build the initial
    /// server config.
    pub fn load(
        cert_path: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
        options: Vec<(String, String)>,
        allow_legacy_tls: bool,
    ) -> NetResult<Self> {
        let cert_path = cert_path.into();
        let key_path = key_path.into();
        if allow_legacy_tls {
            warn!(
                cert = %cert_path.display(),
                "pre-1.2 TLS requested but unsupported by the TLS engine; serving TLS 1.2+"
            );
        }
        let config = build_server_config(&cert_path, &key_path, &options)?;
        Ok(Self {
            cert_path,
            key_path,
            options,
            active: ArcSwap::from_pointee(config),
        })
    }

    /// Re-read the certificate and key files, swapping the active config
    /// only if the new material is valid.
    ///
    /// On failure the previously active material stays in place and
    /// in-flight handshakes are unaffected either way.
    pub fn reload(&self) -> NetResult<()> {
        let config = build_server_config(&self.cert_path, &self.key_path, &self.options)?;
        self.active.store(Arc::new(config));
        info!(
            cert = %self.cert_path.display(),
            key = %self.key_path.display(),
            "TLS material reloaded"
        );
        Ok(())
    }

    /// Acceptor over a snapshot of the currently active config.
    ///
    /// Each accepted connection takes its own snapshot; the swap in
    /// [`reload`](Self::reload) never mutates a handshake in progress.
    #[must_use]
    pub fn acceptor(&self) -> TlsAcceptor {
        TlsAcceptor::from(self.active.load_full())
    }

    /// Snapshot of the active config (used by tests and diagnostics).
    #[must_use]
    pub fn current(&self) -> Arc<rustls::ServerConfig> {
        self.active.load_full()
    }
}

/// Build a `rustls::ServerConfig` from PEM files plus engine options.
fn build_server_config(
    cert_path: &Path,
    key_path: &Path,
    options: &[(String, String)],
) -> NetResult<rustls::ServerConfig> {
    let certs = read_cert_chain(cert_path)?;
    let key = read_private_key(key_path)?;

    let mut config = rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()?
    .with_no_client_auth()
    .with_single_cert(certs, key)?;

    apply_options(&mut config, options);
    Ok(config)
}

/// Apply recognized `(directive, value)` options to a server config.
///
/// The engine has no OpenSSL-style conf-command surface; only `alpn`
/// (comma-separated protocol list) is interpreted. Unknown directives are
/// logged and skipped.
fn apply_options(config: &mut rustls::ServerConfig, options: &[(String, String)]) {
    for (directive, value) in options {
        if directive.eq_ignore_ascii_case("alpn") {
            config.alpn_protocols = value
                .split(',')
                .map(|p| p.trim().as_bytes().to_vec())
                .filter(|p| !p.is_empty())
                .collect();
        } else {
            warn!(directive = %directive, "unrecognized TLS option, skipping");
        }
    }
}

fn read_cert_chain(path: &Path) -> NetResult<Vec<CertificateDer<'static>>> {
    let file = std::fs::File::open(path).map_err(|source| NetError::TlsFileRead {
        path: path.to_path_buf(),
        source,
    })?;
    let mut reader = std::io::BufReader::new(file);
    let certs: Vec<_> = rustls_pemfile::certs(&mut reader)
        .collect::<Result<_, _>>()
        .map_err(|source| NetError::TlsFileRead {
            path: path.to_path_buf(),
            source,
        })?;
    if certs.is_empty() {
        return Err(NetError::TlsFileRead {
            path: path.to_path_buf(),
            source: std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "no certificates found in PEM file",
            ),
        });
    }
    Ok(certs)
}

fn read_private_key(path: &Path) -> NetResult<PrivateKeyDer<'static>> {
    let file = std::fs::File::open(path).map_err(|source| NetError::TlsFileRead {
        path: path.to_path_buf(),
        source,
    })?;
    let mut reader = std::io::BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|source| NetError::TlsFileRead {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| NetError::NoPrivateKey {
            path: path.to_path_buf(),
        })
}
