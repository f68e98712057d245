//! Listener configuration and the pre-start registry.

use std::path::PathBuf;

/// One logical listener: an (address, port, TLS) tuple plus its TLS
/// material paths and engine options.
///
/// Configs are accumulated in a [`ListenerRegistry`] before startup and
/// are immutable once handed to the acceptor manager for a start cycle.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ListenerConfig {
    /// IP address to bind (e.g. `0.0.0.0`, `::`).
    pub address: String,
    /// Port to bind; `0` requests any free port.
    pub port: u16,
    /// Whether this listener terminates TLS.
    pub use_tls: bool,
    /// Certificate chain path; falls back to the global certificate when
    /// absent.
    pub cert_path: Option<PathBuf>,
    /// Private key path; falls back to the global key when absent.
    pub key_path: Option<PathBuf>,
    /// Whether pre-1.2 TLS protocols were requested. Accepted for
    /// configuration compatibility; the TLS engine's floor is TLS 1.2.
    pub allow_legacy_tls: bool,
    /// Ordered `(directive, value)` TLS engine options.
    pub tls_options: Vec<(String, String)>,
}

impl ListenerConfig {
    /// Create a plaintext listener config.
    #[must_use]
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            use_tls: false,
            cert_path: None,
            key_path: None,
            allow_legacy_tls: false,
            tls_options: Vec::new(),
        }
    }

    /// Enable TLS with the given certificate and key paths.
    #[must_use]
    pub fn with_tls(
        mut self,
        cert_path: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
    ) -> Self {
        self.use_tls = true;
        self.cert_path = Some(cert_path.into());
        self.key_path = Some(key_path.into());
        self
    }

    /// Enable TLS relying on the globally configured fallback material.
    #[must_use]
    pub fn with_global_tls(mut self) -> Self {
        self.use_tls = true;
        self
    }

    /// Append a `(directive, value)` TLS engine option.
    #[must_use]
    pub fn with_tls_option(mut self, directive: impl Into<String>, value: impl Into<String>) -> Self {
        self.tls_options.push((directive.into(), value.into()));
        self
    }

    /// Request pre-1.2 TLS protocol support.
    #[must_use]
    pub fn with_legacy_tls(mut self, allow: bool) -> Self {
        self.allow_legacy_tls = allow;
        self
    }
}

/// Ordered collection of listener configs accumulated before startup.
#[derive(Debug, Clone, Default)]
pub struct ListenerRegistry {
    entries: Vec<ListenerConfig>,
}

impl ListenerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a listener config.
    pub fn add(&mut self, config: ListenerConfig) {
        self.entries.push(config);
    }

    /// Registered configs, in registration order.
    #[must_use]
    pub fn entries(&self) -> &[ListenerConfig] {
        &self.entries
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no listeners are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
