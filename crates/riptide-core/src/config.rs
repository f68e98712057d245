//! Server-wide tunables.
//!
//! All configuration is driven by environment variables with sensible
//! defaults; library consumers can also construct a [`ServerConfig`]
//! programmatically and override individual fields.

/// Default body size (in bytes) kept in memory before spilling to a
/// temporary file. Bodies larger than this are written to disk.
///
/// The default is 512 KiB.
pub const DEFAULT_SPILL_THRESHOLD: usize = 524_288;

/// Default upper bound (in bytes) on decompressed body output.
///
/// Guards against decompression-bomb amplification; 64 MiB.
pub const DEFAULT_DECOMPRESS_LIMIT: usize = 64 * 1024 * 1024;

/// Default accept backlog passed to `listen(2)`.
pub const DEFAULT_BACKLOG: u32 = 1024;

/// Global configuration for a Riptide server instance.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Number of reactor (I/O loop) threads. `0` means one per available
    /// CPU core.
    pub io_loops: usize,
    /// Body size threshold above which request bodies spill to disk.
    pub body_spill_threshold: usize,
    /// Maximum decompressed body size.
    pub decompress_limit: usize,
    /// Accept backlog for listening sockets.
    pub backlog: u32,
    /// Whether to set `TCP_NODELAY` on accepted connections.
    pub tcp_nodelay: bool,
    /// Log level filter used when the binary initializes tracing.
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            io_loops: 0,
            body_spill_threshold: DEFAULT_SPILL_THRESHOLD,
            decompress_limit: DEFAULT_DECOMPRESS_LIMIT,
            backlog: DEFAULT_BACKLOG,
            tcp_nodelay: true,
            log_level: "info".to_owned(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Unset variables keep their defaults; set-but-unparsable values are
    /// a configuration error rather than a silent fallback.
    pub fn from_env() -> crate::CoreResult<Self> {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("IO_LOOPS") {
            config.io_loops = parse_var("IO_LOOPS", &v)?;
        }
        if let Ok(v) = std::env::var("BODY_SPILL_THRESHOLD") {
            config.body_spill_threshold = parse_var("BODY_SPILL_THRESHOLD", &v)?;
        }
        if let Ok(v) = std::env::var("DECOMPRESS_LIMIT") {
            config.decompress_limit = parse_var("DECOMPRESS_LIMIT", &v)?;
        }
        if let Ok(v) = std::env::var("TCP_NODELAY") {
            config.tcp_nodelay = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("LOG_LEVEL") {
            config.log_level = v;
        }

        Ok(config)
    }

    /// Resolve the effective reactor count (`0` means one per core).
    #[must_use]
    pub fn effective_io_loops(&self) -> usize {
        if self.io_loops == 0 {
            std::thread::available_parallelism().map_or(1, |n| n.get())
        } else {
            self.io_loops
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> crate::CoreResult<T> {
    value.parse().map_err(|_| {
        crate::CoreError::Config(format!("invalid value for {name}: {value}"))
    })
}
