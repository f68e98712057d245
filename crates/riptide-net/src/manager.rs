//! The acceptor manager: turns registered listener configs into live
//! listening sockets across the reactor pool.
//!
//! Lifecycle: `add_listener`* → `create_listeners` → `start_listening` →
//! (`reload_tls_files`)* → `stop_listening`. The calls are serialized
//! behind a mutex — they are control-plane operations and must not race
//! each other. Hooks are installed before `create_listeners` and are
//! read-only once accepting starts, so reactors can invoke them
//! concurrently without locks.
//!
//! Any listener that fails to materialize fails the whole
//! `create_listeners` call: silently serving with fewer listeners than
//! configured is a deployment-visible misconfiguration.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use bytes::Bytes;
use parking_lot::Mutex;
use riptide_core::ServerConfig;
use tokio::sync::watch;
use tracing::{error, info};

use crate::acceptor::{BoundListener, bind_listener, start_accepting};
use crate::config::{ListenerConfig, ListenerRegistry};
use crate::conn::{
    AfterAcceptCallback, BeforeListenCallback, ConnectionCallback, DispatchCallback, Shared,
};
use crate::error::{NetError, NetResult};
use crate::io_loop::IoLoopPool;
use crate::tls::TlsMaterial;

/// Response written when no dispatch collaborator was installed.
const DEFAULT_RESPONSE: &[u8] =
    b"HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\nconnection: close\r\n\r\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Configuring,
    Created,
    Listening,
    Stopped,
}

struct Inner {
    config: ServerConfig,
    registry: ListenerRegistry,
    phase: Phase,
    before_listen: Option<BeforeListenCallback>,
    after_accept: Option<AfterAcceptCallback>,
    connection_cb: Option<ConnectionCallback>,
    dispatch: Option<DispatchCallback>,
    pool: Option<Arc<IoLoopPool>>,
    shared: Option<Arc<Shared>>,
    bound: Vec<BoundListener>,
    shutdown: Option<watch::Sender<bool>>,
    accept_tasks: Vec<tokio::task::JoinHandle<()>>,
}

/// Owns the listener registry and the live listening sockets.
pub struct ListenerManager {
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for ListenerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("ListenerManager")
            .field("phase", &inner.phase)
            .field("registered", &inner.registry.len())
            .field("bound", &inner.bound.len())
            .finish_non_exhaustive()
    }
}

impl ListenerManager {
    /// Create a manager with the given server-wide tunables.
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                config,
                registry: ListenerRegistry::new(),
                phase: Phase::Configuring,
                before_listen: None,
                after_accept: None,
                connection_cb: None,
                dispatch: None,
                pool: None,
                shared: None,
                bound: Vec::new(),
                shutdown: None,
                accept_tasks: Vec::new(),
            }),
        }
    }

    /// Register a listener. No socket is created yet.
    #[allow(clippy::too_many_arguments)]
    pub fn add_listener(
        &self,
        ip: impl Into<String>,
        port: u16,
        use_tls: bool,
        cert_path: Option<PathBuf>,
        key_path: Option<PathBuf>,
        allow_legacy_tls: bool,
        tls_options: Vec<(String, String)>,
    ) -> NetResult<()> {
        self.add_listener_config(ListenerConfig {
            address: ip.into(),
            port,
            use_tls,
            cert_path,
            key_path,
            allow_legacy_tls,
            tls_options,
        })
    }

    /// Register a pre-built listener config.
    pub fn add_listener_config(&self, config: ListenerConfig) -> NetResult<()> {
        let mut inner = self.inner.lock();
        if inner.phase != Phase::Configuring {
            return Err(NetError::Lifecycle("listeners can only be added before create_listeners"));
        }
        inner.registry.add(config);
        Ok(())
    }

    /// Install the before-listen socket-option hook. Write-once, before
    /// `create_listeners`.
    pub fn set_before_listen_sockopt_callback(&self, cb: BeforeListenCallback) -> NetResult<()> {
        self.set_hook(|inner| inner.before_listen = Some(cb))
    }

    /// Install the after-accept socket-option hook. Write-once, before
    /// `create_listeners`.
    pub fn set_after_accept_sockopt_callback(&self, cb: AfterAcceptCallback) -> NetResult<()> {
        self.set_hook(|inner| inner.after_accept = Some(cb))
    }

    /// Install the per-connection callback. Write-once, before
    /// `create_listeners`.
    pub fn set_connection_callback(&self, cb: ConnectionCallback) -> NetResult<()> {
        self.set_hook(|inner| inner.connection_cb = Some(cb))
    }

    /// Install the dispatch collaborator that consumes completed
    /// requests. Write-once, before `create_listeners`.
    pub fn set_dispatch_callback(&self, cb: DispatchCallback) -> NetResult<()> {
        self.set_hook(|inner| inner.dispatch = Some(cb))
    }

    fn set_hook(&self, install: impl FnOnce(&mut Inner)) -> NetResult<()> {
        let mut inner = self.inner.lock();
        if inner.phase != Phase::Configuring {
            return Err(NetError::Lifecycle("hooks must be installed before create_listeners"));
        }
        install(&mut inner);
        Ok(())
    }

    /// Materialize every registered config into bound, listening sockets
    /// distributed across the reactor pool.
    ///
    /// A config's own cert/key overrides the global fallback. Fails the
    /// whole call (and unbinds everything) on the first listener error.
    pub fn create_listeners(
        &self,
        global_cert: Option<&Path>,
        global_key: Option<&Path>,
        global_tls_options: &[(String, String)],
        pool: Arc<IoLoopPool>,
    ) -> NetResult<()> {
        let mut inner = self.inner.lock();
        if inner.phase != Phase::Configuring {
            return Err(NetError::Lifecycle("create_listeners may only run once"));
        }

        let shared = Arc::new(Shared {
            config: inner.config.clone(),
            dispatch: inner
                .dispatch
                .clone()
                .unwrap_or_else(|| Arc::new(|_| Bytes::from_static(DEFAULT_RESPONSE))),
            connection_cb: inner.connection_cb.clone(),
            after_accept: inner.after_accept.clone(),
            conn_ids: AtomicU64::new(0),
        });

        let mut bound = Vec::with_capacity(inner.registry.len());
        for config in inner.registry.entries() {
            let tls = if config.use_tls {
                Some(Arc::new(resolve_tls_material(
                    config,
                    global_cert,
                    global_key,
                    global_tls_options,
                )?))
            } else {
                None
            };
            let listener = bind_listener(
                config.clone(),
                tls,
                &pool,
                inner.before_listen.as_ref(),
                inner.config.backlog,
            )
            .inspect_err(|e| {
                // Partial listener sets never survive: `bound` drops here
                // and closes everything bound so far.
                error!(address = %config.address, port = config.port, error = %e,
                    "listener setup failed, aborting startup");
            })?;
            bound.push(listener);
        }

        info!(listeners = bound.len(), reactors = pool.len(), "listeners created");
        inner.bound = bound;
        inner.pool = Some(pool);
        inner.shared = Some(shared);
        inner.phase = Phase::Created;
        Ok(())
    }

    /// Resolved bound addresses, in registration order.
    ///
    /// Useful when a port was requested as `0` (any free port).
    pub fn bound_addrs(&self) -> NetResult<Vec<SocketAddr>> {
        let inner = self.inner.lock();
        if inner.phase == Phase::Configuring {
            return Err(NetError::Lifecycle("listeners have not been created yet"));
        }
        Ok(inner.bound.iter().map(BoundListener::bound_addr).collect())
    }

    /// Begin accepting on every created listener.
    pub fn start_listening(&self) -> NetResult<()> {
        let mut inner = self.inner.lock();
        if inner.phase != Phase::Created {
            return Err(NetError::Lifecycle("start_listening requires created listeners"));
        }
        let pool = inner.pool.clone().ok_or(NetError::Lifecycle("reactor pool missing"))?;
        let shared = inner
            .shared
            .clone()
            .ok_or(NetError::Lifecycle("shared state missing"))?;

        let (shutdown_tx, _) = watch::channel(false);
        let mut tasks = Vec::new();
        for listener in &mut inner.bound {
            tasks.extend(start_accepting(listener, &pool, &shared, &shutdown_tx));
        }

        info!(accept_loops = tasks.len(), "listening started");
        inner.shutdown = Some(shutdown_tx);
        inner.accept_tasks = tasks;
        inner.phase = Phase::Listening;
        Ok(())
    }

    /// Stop accepting new connections.
    ///
    /// Gracefully closes every listening socket; connections that were
    /// already accepted keep running on their reactors untouched.
    pub fn stop_listening(&self) {
        let mut inner = self.inner.lock();
        if inner.phase != Phase::Listening {
            return;
        }
        if let Some(shutdown) = inner.shutdown.take() {
            let _ = shutdown.send(true);
        }
        for task in inner.accept_tasks.drain(..) {
            task.abort();
        }
        inner.bound.clear();
        inner.phase = Phase::Stopped;
        info!("listening stopped");
    }

    /// Re-read certificate/key material for every TLS listener.
    ///
    /// Each listener swaps to the refreshed material independently; new
    /// connections pick it up, connections mid-handshake are unaffected.
    /// A listener whose reload fails keeps its previous material; the
    /// first error is reported after every listener has been attempted.
    pub fn reload_tls_files(&self) -> NetResult<()> {
        let inner = self.inner.lock();
        if inner.phase == Phase::Configuring {
            return Err(NetError::Lifecycle("listeners have not been created yet"));
        }
        let mut first_error = None;
        for listener in &inner.bound {
            if let Some(material) = &listener.tls {
                if let Err(e) = material.reload() {
                    error!(
                        address = %listener.config.address,
                        port = listener.config.port,
                        error = %e,
                        "TLS reload failed, previous material stays active"
                    );
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Pick the per-listener cert/key with the global pair as fallback, and
/// load the material.
fn resolve_tls_material(
    config: &ListenerConfig,
    global_cert: Option<&Path>,
    global_key: Option<&Path>,
    global_tls_options: &[(String, String)],
) -> NetResult<TlsMaterial> {
    let cert = config
        .cert_path
        .as_deref()
        .or(global_cert)
        .ok_or_else(|| NetError::MissingTlsMaterial {
            address: config.address.clone(),
            port: config.port,
        })?;
    let key = config
        .key_path
        .as_deref()
        .or(global_key)
        .ok_or_else(|| NetError::MissingTlsMaterial {
            address: config.address.clone(),
            port: config.port,
        })?;
    let options = if config.tls_options.is_empty() {
        global_tls_options.to_vec()
    } else {
        config.tls_options.clone()
    };
    TlsMaterial::load(cert, key, options, config.allow_legacy_tls)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn manager() -> ListenerManager {
        ListenerManager::new(ServerConfig::default())
    }

    #[test]
    fn test_should_reject_start_before_create() {
        let mgr = manager();
        assert!(matches!(
            mgr.start_listening(),
            Err(NetError::Lifecycle(_))
        ));
    }

    #[test]
    fn test_should_reject_bound_addrs_before_create() {
        let mgr = manager();
        assert!(mgr.bound_addrs().is_err());
    }

    #[test]
    fn test_should_fail_create_for_tls_listener_without_material() {
        let mgr = manager();
        mgr.add_listener("127.0.0.1", 0, true, None, None, false, Vec::new())
            .unwrap();
        let pool = Arc::new(IoLoopPool::new(1).unwrap());
        let err = mgr
            .create_listeners(None, None, &[], pool)
            .unwrap_err();
        assert!(matches!(err, NetError::MissingTlsMaterial { .. }));
    }

    #[test]
    fn test_should_fail_create_for_unparsable_address() {
        let mgr = manager();
        mgr.add_listener("not-an-ip", 0, false, None, None, false, Vec::new())
            .unwrap();
        let pool = Arc::new(IoLoopPool::new(1).unwrap());
        assert!(matches!(
            mgr.create_listeners(None, None, &[], pool),
            Err(NetError::InvalidAddress { .. })
        ));
    }

    #[test]
    fn test_should_reject_listener_registration_after_create() {
        let mgr = manager();
        mgr.add_listener("127.0.0.1", 0, false, None, None, false, Vec::new())
            .unwrap();
        let pool = Arc::new(IoLoopPool::new(1).unwrap());
        mgr.create_listeners(None, None, &[], pool).unwrap();
        assert!(mgr
            .add_listener("127.0.0.1", 0, false, None, None, false, Vec::new())
            .is_err());
    }

    #[test]
    fn test_should_resolve_any_free_port() {
        let mgr = manager();
        mgr.add_listener("127.0.0.1", 0, false, None, None, false, Vec::new())
            .unwrap();
        let pool = Arc::new(IoLoopPool::new(2).unwrap());
        mgr.create_listeners(None, None, &[], pool).unwrap();
        let addrs = mgr.bound_addrs().unwrap();
        assert_eq!(addrs.len(), 1);
        assert_ne!(addrs[0].port(), 0);
    }

    #[test]
    fn test_should_serve_plaintext_request_end_to_end() {
        let mgr = manager();
        let seen_paths = Arc::new(Mutex::new(Vec::<String>::new()));
        let paths = seen_paths.clone();
        mgr.set_dispatch_callback(Arc::new(move |req| {
            paths.lock().push(req.path().to_owned());
            Bytes::from_static(
                b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok",
            )
        }))
        .unwrap();

        let conn_count = Arc::new(AtomicUsize::new(0));
        let counter = conn_count.clone();
        mgr.set_connection_callback(Arc::new(move |_state| {
            counter.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();

        mgr.add_listener("127.0.0.1", 0, false, None, None, false, Vec::new())
            .unwrap();
        let pool = Arc::new(IoLoopPool::new(2).unwrap());
        mgr.create_listeners(None, None, &[], pool).unwrap();
        let addr = mgr.bound_addrs().unwrap()[0];
        mgr.start_listening().unwrap();

        let mut client = std::net::TcpStream::connect(addr).unwrap();
        client
            .write_all(b"GET /hello HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .unwrap();
        let mut response = String::new();
        client.read_to_string(&mut response).unwrap();
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.ends_with("ok"));
        assert_eq!(seen_paths.lock().as_slice(), ["/hello"]);
        assert_eq!(conn_count.load(Ordering::SeqCst), 1);

        mgr.stop_listening();
        assert!(matches!(
            mgr.start_listening(),
            Err(NetError::Lifecycle(_))
        ));
    }

    #[test]
    fn test_should_invoke_before_listen_hook_per_socket() {
        let mgr = manager();
        let hook_calls = Arc::new(AtomicUsize::new(0));
        let calls = hook_calls.clone();
        mgr.set_before_listen_sockopt_callback(Arc::new(move |_socket| {
            calls.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();
        mgr.add_listener("127.0.0.1", 0, false, None, None, false, Vec::new())
            .unwrap();
        let pool = Arc::new(IoLoopPool::new(2).unwrap());
        mgr.create_listeners(None, None, &[], pool.clone()).unwrap();

        let expected = if crate::acceptor::multi_acceptor_supported() {
            pool.len()
        } else {
            1
        };
        assert_eq!(hook_calls.load(Ordering::SeqCst), expected);
    }
}
