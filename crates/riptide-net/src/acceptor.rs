//! Socket binding and accept loops.
//!
//! Two acceptor shapes, selected once at startup by a compile-target
//! capability probe:
//!
//! - **Per-reactor sockets** (`SO_REUSEPORT` platforms): every reactor in
//!   the pool binds its own listening socket for the (address, port) pair
//!   and accepts directly; the kernel load-balances, and a connection
//!   never changes threads.
//! - **Single acceptor** (everywhere else): one socket, owned by one
//!   accept task, fanning accepted connections out to the reactor pool
//!   round-robin.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use riptide_core::ConnState;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::config::ListenerConfig;
use crate::conn::{BeforeListenCallback, Shared, drive_connection};
use crate::error::{NetError, NetResult};
use crate::io_loop::IoLoopPool;
use crate::tls::TlsMaterial;

/// Whether this target supports one listening socket per reactor for the
/// same (address, port) pair. Resolved once from the compile target; on
/// platforms without it the manager runs a single acceptor that fans out.
#[must_use]
pub const fn multi_acceptor_supported() -> bool {
    cfg!(any(target_os = "linux", target_os = "android", target_os = "freebsd"))
}

/// A listener's bound sockets, between `create_listeners` and
/// `start_listening`.
#[derive(Debug)]
pub(crate) struct BoundListener {
    pub(crate) config: ListenerConfig,
    pub(crate) tls: Option<Arc<TlsMaterial>>,
    /// `(reactor index, listening socket)` pairs; one entry per reactor
    /// in per-reactor mode, exactly one in single-acceptor mode.
    sockets: Vec<(usize, TcpListener)>,
    bound_addr: SocketAddr,
}

impl BoundListener {
    /// The resolved bound address (meaningful when port 0 was requested).
    pub(crate) fn bound_addr(&self) -> SocketAddr {
        self.bound_addr
    }
}

/// Bind the sockets for one listener config across the reactor pool.
pub(crate) fn bind_listener(
    config: ListenerConfig,
    tls: Option<Arc<TlsMaterial>>,
    pool: &IoLoopPool,
    before_listen: Option<&BeforeListenCallback>,
    backlog: u32,
) -> NetResult<BoundListener> {
    let ip: IpAddr = config
        .address
        .parse()
        .map_err(|_| NetError::InvalidAddress {
            address: config.address.clone(),
            port: config.port,
        })?;
    let mut addr = SocketAddr::new(ip, config.port);

    let per_reactor = multi_acceptor_supported() && pool.len() > 1;
    let socket_count = if per_reactor { pool.len() } else { 1 };

    let mut sockets = Vec::with_capacity(socket_count);
    for index in 0..socket_count {
        let socket = new_socket(&addr)?;
        socket.set_reuseaddr(true).map_err(NetError::Io)?;
        #[cfg(unix)]
        if per_reactor {
            socket.set_reuseport(true).map_err(NetError::Io)?;
        }
        if let Some(cb) = before_listen {
            cb(&socket);
        }
        socket.bind(addr).map_err(|source| NetError::Bind { addr, source })?;

        // TcpListener registration needs the owning reactor's context.
        let handle = pool.handle(index);
        let listener = {
            let _guard = handle.enter();
            socket
                .listen(backlog)
                .map_err(|source| NetError::Bind { addr, source })?
        };

        if index == 0 {
            // Resolve "any free port" so the remaining reactors bind the
            // same concrete port.
            addr = listener.local_addr().map_err(NetError::Io)?;
        }
        sockets.push((index, listener));
    }

    debug!(
        addr = %addr,
        sockets = sockets.len(),
        tls = tls.is_some(),
        "listener bound"
    );

    Ok(BoundListener {
        config,
        tls,
        sockets,
        bound_addr: addr,
    })
}

fn new_socket(addr: &SocketAddr) -> NetResult<TcpSocket> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    };
    socket.map_err(NetError::Io)
}

/// Where accepted connections run.
enum AcceptTargets {
    /// Per-reactor socket: connections stay on the accepting reactor.
    Pinned(Handle),
    /// Single acceptor: fan out round-robin across the pool.
    FanOut(Arc<FanOut>),
}

struct FanOut {
    handles: Vec<Handle>,
    next: AtomicUsize,
}

impl AcceptTargets {
    fn pick(&self) -> Handle {
        match self {
            Self::Pinned(handle) => handle.clone(),
            Self::FanOut(fan) => {
                let index = fan.next.fetch_add(1, Ordering::Relaxed) % fan.handles.len();
                fan.handles[index].clone()
            }
        }
    }
}

/// Start accept loops for a bound listener. Consumes the sockets.
pub(crate) fn start_accepting(
    listener: &mut BoundListener,
    pool: &IoLoopPool,
    shared: &Arc<Shared>,
    shutdown: &watch::Sender<bool>,
) -> Vec<tokio::task::JoinHandle<()>> {
    let sockets = std::mem::take(&mut listener.sockets);
    let single = sockets.len() == 1 && pool.len() > 1;
    let fan_out = single.then(|| {
        Arc::new(FanOut {
            handles: pool.handles().cloned().collect(),
            next: AtomicUsize::new(0),
        })
    });

    let mut tasks = Vec::with_capacity(sockets.len());
    for (reactor_index, socket) in sockets {
        let accept_handle = pool.handle(reactor_index).clone();
        let targets = match &fan_out {
            Some(fan) => AcceptTargets::FanOut(fan.clone()),
            None => AcceptTargets::Pinned(accept_handle.clone()),
        };
        let tls = listener.tls.clone();
        let shared = shared.clone();
        let shutdown_rx = shutdown.subscribe();
        tasks.push(accept_handle.spawn(accept_loop(socket, tls, shared, targets, shutdown_rx)));
    }
    tasks
}

/// Accept until the shutdown signal flips; dropping the listener closes
/// the socket without touching already-accepted connections.
async fn accept_loop(
    listener: TcpListener,
    tls: Option<Arc<TlsMaterial>>,
    shared: Arc<Shared>,
    targets: AcceptTargets,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            result = listener.accept() => match result {
                Ok((stream, peer)) => {
                    accept_one(stream, peer, tls.as_ref(), &shared, &targets);
                }
                Err(e) => {
                    // Transient (EMFILE-style) failures: back off briefly
                    // instead of spinning.
                    warn!(error = %e, "accept failed");
                    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                }
            },
            _ = shutdown.changed() => {
                debug!(addr = ?listener.local_addr().ok(), "listener stopping");
                break;
            }
        }
    }
}

fn accept_one(
    stream: TcpStream,
    peer: SocketAddr,
    tls: Option<&Arc<TlsMaterial>>,
    shared: &Arc<Shared>,
    targets: &AcceptTargets,
) {
    if shared.config.tcp_nodelay {
        let _ = stream.set_nodelay(true);
    }
    if let Some(cb) = &shared.after_accept {
        cb(&stream);
    }
    let Ok(local) = stream.local_addr() else {
        debug!(peer = %peer, "accepted socket vanished before setup");
        return;
    };

    let conn_id = shared.conn_ids.fetch_add(1, Ordering::Relaxed);
    let tls = tls.cloned();
    let shared = shared.clone();

    targets.pick().spawn(async move {
        let state = ConnState::new(conn_id, peer, local, tls.is_some());
        if let Some(cb) = &shared.connection_cb {
            cb(&state);
        }
        match tls {
            Some(material) => {
                // Snapshot the hot-swappable config for this handshake.
                match material.acceptor().accept(stream).await {
                    Ok(tls_stream) => {
                        let peer_cert = tls_stream
                            .get_ref()
                            .1
                            .peer_certificates()
                            .and_then(|certs| certs.first())
                            .map(|cert| Bytes::copy_from_slice(cert.as_ref()));
                        drive_connection(tls_stream, peer, local, true, peer_cert, shared, state)
                            .await;
                    }
                    Err(e) => {
                        debug!(peer = %peer, error = %e, "TLS handshake failed");
                        state.mark_closed();
                    }
                }
            }
            None => {
                drive_connection(stream, peer, local, false, None, shared, state).await;
            }
        }
    });
}
