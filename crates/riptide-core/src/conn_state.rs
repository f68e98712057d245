//! Connection identity shared between the acceptor layer and requests.
//!
//! The connection layer owns a [`ConnState`] in an `Arc` for as long as the
//! connection lives. Requests hold a [`ConnRef`] (a `Weak`) so they can ask
//! "is my connection still there?" without ever extending its lifetime.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Identity and liveness record for one accepted connection.
#[derive(Debug)]
pub struct ConnState {
    id: u64,
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
    secure: bool,
    alive: AtomicBool,
}

impl ConnState {
    /// Create the state record for a freshly accepted connection.
    #[must_use]
    pub fn new(id: u64, peer_addr: SocketAddr, local_addr: SocketAddr, secure: bool) -> Arc<Self> {
        Arc::new(Self {
            id,
            peer_addr,
            local_addr,
            secure,
            alive: AtomicBool::new(true),
        })
    }

    /// Numeric connection id, unique within the server process.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Remote peer address.
    #[must_use]
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Local (bound) address the connection arrived on.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Whether the connection is TLS-protected.
    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// Whether the connection is still open.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Mark the connection as closed. Called by the owning connection
    /// driver when the socket goes away.
    pub fn mark_closed(&self) {
        self.alive.store(false, Ordering::Release);
    }
}

/// Non-owning handle to a connection's [`ConnState`].
///
/// Holding a `ConnRef` never keeps the connection alive; once the owning
/// driver drops its `Arc`, [`ConnRef::is_connected`] reports `false`.
#[derive(Debug, Clone, Default)]
pub struct ConnRef(Weak<ConnState>);

impl ConnRef {
    /// A reference that was never attached to a connection.
    #[must_use]
    pub fn detached() -> Self {
        Self(Weak::new())
    }

    /// Downgrade an owned state record into a weak reference.
    #[must_use]
    pub fn new(state: &Arc<ConnState>) -> Self {
        Self(Arc::downgrade(state))
    }

    /// `true` while the owning connection exists and is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.0.upgrade().is_some_and(|c| c.is_alive())
    }

    /// Upgrade to the full state record, if the connection still exists.
    #[must_use]
    pub fn state(&self) -> Option<Arc<ConnState>> {
        self.0.upgrade()
    }
}
