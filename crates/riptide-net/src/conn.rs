//! Per-connection driver.
//!
//! Runs on the reactor that owns the connection: reads HTTP/1.x request
//! heads, populates a [`Request`] through its setters, accumulates the
//! content-length-delimited body, and hands the finished request to the
//! dispatch collaborator. The collaborator returns pre-serialized response
//! bytes — response writing is outside this subsystem.
//!
//! Chunked transfer decoding is not implemented here; bodies are
//! delimited by `Content-Length`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use bytes::{Bytes, BytesMut};
use riptide_core::{ConnRef, ConnState, ServerConfig};
use riptide_http::{Request, Version};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpSocket, TcpStream};
use tracing::debug;

/// Upper bound on the request head (request line + headers).
const MAX_HEAD_BYTES: usize = 64 * 1024;

/// Dispatch collaborator: consumes a populated request and returns the
/// raw bytes to write back on the connection.
pub type DispatchCallback = Arc<dyn Fn(Request) -> Bytes + Send + Sync>;

/// Hook invoked once per live connection with its identity record.
pub type ConnectionCallback = Arc<dyn Fn(&Arc<ConnState>) + Send + Sync>;

/// Socket-option hook invoked with each accepted stream.
pub type AfterAcceptCallback = Arc<dyn Fn(&TcpStream) + Send + Sync>;

/// Socket-option hook invoked with the raw socket before `listen`.
pub type BeforeListenCallback = Arc<dyn Fn(&TcpSocket) + Send + Sync>;

/// State shared by every accept loop and connection driver.
///
/// Installed once before listening starts and read-only afterwards, so it
/// is safe to touch from every reactor concurrently.
pub(crate) struct Shared {
    pub(crate) config: ServerConfig,
    pub(crate) dispatch: DispatchCallback,
    pub(crate) connection_cb: Option<ConnectionCallback>,
    pub(crate) after_accept: Option<AfterAcceptCallback>,
    pub(crate) conn_ids: AtomicU64,
}

impl std::fmt::Debug for Shared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shared")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Drive one connection until close or a keep-alive-disabling request.
pub(crate) async fn drive_connection<S>(
    mut stream: S,
    peer: SocketAddr,
    local: SocketAddr,
    secure: bool,
    peer_cert: Option<Bytes>,
    shared: Arc<Shared>,
    state: Arc<ConnState>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = BytesMut::with_capacity(8 * 1024);

    'conn: loop {
        // Accumulate until a complete head is buffered.
        let (mut request, consumed) = loop {
            match parse_head(&buf) {
                Ok(Some(parsed)) => break parsed,
                Ok(None) => {
                    if buf.len() > MAX_HEAD_BYTES {
                        debug!(peer = %peer, "request head exceeds limit, closing");
                        break 'conn;
                    }
                    match stream.read_buf(&mut buf).await {
                        Ok(0) => break 'conn,
                        Ok(_) => {}
                        Err(e) => {
                            debug!(peer = %peer, error = %e, "read failed");
                            break 'conn;
                        }
                    }
                }
                Err(reason) => {
                    debug!(peer = %peer, reason, "malformed request head, closing");
                    break 'conn;
                }
            }
        };
        let _ = buf.split_to(consumed);

        request.set_peer_addr(peer);
        request.set_local_addr(local);
        request.set_secure(secure);
        request.set_conn_ref(ConnRef::new(&state));
        if let Some(cert) = &peer_cert {
            request.set_peer_certificate(cert.clone());
        }
        request.set_body_limits(
            shared.config.body_spill_threshold,
            shared.config.decompress_limit,
        );

        // Content-length-delimited body.
        if let Some(declared) = request.content_length_header() {
            let mut remaining = usize::try_from(declared).unwrap_or(usize::MAX);
            while remaining > 0 {
                if buf.is_empty() {
                    match stream.read_buf(&mut buf).await {
                        Ok(0) => break 'conn,
                        Ok(_) => {}
                        Err(e) => {
                            debug!(peer = %peer, error = %e, "body read failed");
                            break 'conn;
                        }
                    }
                }
                let take = remaining.min(buf.len());
                let chunk = buf.split_to(take);
                if let Err(e) = request.append_to_body(&chunk) {
                    debug!(peer = %peer, error = %e, "body store failed");
                    break 'conn;
                }
                remaining -= take;
            }
        }

        let keep_alive = request.keep_alive();
        request.start_processing();
        let response = (shared.dispatch)(request);

        if let Err(e) = stream.write_all(&response).await {
            debug!(peer = %peer, error = %e, "write failed");
            break;
        }
        if !keep_alive {
            break;
        }
    }

    state.mark_closed();
    let _ = stream.shutdown().await;
}

/// Try to parse a complete request head from the buffer.
///
/// Returns `Ok(None)` when more bytes are needed, and the populated
/// request plus the number of consumed bytes once the head is complete.
fn parse_head(buf: &[u8]) -> Result<Option<(Request, usize)>, &'static str> {
    let Some(head_end) = find_head_end(buf) else {
        return Ok(None);
    };
    let head = &buf[..head_end];
    let consumed = head_end + 4;

    let text = std::str::from_utf8(head).map_err(|_| "head is not valid UTF-8")?;
    let mut lines = text.split("\r\n");

    let request_line = lines.next().ok_or("empty head")?;
    let mut parts = request_line.split(' ');
    let method = parts.next().ok_or("missing method")?;
    let target = parts.next().ok_or("missing request target")?;
    let version = parts.next().ok_or("missing protocol version")?;
    if parts.next().is_some() {
        return Err("malformed request line");
    }

    let mut request = Request::new();
    // An unknown method degrades to Invalid; dispatch decides what to do.
    let _ = request.set_method_token(method.as_bytes());
    request.set_version(Version::from_token(version.as_bytes()));

    match target.split_once('?') {
        Some((path, query)) => {
            request.set_path_raw(path);
            request.set_query(query);
        }
        None => request.set_path_raw(target),
    }

    for line in lines {
        if line.is_empty() {
            continue;
        }
        let (name, value) = line.split_once(':').ok_or("malformed header line")?;
        request.add_header(name.trim(), value.trim_start_matches(' ').trim_end());
    }

    Ok(Some((request, consumed)))
}

/// Find the end of the head: the offset of the `\r\n\r\n` separator.
fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}
