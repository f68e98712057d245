//! Integration tests for the Riptide listener and request machinery.
//!
//! Each test starts a real [`ListenerManager`] on ephemeral ports and
//! talks to it over actual sockets — plaintext via `std::net::TcpStream`,
//! TLS via a `rustls` client with verification disabled (the fixtures are
//! self-signed).

use std::io::Read;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Once};

use riptide_core::ServerConfig;
use riptide_net::{DispatchCallback, IoLoopPool, ListenerConfig, ListenerManager};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};

mod test_listeners;
mod test_request_flow;

static INIT: Once = Once::new();

/// Initialize tracing (once).
fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .init();
    });
}

/// Path of a PEM fixture under `testdata/`.
#[must_use]
pub fn testdata(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("testdata")
        .join(name)
}

/// A running server plus the handles keeping it alive.
#[derive(Debug)]
pub struct TestServer {
    /// The manager under test.
    pub manager: ListenerManager,
    /// Reactor pool backing the manager (kept alive for the test).
    pub pool: Arc<IoLoopPool>,
    /// Resolved bound addresses, in registration order.
    pub addrs: Vec<SocketAddr>,
}

/// Start a server over the given listener configs and dispatch callback.
#[must_use]
pub fn start_server(listeners: Vec<ListenerConfig>, dispatch: DispatchCallback) -> TestServer {
    init_tracing();
    let manager = ListenerManager::new(ServerConfig::default());
    manager.set_dispatch_callback(dispatch).unwrap();
    for listener in listeners {
        manager.add_listener_config(listener).unwrap();
    }
    let pool = Arc::new(IoLoopPool::new(2).unwrap());
    manager
        .create_listeners(None, None, &[], pool.clone())
        .unwrap();
    let addrs = manager.bound_addrs().unwrap();
    manager.start_listening().unwrap();
    TestServer {
        manager,
        pool,
        addrs,
    }
}

/// A dispatch callback answering every request with a fixed `200 OK`.
#[must_use]
pub fn ok_dispatch() -> DispatchCallback {
    Arc::new(|_request| {
        bytes::Bytes::from_static(
            b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\nconnection: keep-alive\r\n\r\nok",
        )
    })
}

/// Read exactly one HTTP response (head plus `content-length` body).
pub fn read_one_response(reader: &mut impl Read) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        if let Some(total) = response_len(&buf) {
            if buf.len() >= total {
                return String::from_utf8_lossy(&buf[..total]).into_owned();
            }
        }
        match reader.read(&mut chunk) {
            Ok(0) => return String::from_utf8_lossy(&buf).into_owned(),
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(e) => panic!("read failed with partial response: {e}"),
        }
    }
}

fn response_len(buf: &[u8]) -> Option<usize> {
    let head_end = buf.windows(4).position(|w| w == b"\r\n\r\n")?;
    let head = String::from_utf8_lossy(&buf[..head_end]);
    let body_len = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.trim()
                .eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())?
        })
        .unwrap_or(0);
    Some(head_end + 4 + body_len)
}

/// Certificate verifier that accepts anything; the fixtures are
/// self-signed and the tests inspect the presented certificate directly.
#[derive(Debug)]
struct AcceptAnyCert(rustls::crypto::CryptoProvider);

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

/// Client config trusting any server certificate.
#[must_use]
pub fn tls_client_config() -> Arc<rustls::ClientConfig> {
    let provider = rustls::crypto::ring::default_provider();
    let config = rustls::ClientConfig::builder_with_provider(Arc::new(provider.clone()))
        .with_safe_default_protocol_versions()
        .unwrap()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCert(provider)))
        .with_no_client_auth();
    Arc::new(config)
}

/// An established TLS client connection to a test server.
pub struct TlsClient {
    conn: rustls::ClientConnection,
    sock: std::net::TcpStream,
}

impl std::fmt::Debug for TlsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsClient")
            .field("peer_addr", &self.sock.peer_addr().ok())
            .finish_non_exhaustive()
    }
}

impl TlsClient {
    /// Connect and complete the TLS handshake.
    #[must_use]
    pub fn connect(addr: SocketAddr) -> Self {
        let server_name = ServerName::try_from("localhost").unwrap();
        let mut conn = rustls::ClientConnection::new(tls_client_config(), server_name).unwrap();
        let mut sock = std::net::TcpStream::connect(addr).unwrap();
        // Drive the handshake to completion before handing control back.
        while conn.is_handshaking() {
            conn.complete_io(&mut sock).unwrap();
        }
        Self { conn, sock }
    }

    /// DER bytes of the certificate the server presented.
    #[must_use]
    pub fn peer_cert_der(&self) -> Vec<u8> {
        self.conn
            .peer_certificates()
            .and_then(|certs| certs.first())
            .map(|cert| cert.to_vec())
            .expect("server presented no certificate")
    }

    /// Send raw request bytes and read one HTTP response.
    pub fn roundtrip(&mut self, request: &[u8]) -> String {
        use std::io::Write;
        let mut tls = rustls::Stream::new(&mut self.conn, &mut self.sock);
        tls.write_all(request).unwrap();
        read_one_response(&mut tls)
    }
}
