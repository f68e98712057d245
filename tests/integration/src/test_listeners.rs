//! Listener lifecycle integration tests: multi-listener startup, TLS
//! handshakes, and certificate hot-reload.

#[cfg(test)]
mod tests {
    use std::io::Write;

    use riptide_net::ListenerConfig;

    use crate::{TlsClient, ok_dispatch, read_one_response, start_server, testdata};

    #[test]
    fn test_should_serve_plaintext_and_tls_listeners_side_by_side() {
        let server = start_server(
            vec![
                ListenerConfig::new("127.0.0.1", 0),
                ListenerConfig::new("127.0.0.1", 0)
                    .with_tls(testdata("cert-a.pem"), testdata("key-a.pem")),
            ],
            ok_dispatch(),
        );

        assert_eq!(server.addrs.len(), 2);
        assert!(server.addrs.iter().all(|a| a.port() != 0));
        assert_ne!(server.addrs[0].port(), server.addrs[1].port());

        // Plaintext connection on the first listener.
        let mut plain = std::net::TcpStream::connect(server.addrs[0]).unwrap();
        plain
            .write_all(b"GET /plain HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .unwrap();
        let response = read_one_response(&mut plain);
        assert!(response.starts_with("HTTP/1.1 200 OK"));

        // TLS handshake and request on the second.
        let mut tls = TlsClient::connect(server.addrs[1]);
        let response = tls.roundtrip(b"GET /secure HTTP/1.1\r\nHost: localhost\r\n\r\n");
        assert!(response.starts_with("HTTP/1.1 200 OK"));

        server.manager.stop_listening();
    }

    #[test]
    fn test_should_reload_tls_material_on_two_listeners_without_dropping_connections() {
        // Both listeners start from copies of cert A so the files can be
        // swapped underneath the running server.
        let cert_file = tempfile::NamedTempFile::new().unwrap();
        let key_file = tempfile::NamedTempFile::new().unwrap();
        std::fs::copy(testdata("cert-a.pem"), cert_file.path()).unwrap();
        std::fs::copy(testdata("key-a.pem"), key_file.path()).unwrap();

        let server = start_server(
            vec![
                ListenerConfig::new("127.0.0.1", 0).with_tls(cert_file.path(), key_file.path()),
                ListenerConfig::new("127.0.0.1", 0).with_tls(cert_file.path(), key_file.path()),
            ],
            ok_dispatch(),
        );

        // Live connection established before the reload, on each listener.
        let mut live_one = TlsClient::connect(server.addrs[0]);
        let mut live_two = TlsClient::connect(server.addrs[1]);
        let cert_before = live_one.peer_cert_der();

        // Swap the material on disk and reload.
        std::fs::copy(testdata("cert-b.pem"), cert_file.path()).unwrap();
        std::fs::copy(testdata("key-b.pem"), key_file.path()).unwrap();
        server.manager.reload_tls_files().unwrap();

        // Connections opened before the reload keep working.
        let response = live_one.roundtrip(b"GET /still-alive HTTP/1.1\r\nHost: localhost\r\n\r\n");
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        let response = live_two.roundtrip(b"GET /still-alive HTTP/1.1\r\nHost: localhost\r\n\r\n");
        assert!(response.starts_with("HTTP/1.1 200 OK"));

        // New connections on both listeners present the refreshed cert.
        for &addr in &server.addrs {
            let fresh = TlsClient::connect(addr);
            assert_ne!(fresh.peer_cert_der(), cert_before);
        }

        server.manager.stop_listening();
    }

    #[test]
    fn test_should_keep_previous_material_when_reload_fails() {
        let cert_file = tempfile::NamedTempFile::new().unwrap();
        let key_file = tempfile::NamedTempFile::new().unwrap();
        std::fs::copy(testdata("cert-a.pem"), cert_file.path()).unwrap();
        std::fs::copy(testdata("key-a.pem"), key_file.path()).unwrap();

        let server = start_server(
            vec![ListenerConfig::new("127.0.0.1", 0).with_tls(cert_file.path(), key_file.path())],
            ok_dispatch(),
        );

        let cert_before = TlsClient::connect(server.addrs[0]).peer_cert_der();

        // Corrupt the on-disk material; the reload must fail and leave
        // the active config untouched.
        std::fs::write(cert_file.path(), "not a pem").unwrap();
        assert!(server.manager.reload_tls_files().is_err());

        let fresh = TlsClient::connect(server.addrs[0]);
        assert_eq!(fresh.peer_cert_der(), cert_before);

        server.manager.stop_listening();
    }

    #[test]
    fn test_should_stop_accepting_after_stop_listening() {
        let server = start_server(vec![ListenerConfig::new("127.0.0.1", 0)], ok_dispatch());
        let addr = server.addrs[0];

        // Sanity check the listener works, then stop it.
        let mut client = std::net::TcpStream::connect(addr).unwrap();
        client
            .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .unwrap();
        assert!(read_one_response(&mut client).starts_with("HTTP/1.1 200 OK"));

        server.manager.stop_listening();

        // The listening sockets close shortly after; new connections are
        // eventually refused (allow a few scheduler ticks).
        let refused = (0..50).any(|_| {
            std::thread::sleep(std::time::Duration::from_millis(20));
            std::net::TcpStream::connect(addr).is_err()
        });
        assert!(refused, "listener kept accepting after stop_listening");
    }
}
