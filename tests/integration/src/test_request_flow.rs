//! End-to-end request machinery tests: the connection layer feeding the
//! request object, observed from the dispatch side over real sockets.

#[cfg(test)]
mod tests {
    use std::io::Write as _;
    use std::sync::{Arc, Mutex};

    use bytes::Bytes;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use riptide_http::{ContentKind, DecompressStatus};
    use riptide_net::ListenerConfig;

    use crate::{read_one_response, start_server};

    fn ok_response() -> Bytes {
        Bytes::from_static(
            b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\nconnection: keep-alive\r\n\r\nok",
        )
    }

    fn close_response() -> Bytes {
        Bytes::from_static(b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok")
    }

    #[test]
    fn test_should_populate_request_from_wire_bytes() {
        #[derive(Debug, Default)]
        struct Observed {
            path: String,
            original_path: String,
            query_param: String,
            cookie: String,
            content_kind: Option<ContentKind>,
            json_name: Option<String>,
            secure: bool,
            connected: bool,
        }

        let observed = Arc::new(Mutex::new(Observed::default()));
        let sink = observed.clone();

        let server = start_server(
            vec![ListenerConfig::new("127.0.0.1", 0)],
            Arc::new(move |request| {
                let mut obs = sink.lock().unwrap();
                obs.path = request.path().to_owned();
                obs.original_path = request.original_path().to_owned();
                obs.query_param = request.get_parameter("tag").to_owned();
                obs.cookie = request.get_cookie("session").to_owned();
                obs.content_kind = Some(request.content_kind());
                obs.json_name = request
                    .json()
                    .and_then(|v| v["name"].as_str().map(ToOwned::to_owned));
                obs.secure = request.is_on_secure_connection();
                obs.connected = request.is_connected();
                close_response()
            }),
        );

        let body = br#"{"name":"riptide"}"#;
        let request = format!(
            "POST /docs/a%20b?tag=first&tag=second HTTP/1.1\r\n\
             Host: localhost\r\n\
             Cookie: session=s-123; theme=dark\r\n\
             Content-Type: application/json; charset=utf-8\r\n\
             Content-Length: {}\r\n\
             Connection: close\r\n\r\n",
            body.len()
        );
        let mut client = std::net::TcpStream::connect(server.addrs[0]).unwrap();
        client.write_all(request.as_bytes()).unwrap();
        client.write_all(body).unwrap();
        let response = read_one_response(&mut client);
        assert!(response.starts_with("HTTP/1.1 200 OK"));

        let obs = observed.lock().unwrap();
        assert_eq!(obs.path, "/docs/a b");
        assert_eq!(obs.original_path, "/docs/a%20b");
        // Last-write-wins on duplicate query keys.
        assert_eq!(obs.query_param, "second");
        assert_eq!(obs.cookie, "s-123");
        assert_eq!(obs.content_kind, Some(ContentKind::Json));
        assert_eq!(obs.json_name.as_deref(), Some("riptide"));
        assert!(!obs.secure);
        assert!(obs.connected);

        server.manager.stop_listening();
    }

    #[test]
    fn test_should_decompress_gzip_body_on_demand() {
        let outcome = Arc::new(Mutex::new((None::<DecompressStatus>, Vec::new())));
        let sink = outcome.clone();

        let server = start_server(
            vec![ListenerConfig::new("127.0.0.1", 0)],
            Arc::new(move |mut request| {
                let status = request.decompress_body();
                *sink.lock().unwrap() = (Some(status), request.body_view().to_vec());
                close_response()
            }),
        );

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"compressed on the wire").unwrap();
        let compressed = encoder.finish().unwrap();

        let head = format!(
            "POST /upload HTTP/1.1\r\nHost: localhost\r\nContent-Encoding: gzip\r\n\
             Content-Length: {}\r\nConnection: close\r\n\r\n",
            compressed.len()
        );
        let mut client = std::net::TcpStream::connect(server.addrs[0]).unwrap();
        client.write_all(head.as_bytes()).unwrap();
        client.write_all(&compressed).unwrap();
        read_one_response(&mut client);

        let (status, body) = outcome.lock().unwrap().clone();
        assert_eq!(status, Some(DecompressStatus::Ok));
        assert_eq!(body, b"compressed on the wire");

        server.manager.stop_listening();
    }

    #[test]
    fn test_should_serve_multiple_requests_on_keep_alive_connection() {
        let paths = Arc::new(Mutex::new(Vec::<String>::new()));
        let sink = paths.clone();

        let server = start_server(
            vec![ListenerConfig::new("127.0.0.1", 0)],
            Arc::new(move |request| {
                sink.lock().unwrap().push(request.path().to_owned());
                ok_response()
            }),
        );

        let mut client = std::net::TcpStream::connect(server.addrs[0]).unwrap();
        for path in ["/one", "/two", "/three"] {
            let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\n\r\n");
            client.write_all(request.as_bytes()).unwrap();
            let response = read_one_response(&mut client);
            assert!(response.starts_with("HTTP/1.1 200 OK"));
        }

        assert_eq!(paths.lock().unwrap().as_slice(), ["/one", "/two", "/three"]);
        server.manager.stop_listening();
    }

    #[test]
    fn test_should_mark_tls_requests_as_secure() {
        let secure = Arc::new(Mutex::new(None::<bool>));
        let sink = secure.clone();

        let server = start_server(
            vec![
                ListenerConfig::new("127.0.0.1", 0)
                    .with_tls(crate::testdata("cert-a.pem"), crate::testdata("key-a.pem")),
            ],
            Arc::new(move |request| {
                *sink.lock().unwrap() = Some(request.is_on_secure_connection());
                close_response()
            }),
        );

        let mut client = crate::TlsClient::connect(server.addrs[0]);
        client.roundtrip(b"GET /secure HTTP/1.1\r\nHost: localhost\r\n\r\n");

        assert_eq!(*secure.lock().unwrap(), Some(true));
        server.manager.stop_listening();
    }
}
