use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use snare_observe::{EventType, VecEventSink};
use snare_proxy::{ProxyConfig, ProxyServer};
use snare_tls::{AuthorityConfig, CertificateAuthority};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::{TlsAcceptor, TlsConnector};

struct ProxyFixture {
    addr: SocketAddr,
    sink: VecEventSink,
    server: Arc<ProxyServer>,
    // Dropping the tempdir removes the CA state after the test.
    cert_dir: tempfile::TempDir,
}

async fn start_proxy(insecure_upstream: bool) -> ProxyFixture {
    let cert_dir = tempfile::tempdir().expect("cert dir");
    let config = ProxyConfig {
        listen_port: 0,
        cert_dir: cert_dir.path().to_path_buf(),
        upstream_tls_insecure_skip_verify: insecure_upstream,
        ..ProxyConfig::default()
    };

    let sink = VecEventSink::default();
    let server =
        Arc::new(ProxyServer::new(config, Arc::new(sink.clone())).expect("proxy bootstrap"));
    let listener = server.bind().await.expect("bind proxy");
    let addr = listener.local_addr().expect("proxy addr");

    let runner = Arc::clone(&server);
    tokio::spawn(async move {
        let _ = runner.run_with_listener(listener).await;
    });

    ProxyFixture {
        addr,
        sink,
        server,
        cert_dir,
    }
}

async fn read_http_head<S: AsyncRead + Unpin>(stream: &mut S) -> Vec<u8> {
    let mut data = Vec::new();
    let mut buffer = [0_u8; 1024];
    while !data.windows(4).any(|window| window == b"\r\n\r\n") {
        let read = stream.read(&mut buffer).await.expect("read HTTP head");
        if read == 0 {
            break;
        }
        data.extend_from_slice(&buffer[..read]);
    }
    data
}

async fn read_to_end_allow_reset<S: AsyncRead + Unpin>(stream: &mut S) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buffer = [0_u8; 1024];
    loop {
        match stream.read(&mut buffer).await {
            Ok(0) => break,
            Ok(read) => out.extend_from_slice(&buffer[..read]),
            Err(error)
                if matches!(
                    error.kind(),
                    std::io::ErrorKind::UnexpectedEof
                        | std::io::ErrorKind::ConnectionReset
                        | std::io::ErrorKind::ConnectionAborted
                        | std::io::ErrorKind::BrokenPipe
                ) =>
            {
                break;
            }
            Err(error) => panic!("read response: {error}"),
        }
    }
    out
}

fn parse_content_length(head: &[u8]) -> usize {
    let text = String::from_utf8_lossy(head);
    for line in text.split("\r\n") {
        if let Some((name, value)) = line.split_once(':') {
            if name.eq_ignore_ascii_case("content-length") {
                return value.trim().parse().expect("valid content-length");
            }
        }
    }
    0
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn plain_get_is_rewritten_to_origin_form_and_strips_proxy_connection() {
    let origin_listener = TcpListener::bind("127.0.0.1:0").await.expect("bind origin");
    let origin_addr = origin_listener.local_addr().expect("origin addr");
    let origin_task = tokio::spawn(async move {
        let (mut stream, _) = origin_listener.accept().await.expect("accept origin");
        let head = read_http_head(&mut stream).await;
        let text = String::from_utf8_lossy(&head).to_string();
        assert!(text.starts_with("GET / HTTP/1.1\r\n"), "{text}");
        assert!(text.contains("\r\nConnection: keep-alive\r\n"), "{text}");
        assert!(!text.contains("Proxy-Connection"), "{text}");

        stream
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello")
            .await
            .expect("origin write");
    });

    let fixture = start_proxy(false).await;
    let mut client = TcpStream::connect(fixture.addr).await.expect("connect proxy");
    let request = format!(
        "GET http://127.0.0.1:{port}/ HTTP/1.1\r\nHost: 127.0.0.1:{port}\r\nProxy-Connection: keep-alive\r\n\r\n",
        port = origin_addr.port()
    );
    client.write_all(request.as_bytes()).await.expect("send request");

    let response = read_to_end_allow_reset(&mut client).await;
    let text = String::from_utf8_lossy(&response);
    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"), "{text}");
    assert!(text.ends_with("hello"), "{text}");

    origin_task.await.expect("origin task");
    tokio::time::sleep(Duration::from_millis(25)).await;

    let trace = fixture.sink.state_trace();
    assert_eq!(
        trace,
        vec![
            "await_request",
            "resolve_remote",
            "remote_connect",
            "forward_request",
            "await_response",
            "forward_response",
            "terminated",
        ]
    );
    let events = fixture.sink.snapshot();
    assert!(events.iter().any(|e| e.kind == EventType::RequestHeaders));
    assert!(events.iter().any(|e| e.kind == EventType::ResponseHeaders));
    assert!(events.iter().any(|e| e.kind == EventType::BodyChunk));
    let closed = events
        .iter()
        .find(|e| e.kind == EventType::SessionClosed)
        .expect("session closed event");
    assert_eq!(closed.attribute("reason_code"), Some("completed"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn connect_tunnel_intercepts_tls_with_a_minted_leaf() {
    // TLS origin with its own self-made identity; the proxy dials it with
    // verification disabled, exactly like an unknown upstream.
    let origin_authority = {
        let dir = tempfile::tempdir().expect("origin ca dir");
        let authority = CertificateAuthority::init(AuthorityConfig {
            cert_dir: dir.path().to_path_buf(),
            ..AuthorityConfig::default()
        })
        .expect("origin authority");
        (authority, dir)
    };
    let origin_leaf = origin_authority
        .0
        .leaf_for_host("127.0.0.1")
        .expect("origin leaf");

    let origin_listener = TcpListener::bind("127.0.0.1:0").await.expect("bind origin");
    let origin_addr = origin_listener.local_addr().expect("origin addr");
    let origin_task = tokio::spawn(async move {
        let acceptor = TlsAcceptor::from(Arc::clone(&origin_leaf.server_config));
        let (tcp, _) = origin_listener.accept().await.expect("accept origin");
        let mut tls = acceptor.accept(tcp).await.expect("origin TLS accept");

        let head = read_http_head(&mut tls).await;
        let text = String::from_utf8_lossy(&head).to_string();
        assert!(text.starts_with("GET /secret HTTP/1.1\r\n"), "{text}");

        tls.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 6\r\nConnection: close\r\n\r\nworld!")
            .await
            .expect("origin write");
        let _ = tls.shutdown().await;
    });

    let fixture = start_proxy(true).await;

    let mut tcp = TcpStream::connect(fixture.addr).await.expect("connect proxy");
    let connect = format!(
        "CONNECT 127.0.0.1:{port} HTTP/1.1\r\nHost: 127.0.0.1:{port}\r\n\r\n",
        port = origin_addr.port()
    );
    tcp.write_all(connect.as_bytes()).await.expect("send CONNECT");

    let reply = read_http_head(&mut tcp).await;
    let reply_text = String::from_utf8_lossy(&reply);
    assert!(
        reply_text.starts_with("HTTP/1.1 200 Connection Established\r\n"),
        "{reply_text}"
    );
    assert!(reply_text.contains("Proxy-Connection: Keep-Alive"), "{reply_text}");

    // Handshake with the proxy, trusting only its root CA.
    let mut roots = RootCertStore::empty();
    roots
        .add(fixture.server.authority().root_certificate_der().expect("root der"))
        .expect("trust proxy root");
    let mut client_config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    client_config.alpn_protocols = vec![b"http/1.1".to_vec()];
    let connector = TlsConnector::from(Arc::new(client_config));
    let server_name = ServerName::try_from("127.0.0.1".to_string()).expect("server name");
    let mut tls = connector.connect(server_name, tcp).await.expect("client TLS");

    tls.write_all(b"GET /secret HTTP/1.1\r\nHost: 127.0.0.1\r\nConnection: close\r\n\r\n")
        .await
        .expect("send tunneled request");
    tls.flush().await.expect("flush");

    let response = read_to_end_allow_reset(&mut tls).await;
    let text = String::from_utf8_lossy(&response);
    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"), "{text}");
    assert!(text.ends_with("world!"), "{text}");

    origin_task.await.expect("origin task");
    tokio::time::sleep(Duration::from_millis(25)).await;

    let trace = fixture.sink.state_trace();
    assert_eq!(
        trace,
        vec![
            "await_request",
            "tunnel_setup",
            "resolve_remote",
            "remote_connect",
            "remote_handshake",
            "forward_request",
            "await_response",
            "forward_response",
            "terminated",
        ]
    );

    let events = fixture.sink.snapshot();
    for peer in ["client", "server"] {
        assert!(
            events.iter().any(|event| {
                event.kind == EventType::TlsHandshakeSucceeded
                    && event.attribute("peer") == Some(peer)
            }),
            "missing TLS handshake success for peer={peer}"
        );
    }
    assert!(!events
        .iter()
        .any(|event| event.kind == EventType::TlsHandshakeFailed));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn chunked_response_streams_with_framing_preserved() {
    let origin_listener = TcpListener::bind("127.0.0.1:0").await.expect("bind origin");
    let origin_addr = origin_listener.local_addr().expect("origin addr");
    let origin_task = tokio::spawn(async move {
        let (mut stream, _) = origin_listener.accept().await.expect("accept origin");
        let _ = read_http_head(&mut stream).await;
        stream
            .write_all(
                b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n",
            )
            .await
            .expect("origin write");
    });

    let fixture = start_proxy(false).await;
    let mut client = TcpStream::connect(fixture.addr).await.expect("connect proxy");
    let request = format!(
        "GET http://127.0.0.1:{port}/ HTTP/1.1\r\nHost: 127.0.0.1:{port}\r\nConnection: close\r\n\r\n",
        port = origin_addr.port()
    );
    client.write_all(request.as_bytes()).await.expect("send request");

    let response = read_to_end_allow_reset(&mut client).await;
    let text = String::from_utf8_lossy(&response);
    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"), "{text}");
    assert!(text.contains("Transfer-Encoding: chunked"), "{text}");
    assert!(text.ends_with("\r\n\r\n5\r\nhello\r\n0\r\n\r\n"), "{text}");

    origin_task.await.expect("origin task");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn keep_alive_requests_reuse_one_origin_connection() {
    let origin_listener = TcpListener::bind("127.0.0.1:0").await.expect("bind origin");
    let origin_addr = origin_listener.local_addr().expect("origin addr");
    let origin_task = tokio::spawn(async move {
        // Exactly one accepted socket serves both exchanges; a second dial
        // from the proxy would strand the client and fail the test.
        let (mut stream, _) = origin_listener.accept().await.expect("accept origin");
        for index in 0..2 {
            let head = read_http_head(&mut stream).await;
            let text = String::from_utf8_lossy(&head).to_string();
            assert!(text.starts_with(&format!("GET /{index} HTTP/1.1\r\n")), "{text}");
            let body = format!("body{index}");
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: keep-alive\r\n\r\n{}",
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).await.expect("origin write");
        }
    });

    let fixture = start_proxy(false).await;
    let mut client = TcpStream::connect(fixture.addr).await.expect("connect proxy");

    for index in 0..2 {
        let request = format!(
            "GET http://127.0.0.1:{port}/{index} HTTP/1.1\r\nHost: 127.0.0.1:{port}\r\nProxy-Connection: keep-alive\r\n\r\n",
            port = origin_addr.port()
        );
        client.write_all(request.as_bytes()).await.expect("send request");

        let head = tokio::time::timeout(Duration::from_secs(5), read_http_head(&mut client))
            .await
            .expect("response head in time");
        let text = String::from_utf8_lossy(&head).to_string();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"), "{text}");

        let already = head
            .windows(4)
            .position(|window| window == b"\r\n\r\n")
            .map(|at| head.len() - (at + 4))
            .unwrap_or(0);
        let mut remainder = vec![0_u8; parse_content_length(&head) - already];
        client.read_exact(&mut remainder).await.expect("read body");
    }

    origin_task.await.expect("origin task");
    tokio::time::sleep(Duration::from_millis(25)).await;

    let trace = fixture.sink.state_trace();
    let cycles = trace.iter().filter(|state| *state == "forward_response").count();
    assert_eq!(cycles, 2, "{trace:?}");
    let connects = trace.iter().filter(|state| *state == "remote_connect").count();
    assert_eq!(connects, 2, "{trace:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn malformed_request_closes_without_touching_upstream_or_cert_dir() {
    let fixture = start_proxy(false).await;

    let mut client = TcpStream::connect(fixture.addr).await.expect("connect proxy");
    client
        .write_all(b"GE T / HTTP/1.1\r\n\r\n")
        .await
        .expect("send malformed request");

    let response = read_to_end_allow_reset(&mut client).await;
    let text = String::from_utf8_lossy(&response);
    assert!(text.starts_with("HTTP/1.1 400 Bad Request\r\n"), "{text}");

    tokio::time::sleep(Duration::from_millis(25)).await;

    // Bootstrap artifacts only; no leaf was minted and nothing was dialed.
    let mut files: Vec<String> = std::fs::read_dir(fixture.cert_dir.path())
        .expect("read cert dir")
        .map(|entry| entry.expect("entry").file_name().to_string_lossy().to_string())
        .collect();
    files.sort();
    assert_eq!(files, vec!["dh.pem", "root.crt"]);

    let events = fixture.sink.snapshot();
    let closed = events
        .iter()
        .find(|event| event.kind == EventType::SessionClosed)
        .expect("session closed event");
    assert_eq!(closed.attribute("reason_code"), Some("decode_error"));
    let trace = fixture.sink.state_trace();
    assert!(!trace.contains(&"remote_connect".to_string()), "{trace:?}");
}
