use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;

use wss_bridge::tls::build_server_config;
use wss_bridge::{Acceptor, Limits, Server, Upstream};

const UPGRADE: &[u8] = b"GET /chat HTTP/1.1\r\nHost: x\r\nUpgrade: websocket\r\n\r\n";
const WAIT: Duration = Duration::from_secs(5);

struct Bridge {
    addr: SocketAddr,
    server: Arc<Server>,
    shutdown: CancellationToken,
}

async fn start_bridge(acceptor: Acceptor, upstream: String) -> Bridge {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Arc::new(Server::new(acceptor, Upstream::new(upstream), Limits::default()));
    let shutdown = CancellationToken::new();

    let serving = server.clone();
    let token = shutdown.clone();
    tokio::spawn(async move { serving.serve(listener, token).await.unwrap() });

    Bridge {
        addr,
        server,
        shutdown,
    }
}

/// Upstream that writes back every byte it receives.
async fn echo_upstream() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::spawn(async move {
                let (mut rd, mut wr) = stream.into_split();
                let _ = tokio::io::copy(&mut rd, &mut wr).await;
            });
        }
    });
    addr
}

async fn unreachable_upstream() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);
    addr
}

async fn read_response(stream: &mut TcpStream) -> String {
    let mut out = String::new();
    timeout(WAIT, stream.read_to_string(&mut out))
        .await
        .unwrap()
        .unwrap();
    out
}

#[tokio::test]
async fn upgrade_request_is_echoed_byte_for_byte() {
    let bridge = start_bridge(Acceptor::Plain, echo_upstream().await).await;

    let mut client = TcpStream::connect(bridge.addr).await.unwrap();
    client.write_all(UPGRADE).await.unwrap();

    let mut got = vec![0u8; UPGRADE.len()];
    timeout(WAIT, client.read_exact(&mut got)).await.unwrap().unwrap();
    assert_eq!(got, UPGRADE);

    client.write_all(b"\x81\x05hello").await.unwrap();
    let mut frame = [0u8; 7];
    timeout(WAIT, client.read_exact(&mut frame)).await.unwrap().unwrap();
    assert_eq!(&frame, b"\x81\x05hello");
}

#[tokio::test]
async fn unreachable_upstream_gets_502() {
    let bridge = start_bridge(Acceptor::Plain, unreachable_upstream().await).await;

    let mut client = TcpStream::connect(bridge.addr).await.unwrap();
    client.write_all(UPGRADE).await.unwrap();

    let response = read_response(&mut client).await;
    assert!(
        response.starts_with("HTTP/1.1 502 Bad Gateway\r\n"),
        "unexpected response: {response:?}"
    );
}

#[tokio::test]
async fn malformed_request_gets_400() {
    let bridge = start_bridge(Acceptor::Plain, echo_upstream().await).await;

    let mut client = TcpStream::connect(bridge.addr).await.unwrap();
    client.write_all(b"NOT HTTP AT ALL\r\n\r\n").await.unwrap();

    let response = read_response(&mut client).await;
    assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
}

#[tokio::test]
async fn client_close_reaches_upstream_as_eof() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream = listener.local_addr().unwrap().to_string();
    let bridge = start_bridge(Acceptor::Plain, upstream).await;

    let (done_tx, mut done_rx) = mpsc::channel(1);
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut head = vec![0u8; UPGRADE.len()];
        stream.read_exact(&mut head).await.unwrap();
        let mut rest = Vec::new();
        let read = stream.read_to_end(&mut rest).await;
        done_tx.send((head, rest, read.is_ok())).await.unwrap();
    });

    let mut client = TcpStream::connect(bridge.addr).await.unwrap();
    client.write_all(UPGRADE).await.unwrap();
    client.write_all(b"tail").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    drop(client);

    let (head, rest, clean) = timeout(WAIT, done_rx.recv()).await.unwrap().unwrap();
    assert_eq!(head, UPGRADE);
    assert_eq!(rest, b"tail");
    assert!(clean);
}

#[tokio::test]
async fn tls_termination_relays_plaintext_upstream() {
    let rcgen::CertifiedKey { cert, key_pair } =
        rcgen::generate_simple_self_signed(vec!["localhost".into()]).unwrap();
    let server_config =
        build_server_config(cert.pem().as_bytes(), key_pair.serialize_pem().as_bytes()).unwrap();
    let bridge = start_bridge(
        Acceptor::tls(Arc::new(server_config)),
        echo_upstream().await,
    )
    .await;

    let mut roots = rustls::RootCertStore::empty();
    roots.add(cert.der().clone()).unwrap();
    let client_config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(client_config));
    let domain = rustls::pki_types::ServerName::try_from("localhost").unwrap();

    let tcp = TcpStream::connect(bridge.addr).await.unwrap();
    let mut client = connector.connect(domain, tcp).await.unwrap();
    client.write_all(UPGRADE).await.unwrap();
    client.flush().await.unwrap();

    let mut got = vec![0u8; UPGRADE.len()];
    timeout(WAIT, client.read_exact(&mut got)).await.unwrap().unwrap();
    assert_eq!(got, UPGRADE);
}

#[tokio::test]
async fn drain_force_closes_idle_relays() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream = listener.local_addr().unwrap().to_string();
    let bridge = start_bridge(Acceptor::Plain, upstream).await;

    // Upstream that accepts and then stays silent.
    let (held_tx, mut held_rx) = mpsc::channel(1);
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        held_tx.send(stream).await.unwrap();
    });

    let mut client = TcpStream::connect(bridge.addr).await.unwrap();
    client.write_all(UPGRADE).await.unwrap();
    let mut held = timeout(WAIT, held_rx.recv()).await.unwrap().unwrap();
    let mut head = vec![0u8; UPGRADE.len()];
    held.read_exact(&mut head).await.unwrap();

    bridge.shutdown.cancel();
    timeout(WAIT, bridge.server.drain(Duration::from_millis(100)))
        .await
        .unwrap();

    let mut rest = Vec::new();
    timeout(WAIT, client.read_to_end(&mut rest))
        .await
        .unwrap()
        .unwrap();
    assert!(rest.is_empty());
}
