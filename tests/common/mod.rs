//! Shared fixtures: echo servers, a mock CONNECT coordinator and an
//! in-process SSH server.
#![allow(dead_code)]

use std::borrow::Cow;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use russh::keys::ssh_key::rand_core::OsRng;
use russh::keys::ssh_key::LineEnding;
use russh::keys::{Algorithm, HashAlg, PrivateKey, PublicKey};
use russh::server::{self, Auth, Msg, Session};
use russh::{Channel, Preferred};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout};
use tokio_rustls::TlsAcceptor;

pub const CHUNK: usize = 64 * 1024;

/// Three 64 KiB chunks with a per-connection pattern
pub fn payload(seed: u8) -> Vec<u8> {
    (0..3 * CHUNK)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

/// Write `payload(seed)` through the listener on `port` in three writes
/// and assert the same bytes come back.
pub async fn assert_echo(port: u16, seed: u8) {
    let stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let (mut read, mut write) = stream.into_split();

    let data = payload(seed);
    let expected = data.clone();
    let writer = tokio::spawn(async move {
        for chunk in data.chunks(CHUNK) {
            write.write_all(chunk).await.unwrap();
        }
        write
    });

    let mut received = vec![0u8; expected.len()];
    timeout(Duration::from_secs(15), read.read_exact(&mut received))
        .await
        .expect("echo timed out")
        .unwrap();
    assert!(received == expected, "echoed bytes differ for seed {}", seed);
    let _write = writer.await.unwrap();
}

/// Assert the peer closes the connection without sending anything
pub async fn assert_closed<R: AsyncRead + Unpin>(stream: &mut R) {
    let mut buf = [0u8; 16];
    match timeout(Duration::from_secs(5), stream.read(&mut buf)).await {
        Ok(Ok(0)) => {}
        Ok(Err(_)) => {}
        Ok(Ok(n)) => panic!("expected close, got {} bytes", n),
        Err(_) => panic!("connection was not closed"),
    }
}

/// Poll `check` until it holds or a few seconds pass
pub async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        sleep(Duration::from_millis(50)).await;
    }
    check()
}

pub async fn echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut read, mut write) = stream.split();
                let _ = tokio::io::copy(&mut read, &mut write).await;
            });
        }
    });
    addr
}

pub async fn tls_echo_server() -> SocketAddr {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let cert_der = cert.serialize_der().unwrap();
    let key_der = cert.serialize_private_key_der();

    let certs = vec![CertificateDer::from(cert_der)];
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_der));

    let config = rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .unwrap()
    .with_no_client_auth()
    .with_single_cert(certs, key)
    .unwrap();
    let acceptor = TlsAcceptor::from(Arc::new(config));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                let Ok(tls) = acceptor.accept(stream).await else {
                    return;
                };
                let (mut read, mut write) = tokio::io::split(tls);
                let _ = tokio::io::copy(&mut read, &mut write).await;
                let _ = write.shutdown().await;
            });
        }
    });
    addr
}

#[derive(Debug, Clone, Copy)]
pub enum CoordinatorMode {
    /// Answer 200 and splice to the requested target
    Tunnel,
    /// Answer with the given status
    Reject(u16, &'static str),
    /// Answer 200 followed by bytes that belong to the tunnel
    Trailing,
    /// Answer 200 and record whatever the client sends until it closes
    Hold,
}

pub struct MockCoordinator {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<String>>>,
    held: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl MockCoordinator {
    pub async fn start(mode: CoordinatorMode) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let held = Arc::new(Mutex::new(Vec::new()));

        let requests_clone = requests.clone();
        let held_clone = held.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let requests = requests_clone.clone();
                let held = held_clone.clone();
                tokio::spawn(serve_connect(stream, mode, requests, held));
            }
        });

        Self {
            addr,
            requests,
            held,
        }
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn held(&self) -> Vec<Vec<u8>> {
        self.held.lock().unwrap().clone()
    }
}

async fn read_head(stream: &mut TcpStream) -> Option<String> {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if stream.read(&mut byte).await.ok()? == 0 {
            return None;
        }
        head.push(byte[0]);
    }
    String::from_utf8(head).ok()
}

async fn serve_connect(
    mut stream: TcpStream,
    mode: CoordinatorMode,
    requests: Arc<Mutex<Vec<String>>>,
    held: Arc<Mutex<Vec<Vec<u8>>>>,
) {
    let Some(head) = read_head(&mut stream).await else {
        return;
    };
    let target = head
        .split_whitespace()
        .nth(1)
        .unwrap_or_default()
        .to_string();
    requests.lock().unwrap().push(head);

    match mode {
        CoordinatorMode::Tunnel => match TcpStream::connect(&target).await {
            Ok(mut upstream) => {
                let _ = stream
                    .write_all(b"HTTP/1.1 200 Connection established\r\n\r\n")
                    .await;
                let _ = tokio::io::copy_bidirectional(&mut stream, &mut upstream).await;
            }
            Err(_) => {
                let _ = stream.write_all(b"HTTP/1.1 502 Bad Gateway\r\n\r\n").await;
            }
        },
        CoordinatorMode::Reject(status, reason) => {
            let response = format!("HTTP/1.1 {} {}\r\nContent-Length: 0\r\n\r\n", status, reason);
            let _ = stream.write_all(response.as_bytes()).await;
        }
        CoordinatorMode::Trailing => {
            let _ = stream
                .write_all(b"HTTP/1.1 200 Connection established\r\n\r\nSSH-2.0-early\r\n")
                .await;
            let mut sink = Vec::new();
            let _ = stream.read_to_end(&mut sink).await;
        }
        CoordinatorMode::Hold => {
            let _ = stream
                .write_all(b"HTTP/1.1 200 Connection established\r\n\r\n")
                .await;
            let mut received = Vec::new();
            let _ = stream.read_to_end(&mut received).await;
            held.lock().unwrap().push(received);
        }
    }
}

/// Generate an Ed25519 client key and write it in OpenSSH PEM form
pub fn write_client_key() -> (tempfile::NamedTempFile, PublicKey) {
    let key = PrivateKey::random(&mut OsRng, Algorithm::Ed25519).unwrap();
    let pem = key.to_openssh(LineEnding::LF).unwrap();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    std::io::Write::write_all(&mut file, pem.as_bytes()).unwrap();
    (file, key.public_key().clone())
}

/// SSH server that accepts any public key and serves `direct-tcpip` by
/// dialing the requested target.
pub struct SshTestServer {
    pub addr: SocketAddr,
    users: Arc<Mutex<Vec<(String, PublicKey)>>>,
    channels: Arc<Mutex<Vec<String>>>,
}

impl SshTestServer {
    pub async fn start() -> Self {
        Self::start_with(Preferred::default()).await
    }

    /// Server whose RSA support is limited to rsa-sha2, like OpenSSH 8.8+
    pub async fn start_sha2_only() -> Self {
        let preferred = Preferred {
            key: Cow::Owned(vec![
                Algorithm::Ed25519,
                Algorithm::Rsa {
                    hash: Some(HashAlg::Sha512),
                },
                Algorithm::Rsa {
                    hash: Some(HashAlg::Sha256),
                },
            ]),
            ..Default::default()
        };
        Self::start_with(preferred).await
    }

    async fn start_with(preferred: Preferred) -> Self {
        let host_key = PrivateKey::random(&mut OsRng, Algorithm::Ed25519).unwrap();
        let config = Arc::new(server::Config {
            keys: vec![host_key],
            preferred,
            ..Default::default()
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let users = Arc::new(Mutex::new(Vec::new()));
        let channels = Arc::new(Mutex::new(Vec::new()));

        let users_clone = users.clone();
        let channels_clone = channels.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let handler = TestSshHandler {
                    users: users_clone.clone(),
                    channels: channels_clone.clone(),
                };
                let config = config.clone();
                tokio::spawn(async move {
                    if let Ok(session) = server::run_stream(config, stream, handler).await {
                        let _ = session.await;
                    }
                });
            }
        });

        Self {
            addr,
            users,
            channels,
        }
    }

    pub fn users(&self) -> Vec<(String, PublicKey)> {
        self.users.lock().unwrap().clone()
    }

    pub fn channels(&self) -> Vec<String> {
        self.channels.lock().unwrap().clone()
    }
}

struct TestSshHandler {
    users: Arc<Mutex<Vec<(String, PublicKey)>>>,
    channels: Arc<Mutex<Vec<String>>>,
}

impl server::Handler for TestSshHandler {
    type Error = russh::Error;

    async fn auth_publickey(
        &mut self,
        user: &str,
        public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        self.users
            .lock()
            .unwrap()
            .push((user.to_string(), public_key.clone()));
        Ok(Auth::Accept)
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        channel: Channel<Msg>,
        host_to_connect: &str,
        port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let target = format!("{}:{}", host_to_connect, port_to_connect);
        self.channels.lock().unwrap().push(target.clone());

        tokio::spawn(async move {
            let Ok(mut upstream) = TcpStream::connect(&target).await else {
                return;
            };
            let mut stream = Box::pin(channel.into_stream());
            let _ = tokio::io::copy_bidirectional(&mut stream, &mut upstream).await;
        });
        Ok(true)
    }
}
