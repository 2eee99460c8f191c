//! `direct-tcpip` channels opened inside an SSH session that itself runs
//! over another connector's stream.

use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle, Msg};
use russh::keys::key::PrivateKeyWithHashAlg;
use russh::keys::{HashAlg, PrivateKey};
use russh::ChannelStream;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::{debug, info};

use super::client::ClientHandler;
use crate::config::TunnelConfig;
use crate::error::{ForwardError, Result};
use crate::net::split_host_port;
use crate::transport::Connector;

/// Load and parse the PEM private key used for public key authentication
pub fn load_private_key(path: &Path) -> Result<PrivateKey> {
    russh::keys::load_secret_key(path, None).map_err(|e| {
        ForwardError::KeyError(format!("Failed to load key {}: {}", path.display(), e))
    })
}

/// Hash for the public key signature.
///
/// RSA keys take the best rsa-sha2 variant from the server's
/// `server-sig-algs`, or SHA-256 when the server sent no extension info.
/// Other key types carry no hash.
fn signature_hash(is_rsa: bool, server: Option<Option<HashAlg>>) -> Option<HashAlg> {
    if !is_rsa {
        return None;
    }
    server.unwrap_or(Some(HashAlg::Sha256))
}

/// Dials `inner`, runs SSH over it, and opens a channel to the bind address
pub struct SshChannelConnector<C> {
    inner: C,
    bind_addr: String,
    key_path: Option<PathBuf>,
    user: String,
    config: Arc<client::Config>,
}

impl<C: Connector> SshChannelConnector<C> {
    pub fn new(inner: C, config: &TunnelConfig) -> Self {
        let ssh_config = client::Config {
            inactivity_timeout: None,
            keepalive_interval: Some(Duration::from_secs(30)),
            keepalive_max: 3,
            ..Default::default()
        };

        Self {
            inner,
            bind_addr: config.bind_addr.clone(),
            key_path: config.key_path(),
            user: config.ssh_user.clone(),
            config: Arc::new(ssh_config),
        }
    }

    fn load_key(&self) -> Result<PrivateKey> {
        let path = self
            .key_path
            .as_deref()
            .ok_or_else(|| ForwardError::KeyError("no private key path configured".into()))?;
        load_private_key(path)
    }
}

#[async_trait]
impl<C: Connector> Connector for SshChannelConnector<C> {
    type Stream = SshChannelStream;

    fn target(&self) -> &str {
        &self.bind_addr
    }

    async fn connect(&self) -> Result<SshChannelStream> {
        let remote = self.inner.target().to_string();
        let transport = self.inner.connect().await?;

        // A bad key or bind address must never reach the handshake
        let key = self.load_key()?;
        let (bind_host, bind_port) = split_host_port(&self.bind_addr)?;

        let handler = ClientHandler::new(remote.clone());
        let mut handle = client::connect_stream(self.config.clone(), transport, handler)
            .await
            .map_err(|e| {
                ForwardError::ConnectionFailed(format!("SSH handshake with {} failed: {}", remote, e))
            })?;
        debug!("SSH handshake with {} completed", remote);

        let is_rsa = key.algorithm().is_rsa();
        let server_hash = if is_rsa {
            handle.best_supported_rsa_hash().await?
        } else {
            None
        };
        let key_with_hash =
            PrivateKeyWithHashAlg::new(Arc::new(key), signature_hash(is_rsa, server_hash));
        let authenticated = handle
            .authenticate_publickey(&self.user, key_with_hash)
            .await
            .map_err(|e| ForwardError::AuthenticationFailed(e.to_string()))?;
        if !authenticated.success() {
            return Err(ForwardError::AuthenticationFailed(format!(
                "public key for {} rejected by {}",
                self.user, remote
            )));
        }

        let channel = handle
            .channel_open_direct_tcpip(bind_host.as_str(), bind_port as u32, "127.0.0.1", 0)
            .await
            .map_err(|e| {
                ForwardError::ChannelError(format!(
                    "Failed to open channel to {} via {}: {}",
                    self.bind_addr, remote, e
                ))
            })?;

        info!("Opened SSH channel to {} via {}", self.bind_addr, remote);
        Ok(SshChannelStream {
            stream: Box::pin(channel.into_stream()),
            _session: Box::new(handle),
        })
    }
}

/// A channel stream that keeps its SSH session alive.
///
/// Dropping it drops the session handle, which disconnects the session and
/// with it the tunnel underneath.
pub struct SshChannelStream {
    stream: Pin<Box<ChannelStream<Msg>>>,
    // boxed so the wrapper stays Unpin
    _session: Box<Handle<ClientHandler>>,
}

impl AsyncRead for SshChannelStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.get_mut().stream.as_mut().poll_read(cx, buf)
    }
}

impl AsyncWrite for SshChannelStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.get_mut().stream.as_mut().poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.get_mut().stream.as_mut().poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.get_mut().stream.as_mut().poll_shutdown(cx)
    }
}
