//! Outbound transports
//!
//! Each layer exposes the same dial-like contract: `connect()` yields a
//! byte stream to the layer's target. Layers compose, so the SSH layer runs
//! over whatever stream the CONNECT layer hands it.
//!
//! ```text
//! TlsConnector          ── TLS ──────────────────────────────> remote
//! HttpConnectConnector  ── CONNECT ──> coordinator ──────────> remote
//! SshChannelConnector   ── CONNECT ──> coordinator ── SSH ──> remote ── direct-tcpip ──> bind
//! ```

mod http_connect;
mod tls;

pub use http_connect::{connect_handshake, HttpConnectConnector};
pub use tls::TlsConnector;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;

/// A bidirectional byte stream usable as either end of a relay
pub trait ByteStream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> ByteStream for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// Dials one outbound leg per forwarded connection
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Stream: ByteStream;

    /// Target description for log lines
    fn target(&self) -> &str;

    async fn connect(&self) -> Result<Self::Stream>;
}
