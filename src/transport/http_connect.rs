//! HTTP CONNECT tunnel through a coordinator proxy

use std::time::Duration;

use async_trait::async_trait;
use base64::prelude::{Engine as _, BASE64_STANDARD};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info};
use url::{Host, Url};

use super::Connector;
use crate::config::{TunnelAuth, TunnelConfig};
use crate::error::{ForwardError, Result};
use crate::net::has_port;

/// Maximum number of response headers to parse
const MAX_HEADERS: usize = 64;

/// Upper bound on the response head before giving up
const MAX_RESPONSE_HEAD: usize = 16 * 1024;

pub struct HttpConnectConnector {
    /// Hostname sent in the Host header
    proxy_host: String,
    /// "host:port" actually dialed
    proxy_addr: String,
    /// CONNECT target
    target: String,
    auth: Option<TunnelAuth>,
    timeout: Duration,
}

impl HttpConnectConnector {
    pub fn new(config: &TunnelConfig) -> Result<Self> {
        let url = Url::parse(&format!("http://{}", config.proxy_addr)).map_err(|e| {
            ForwardError::Config(format!("invalid proxy address {:?}: {}", config.proxy_addr, e))
        })?;
        let proxy_host = match url.host() {
            Some(Host::Ipv6(addr)) => addr.to_string(),
            Some(host) => host.to_string(),
            None => {
                return Err(ForwardError::Config(format!(
                    "missing host in proxy address {:?}",
                    config.proxy_addr
                )))
            }
        };
        // host_str keeps the brackets around IPv6 literals, which is what the dialer wants
        let proxy_addr = format!(
            "{}:{}",
            url.host_str().unwrap_or_default(),
            url.port_or_known_default().unwrap_or(80)
        );

        let mut target = config.remote_addr.clone();
        if config.ssh && !has_port(&target) {
            target.push_str(":22");
        }

        Ok(Self {
            proxy_host,
            proxy_addr,
            target,
            auth: config.auth.clone(),
            timeout: config.connect_timeout(),
        })
    }

    /// The coordinator address that will be dialed
    pub fn proxy_addr(&self) -> &str {
        &self.proxy_addr
    }
}

#[async_trait]
impl Connector for HttpConnectConnector {
    type Stream = TcpStream;

    fn target(&self) -> &str {
        &self.target
    }

    async fn connect(&self) -> Result<TcpStream> {
        let stream = tokio::time::timeout(self.timeout, TcpStream::connect(&self.proxy_addr))
            .await
            .map_err(|_| {
                ForwardError::Timeout(format!("dialing proxy {:?} timed out", self.proxy_addr))
            })?
            .map_err(|e| {
                ForwardError::ConnectionFailed(format!(
                    "dialing proxy {:?} failed: {}",
                    self.proxy_addr, e
                ))
            })?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY: {}", e);
        }

        let stream = connect_handshake(
            stream,
            &self.target,
            &self.proxy_host,
            self.auth.as_ref(),
            &self.proxy_addr,
        )
        .await?;

        info!("CONNECT tunnel to {} via {} established", self.target, self.proxy_addr);
        Ok(stream)
    }
}

/// Run the CONNECT exchange on an already dialed coordinator stream.
///
/// On success the stream is handed back untouched: nothing past the
/// response head has been consumed, and any such bytes fail the handshake.
pub async fn connect_handshake<S>(
    mut stream: S,
    target: &str,
    proxy_host: &str,
    auth: Option<&TunnelAuth>,
    proxy_label: &str,
) -> Result<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut request = format!("CONNECT {} HTTP/1.1\r\nHost: {}\r\n", target, proxy_host);
    if let Some(auth) = auth {
        let token = BASE64_STANDARD.encode(format!("{}:{}", auth.username, auth.password));
        request.push_str(&format!("Proxy-Authorization: Basic {}\r\n", token));
    }
    request.push_str("\r\n");

    stream.write_all(request.as_bytes()).await?;
    stream.flush().await?;

    let mut buf: Vec<u8> = Vec::with_capacity(1024);
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(ForwardError::MalformedResponse {
                proxy: proxy_label.to_string(),
                reason: "connection closed before end of response headers".into(),
            });
        }
        buf.extend_from_slice(&chunk[..n]);

        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut response = httparse::Response::new(&mut headers);
        match response.parse(&buf) {
            Ok(httparse::Status::Complete(head_len)) => {
                let status = response.code.unwrap_or_default();
                if status != 200 {
                    return Err(ForwardError::ConnectRejected {
                        proxy: proxy_label.to_string(),
                        status,
                        reason: response.reason.unwrap_or_default().to_string(),
                    });
                }
                let buffered = buf.len() - head_len;
                if buffered > 0 {
                    return Err(ForwardError::ConnectProtocolViolation {
                        proxy: proxy_label.to_string(),
                        buffered,
                    });
                }
                return Ok(stream);
            }
            Ok(httparse::Status::Partial) => {
                if buf.len() > MAX_RESPONSE_HEAD {
                    return Err(ForwardError::MalformedResponse {
                        proxy: proxy_label.to_string(),
                        reason: format!("response head exceeds {} bytes", MAX_RESPONSE_HEAD),
                    });
                }
            }
            Err(e) => {
                return Err(ForwardError::MalformedResponse {
                    proxy: proxy_label.to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }
}
