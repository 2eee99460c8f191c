//! Forwarding listener: every connection is relayed over TLS to one remote

use crate::config::ProxyConfig;
use crate::error::Result;
use crate::transport::TlsConnector;

use super::listener::{ConnectHook, ForwardStats, Listener};

pub struct Proxy {
    listener: Listener<TlsConnector>,
}

impl Proxy {
    /// Create a proxy towards `addr` ("host:port"); fails when `addr` is empty
    pub fn new(addr: impl Into<String>) -> Result<Self> {
        Self::with_config(ProxyConfig::new(addr))
    }

    pub fn with_config(config: ProxyConfig) -> Result<Self> {
        config.validate()?;
        let mut listener = Listener::new(TlsConnector::new(config.remote_addr)?);
        if let Some(max) = config.max_connections {
            listener = listener.with_max_connections(max);
        }
        Ok(Self { listener })
    }

    pub fn on_client_connect(&mut self, hook: impl ConnectHook) {
        self.listener.on_client_connect(hook);
    }

    pub async fn start(&self, port: u16) -> Result<()> {
        self.listener.start(port).await
    }

    pub fn port(&self) -> u16 {
        self.listener.port()
    }

    pub fn stats(&self) -> ForwardStats {
        self.listener.stats()
    }

    pub async fn close(&self) -> Result<()> {
        self.listener.close().await
    }
}
