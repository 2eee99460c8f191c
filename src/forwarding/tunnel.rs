//! Tunneled listener: every connection goes through a coordinator's CONNECT
//! tunnel, optionally with an SSH session layered on top.

use async_trait::async_trait;

use crate::config::TunnelConfig;
use crate::error::Result;
use crate::ssh::SshChannelConnector;
use crate::transport::{ByteStream, Connector, HttpConnectConnector};

use super::listener::{ConnectHook, ForwardStats, Listener};

/// Outbound leg of a tunneled listener
pub enum TunnelConnector {
    /// Relay straight through the CONNECT tunnel
    Direct(HttpConnectConnector),
    /// Relay through a `direct-tcpip` channel of an SSH session over the tunnel
    Ssh(SshChannelConnector<HttpConnectConnector>),
}

impl TunnelConnector {
    pub fn new(config: &TunnelConfig) -> Result<Self> {
        let connect = HttpConnectConnector::new(config)?;
        Ok(if config.ssh {
            Self::Ssh(SshChannelConnector::new(connect, config))
        } else {
            Self::Direct(connect)
        })
    }
}

#[async_trait]
impl Connector for TunnelConnector {
    type Stream = Box<dyn ByteStream>;

    fn target(&self) -> &str {
        match self {
            Self::Direct(connector) => connector.target(),
            Self::Ssh(connector) => connector.target(),
        }
    }

    async fn connect(&self) -> Result<Box<dyn ByteStream>> {
        let stream: Box<dyn ByteStream> = match self {
            Self::Direct(connector) => Box::new(connector.connect().await?),
            Self::Ssh(connector) => Box::new(connector.connect().await?),
        };
        Ok(stream)
    }
}

pub struct Tunnel {
    config: TunnelConfig,
    listener: Listener<TunnelConnector>,
}

impl Tunnel {
    /// Fails when the coordinator or remote address is empty
    pub fn new(config: TunnelConfig) -> Result<Self> {
        config.validate()?;
        let mut listener = Listener::new(TunnelConnector::new(&config)?);
        if let Some(max) = config.max_connections {
            listener = listener.with_max_connections(max);
        }
        Ok(Self { config, listener })
    }

    pub fn config(&self) -> &TunnelConfig {
        &self.config
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
