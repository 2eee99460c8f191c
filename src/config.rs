//! Listener Configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ForwardError, Result};

/// Basic credentials presented to the coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelAuth {
    pub username: String,
    pub password: String,
}

impl TunnelAuth {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// Tunneled listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelConfig {
    /// Coordinator (HTTP CONNECT proxy) address, "host[:port]"
    pub proxy_addr: String,

    /// Target requested from the coordinator, "host[:port]"
    pub remote_addr: String,

    /// Final target dialed inside the SSH session (SSH mode only)
    #[serde(default)]
    pub bind_addr: String,

    /// Optional coordinator credentials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<TunnelAuth>,

    /// Layer an SSH session over the CONNECT tunnel
    #[serde(default)]
    pub ssh: bool,

    /// Path to the PEM private key used for SSH authentication
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_path: Option<String>,

    /// SSH service username
    #[serde(default = "default_ssh_user")]
    pub ssh_user: String,

    /// Coordinator dial timeout in seconds
    #[serde(default = "default_timeout")]
    pub connect_timeout_secs: u64,

    /// Ceiling on concurrently forwarded connections (unbounded when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<usize>,
}

impl TunnelConfig {
    pub fn new(proxy_addr: impl Into<String>, remote_addr: impl Into<String>) -> Self {
        Self {
            proxy_addr: proxy_addr.into(),
            remote_addr: remote_addr.into(),
            bind_addr: String::new(),
            auth: None,
            ssh: false,
            cert_path: None,
            ssh_user: default_ssh_user(),
            connect_timeout_secs: default_timeout(),
            max_connections: None,
        }
    }

    pub fn with_auth(mut self, auth: TunnelAuth) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Enable SSH layering towards `bind_addr`, authenticating with the key at `cert_path`
    pub fn with_ssh(mut self, bind_addr: impl Into<String>, cert_path: impl Into<String>) -> Self {
        self.ssh = true;
        self.bind_addr = bind_addr.into();
        self.cert_path = Some(cert_path.into());
        self
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = Some(max);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.proxy_addr.is_empty() {
            return Err(ForwardError::Config(
                "please provide the address of the proxy server".into(),
            ));
        }
        if self.remote_addr.is_empty() {
            return Err(ForwardError::Config(
                "please provide the address of the remote server".into(),
            ));
        }
        check_max_connections(self.max_connections)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Key path with a leading `~` expanded
    pub fn key_path(&self) -> Option<PathBuf> {
        self.cert_path.as_deref().map(expand_tilde)
    }
}

/// Forwarding listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Remote TLS endpoint, "host:port"
    pub remote_addr: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<usize>,
}

impl ProxyConfig {
    pub fn new(remote_addr: impl Into<String>) -> Self {
        Self {
            remote_addr: remote_addr.into(),
            max_connections: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.remote_addr.is_empty() {
            return Err(ForwardError::Config(
                "please provide the addr of the proxy server".into(),
            ));
        }
        check_max_connections(self.max_connections)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ListenerMode {
    Proxy(ProxyConfig),
    Tunnel(TunnelConfig),
}

/// On-disk listener description consumed by the binary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Local port, 0 picks a free one
    #[serde(default)]
    pub port: u16,

    #[serde(flatten)]
    pub mode: ListenerMode,
}

impl ListenerConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ForwardError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            ForwardError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        match &config.mode {
            ListenerMode::Proxy(proxy) => proxy.validate()?,
            ListenerMode::Tunnel(tunnel) => tunnel.validate()?,
        }
        Ok(config)
    }
}

fn check_max_connections(max: Option<usize>) -> Result<()> {
    if max == Some(0) {
        return Err(ForwardError::Config(
            "max_connections must be at least 1, leave it unset for no limit".into(),
        ));
    }
    Ok(())
}

/// Expand ~ to the home directory; russh::keys does not do it
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    } else if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

fn default_ssh_user() -> String {
    "kratos".to_string()
}

fn default_timeout() -> u64 {
    30
}
