//! Address helpers shared by the listeners and dialers

use std::net::TcpListener;

use crate::error::{ForwardError, Result};

/// Every local listener binds the wildcard address
pub const LOCALHOST: &str = "0.0.0.0";

/// Ask the OS for a free port by binding a throwaway socket.
///
/// The socket is released before returning, so another process may still
/// grab the port before the caller binds it.
pub fn free_port() -> Result<u16> {
    let listener = TcpListener::bind((LOCALHOST, 0))?;
    Ok(listener.local_addr()?.port())
}

/// Split "host:port" (or "[v6]:port") into its parts
pub fn split_host_port(addr: &str) -> Result<(String, u16)> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| ForwardError::Config(format!("missing port in address {:?}", addr)))?;
    let port = port
        .parse::<u16>()
        .map_err(|_| ForwardError::Config(format!("invalid port in address {:?}", addr)))?;
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    if host.is_empty() {
        return Err(ForwardError::Config(format!("missing host in address {:?}", addr)));
    }
    Ok((host.to_string(), port))
}

/// Whether `addr` carries an explicit port
pub fn has_port(addr: &str) -> bool {
    if let Some(rest) = addr.strip_prefix('[') {
        return rest.contains("]:");
    }
    addr.split(':').count() > 1
}
