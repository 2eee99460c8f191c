//! Port Forwarding Module
//!
//! Two listeners share one accept loop and differ only in how the outbound
//! leg is dialed:
//! - [`Proxy`]: direct TLS to a fixed remote
//! - [`Tunnel`]: HTTP CONNECT through a coordinator, optionally with an SSH
//!   session layered on top

mod listener;
mod proxy;
mod relay;
mod tunnel;

pub use listener::{ConnectHook, ForwardStats, Listener};
pub use proxy::Proxy;
pub use relay::relay;
pub use tunnel::{Tunnel, TunnelConnector};
