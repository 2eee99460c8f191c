//! squid-forward - local TCP forwarding over TLS, HTTP CONNECT tunnels and
//! SSH sessions carried through those tunnels.
//!
//! A [`Proxy`] relays every accepted connection to a fixed remote over TLS.
//! A [`Tunnel`] asks a coordinator proxy for a CONNECT tunnel per
//! connection and relays through it, or runs SSH over the tunnel and relays
//! through a `direct-tcpip` channel to a final bind address.

pub mod config;
pub mod error;
pub mod forwarding;
pub mod net;
pub mod ssh;
pub mod transport;

pub use config::{ListenerConfig, ListenerMode, ProxyConfig, TunnelAuth, TunnelConfig};
pub use error::{ForwardError, Result};
pub use forwarding::{ConnectHook, ForwardStats, Listener, Proxy, Tunnel};
pub use net::free_port;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging for binaries embedding the forwarders
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();
}
