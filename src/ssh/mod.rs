//! SSH layering over an established tunnel
//!
//! Uses russh's `connect_stream()` to run the SSH client handshake over any
//! byte stream (normally a CONNECT tunnel), then opens a `direct-tcpip`
//! channel inside the session to reach the final bind target.

mod channel;
mod client;

pub use channel::{load_private_key, SshChannelConnector, SshChannelStream};
pub use client::ClientHandler;
