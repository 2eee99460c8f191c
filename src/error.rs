//! Forwarding error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ForwardError>;

#[derive(Error, Debug)]
pub enum ForwardError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Listener already started on port {0}")]
    AlreadyStarted(u16),

    #[error("Listener is closed")]
    Closed,

    #[error("Connection rejected by hook: {0}")]
    Rejected(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("proxy error from {proxy}: {status} {reason}")]
    ConnectRejected {
        proxy: String,
        status: u16,
        reason: String,
    },

    #[error("unexpected {buffered} bytes of buffered data from CONNECT proxy {proxy:?}")]
    ConnectProtocolViolation { proxy: String, buffered: usize },

    #[error("Malformed CONNECT response from {proxy}: {reason}")]
    MalformedResponse { proxy: String, reason: String },

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Key error: {0}")]
    KeyError(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Channel error: {0}")]
    ChannelError(String),

    #[error("SSH protocol error: {0}")]
    ProtocolError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<russh::Error> for ForwardError {
    fn from(err: russh::Error) -> Self {
        ForwardError::ProtocolError(err.to_string())
    }
}

impl From<russh::keys::Error> for ForwardError {
    fn from(err: russh::keys::Error) -> Self {
        ForwardError::KeyError(err.to_string())
    }
}

impl From<rustls::Error> for ForwardError {
    fn from(err: rustls::Error) -> Self {
        ForwardError::Tls(err.to_string())
    }
}
