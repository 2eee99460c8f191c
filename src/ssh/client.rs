//! russh client callbacks

use russh::client;
use russh::keys::PublicKey;
use tracing::debug;

use crate::error::ForwardError;

/// Client handler for tunneled sessions
///
/// Trust is anchored in the coordinator path and the client key, so the
/// server's host key is accepted without verification.
pub struct ClientHandler {
    /// Remote address, used for log lines only
    host: String,
}

impl ClientHandler {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }
}

impl client::Handler for ClientHandler {
    type Error = ForwardError;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        debug!(
            "Accepting {} host key for {} without verification",
            server_public_key.algorithm().as_str(),
            self.host
        );
        Ok(true)
    }
}
