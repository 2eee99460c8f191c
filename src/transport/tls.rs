//! Direct TLS dial
//!
//! The remote end is trusted by configuration, so certificate verification
//! is switched off.

use std::sync::Arc;

use async_trait::async_trait;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tracing::debug;

use super::Connector;
use crate::error::{ForwardError, Result};
use crate::net::split_host_port;

pub struct TlsConnector {
    remote_addr: String,
    server_name: ServerName<'static>,
    connector: tokio_rustls::TlsConnector,
}

impl TlsConnector {
    pub fn new(remote_addr: impl Into<String>) -> Result<Self> {
        let remote_addr = remote_addr.into();
        let (host, _) = split_host_port(&remote_addr)?;
        let server_name = ServerName::try_from(host)
            .map_err(|e| ForwardError::Config(format!("invalid TLS server name: {}", e)))?;

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let verifier = SkipVerification {
            schemes: provider
                .signature_verification_algorithms
                .supported_schemes(),
        };
        let config = rustls::ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(verifier))
            .with_no_client_auth();

        Ok(Self {
            remote_addr,
            server_name,
            connector: tokio_rustls::TlsConnector::from(Arc::new(config)),
        })
    }
}

#[async_trait]
impl Connector for TlsConnector {
    type Stream = TlsStream<TcpStream>;

    fn target(&self) -> &str {
        &self.remote_addr
    }

    async fn connect(&self) -> Result<Self::Stream> {
        let tcp = TcpStream::connect(&self.remote_addr).await.map_err(|e| {
            ForwardError::ConnectionFailed(format!("dialing {} failed: {}", self.remote_addr, e))
        })?;
        if let Err(e) = tcp.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY: {}", e);
        }

        self.connector
            .connect(self.server_name.clone(), tcp)
            .await
            .map_err(|e| {
                ForwardError::Tls(format!("handshake with {} failed: {}", self.remote_addr, e))
            })
    }
}

// Accepts any server certificate
#[derive(Debug)]
struct SkipVerification {
    schemes: Vec<SignatureScheme>,
}

impl ServerCertVerifier for SkipVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.schemes.clone()
    }
}
