//! Opening transports and wrapping them in TLS.

use std::{fmt, io, sync::Arc, time::Duration};

use async_trait::async_trait;
use mmail_common::{config::TlsConfig, tracing};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};
use tokio_rustls::{
    TlsConnector,
    rustls::{
        ClientConfig, DigitallySignedStruct, Error as RustlsError, RootCertStore, SignatureScheme,
        client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
        pki_types::{CertificateDer, ServerName, UnixTime},
    },
};

use crate::error::SmtpError;

/// A bidirectional byte stream, plain or TLS.
pub trait Stream: AsyncRead + AsyncWrite + Unpin + Send + fmt::Debug {}

impl<T> Stream for T where T: AsyncRead + AsyncWrite + Unpin + Send + fmt::Debug {}

pub type BoxedStream = Box<dyn Stream>;

/// Provides transports to the dialer.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a stream to `host:port`, giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// [`SmtpError::Connect`] for resolution failures, refusals and timeouts.
    async fn connect(&self, host: &str, port: u16, timeout: Duration) -> Result<BoxedStream, SmtpError>;

    /// Run a client TLS handshake over `stream`.
    ///
    /// # Errors
    ///
    /// [`SmtpError::TlsUpgrade`] when the handshake or the TLS setup fails.
    async fn wrap_tls(&self, stream: BoxedStream, config: &TlsConfig, host: &str) -> Result<BoxedStream, SmtpError>;
}

/// The default [`Connector`]: TCP with rustls on top.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, host: &str, port: u16, timeout: Duration) -> Result<BoxedStream, SmtpError> {
        let address = format!("{host}:{port}");
        let stream = tokio::time::timeout(timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| SmtpError::Connect {
                address: address.clone(),
                source: io::Error::new(io::ErrorKind::TimedOut, format!("timed out after {timeout:?}")),
            })?
            .map_err(|source| SmtpError::Connect {
                address: address.clone(),
                source,
            })?;

        Ok(Box::new(stream))
    }

    async fn wrap_tls(&self, stream: BoxedStream, config: &TlsConfig, host: &str) -> Result<BoxedStream, SmtpError> {
        let mut root_store = RootCertStore::empty();

        let certs = rustls_native_certs::load_native_certs();
        for cert in certs.certs {
            root_store
                .add(cert)
                .map_err(|e| SmtpError::TlsUpgrade(format!("Failed to add certificate: {e}")))?;
        }
        if !certs.errors.is_empty() {
            tracing::warn!(?certs.errors, "Some certificates could not be loaded");
        }

        let mut client_config = ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        if config.accepts_invalid_certs() {
            tracing::warn!(
                host,
                "SECURITY WARNING: TLS certificate validation is disabled for this connection"
            );
            client_config
                .dangerous()
                .set_certificate_verifier(Arc::new(NoVerifier));
        }

        let server_name = ServerName::try_from(config.server_name(host).to_string())
            .map_err(|e| SmtpError::TlsUpgrade(format!("Invalid domain: {e}")))?;

        let tls_stream = TlsConnector::from(Arc::new(client_config))
            .connect(server_name, stream)
            .await
            .map_err(|e| SmtpError::TlsUpgrade(e.to_string()))?;

        Ok(Box::new(tls_stream))
    }
}

/// Accepts any certificate. Only used when the caller asks for it.
#[derive(Debug)]
struct NoVerifier;

impl ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, RustlsError> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, RustlsError> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, RustlsError> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ED25519,
        ]
    }
}
