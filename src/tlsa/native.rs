//! In-process certificate inspection over tokio + rustls.
use std::sync::Arc;

use async_trait::async_trait;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::trace;
use x509_parser::prelude::*;

use super::{CertificateInspector, ProbeEndpoint, ProbeTarget, TlsMode, starttls};
use crate::error::ProbeError;

/// Name sent in SMTP `EHLO`.
const EHLO_NAME: &str = "localhost";

/// Accepts whatever certificate the server presents. A DANE-EE record pins
/// the key itself, so chain and name validation do not apply; handshake
/// signatures are still checked against the presented key.
#[derive(Debug)]
struct AcceptAnyCertificate {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[derive(Clone)]
pub struct NativeInspector {
    connector: TlsConnector,
}

impl NativeInspector {
    pub fn new() -> Result<Self, ProbeError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()
            .map_err(|e| ProbeError::Tls(std::io::Error::other(e)))?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate { provider }))
            .with_no_client_auth();

        Ok(Self {
            connector: TlsConnector::from(Arc::new(config)),
        })
    }
}

async fn connect(endpoint: &ProbeEndpoint, port: u16) -> Result<TcpStream, ProbeError> {
    let connected = match endpoint {
        ProbeEndpoint::Ip(ip) => TcpStream::connect((*ip, port)).await,
        ProbeEndpoint::Host(host) => TcpStream::connect((host.as_str(), port)).await,
    };
    connected.map_err(|source| ProbeError::Connect {
        addr: endpoint.authority(port),
        source,
    })
}

/// DER SubjectPublicKeyInfo of a DER certificate.
pub fn spki_der(cert_der: &[u8]) -> Result<Vec<u8>, ProbeError> {
    let (_, cert) = X509Certificate::from_der(cert_der)
        .map_err(|e| ProbeError::Certificate(format!("unparsable certificate: {e}")))?;
    Ok(cert.public_key().raw.to_vec())
}

#[async_trait]
impl CertificateInspector for NativeInspector {
    async fn fetch_spki(
        &self,
        server_name: &str,
        endpoint: &ProbeEndpoint,
        target: &ProbeTarget,
    ) -> Result<Vec<u8>, ProbeError> {
        let name = ServerName::try_from(server_name.to_string())
            .map_err(|_| ProbeError::ServerName(server_name.to_string()))?;

        let mut stream = connect(endpoint, target.port).await?;
        trace!(target = target.label, "TCP connection established");

        if let TlsMode::Starttls(protocol) = target.mode {
            starttls::negotiate(&mut stream, protocol, EHLO_NAME).await?;
            trace!(target = target.label, %protocol, "STARTTLS accepted");
        }

        let tls = self
            .connector
            .connect(name, stream)
            .await
            .map_err(ProbeError::Tls)?;
        let (_, conn) = tls.get_ref();
        let leaf = conn
            .peer_certificates()
            .and_then(|chain| chain.first())
            .ok_or_else(|| ProbeError::Certificate("server sent no certificate".into()))?;

        spki_der(leaf.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn garbage_certificate_is_rejected() {
        assert!(matches!(
            spki_der(b"not a certificate"),
            Err(ProbeError::Certificate(_))
        ));
    }

    #[test]
    fn builds_client_config() {
        assert!(NativeInspector::new().is_ok());
    }
}
