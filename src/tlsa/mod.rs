//! DANE TLSA derivation for the mail server's TLS endpoints.
//!
//! Every standard mail port is probed concurrently. A probe connects to the
//! server (upgrading with the protocol's STARTTLS dialect where the port
//! speaks plaintext first), takes the public key of the leaf certificate and
//! publishes its SHA-256 as a `3 1 1` (DANE-EE, SPKI, SHA-256) record.

pub mod native;
pub mod openssl;
pub mod starttls;

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::ProbeError;
use crate::records::{DnsRecord, RecordType};
use crate::validation::fqdn;

pub use native::NativeInspector;
pub use openssl::OpensslInspector;

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StarttlsProtocol {
    Smtp,
    Pop3,
    Imap,
    Sieve,
}

impl StarttlsProtocol {
    /// Name understood by `openssl s_client -starttls`.
    pub fn as_str(self) -> &'static str {
        match self {
            StarttlsProtocol::Smtp => "smtp",
            StarttlsProtocol::Pop3 => "pop3",
            StarttlsProtocol::Imap => "imap",
            StarttlsProtocol::Sieve => "sieve",
        }
    }
}

impl fmt::Display for StarttlsProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "protocol")]
pub enum TlsMode {
    /// TLS from the first byte.
    Direct,
    /// Plaintext greeting, then an in-band upgrade.
    Starttls(StarttlsProtocol),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProbeTarget {
    pub label: &'static str,
    pub port: u16,
    pub mode: TlsMode,
}

impl ProbeTarget {
    pub const fn direct(label: &'static str, port: u16) -> Self {
        Self {
            label,
            port,
            mode: TlsMode::Direct,
        }
    }

    pub const fn starttls(label: &'static str, port: u16, protocol: StarttlsProtocol) -> Self {
        Self {
            label,
            port,
            mode: TlsMode::Starttls(protocol),
        }
    }
}

/// One entry per standard mail service port.
pub const PROBE_TARGETS: [ProbeTarget; 9] = [
    ProbeTarget::starttls("smtp over starttls", 25, StarttlsProtocol::Smtp),
    ProbeTarget::direct("web over tls", 443),
    ProbeTarget::starttls("pop3 over starttls", 110, StarttlsProtocol::Pop3),
    ProbeTarget::starttls("imap over starttls", 143, StarttlsProtocol::Imap),
    ProbeTarget::direct("smtps over tls", 465),
    ProbeTarget::starttls("submission over starttls", 587, StarttlsProtocol::Smtp),
    ProbeTarget::direct("imaps over tls", 993),
    ProbeTarget::direct("pop3s over tls", 995),
    ProbeTarget::starttls("sieve over starttls", 4190, StarttlsProtocol::Sieve),
];

/// Where probes connect to. The TLS server name is always the mail server
/// hostname, whatever the endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeEndpoint {
    Ip(IpAddr),
    Host(String),
}

impl ProbeEndpoint {
    /// IPv6 wins over IPv4; without either the hostname is resolved.
    pub fn preferred(ipv6: Option<Ipv6Addr>, ipv4: Option<Ipv4Addr>, hostname: &str) -> Self {
        match (ipv6, ipv4) {
            (Some(v6), _) => ProbeEndpoint::Ip(IpAddr::V6(v6)),
            (None, Some(v4)) => ProbeEndpoint::Ip(IpAddr::V4(v4)),
            (None, None) => ProbeEndpoint::Host(hostname.trim_end_matches('.').to_string()),
        }
    }

    /// `host:port`, bracketing IPv6 literals.
    pub fn authority(&self, port: u16) -> String {
        match self {
            ProbeEndpoint::Ip(ip) => SocketAddr::new(*ip, port).to_string(),
            ProbeEndpoint::Host(host) => format!("{host}:{port}"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TlsaResult {
    pub target: ProbeTarget,
    pub sha256: String,
    pub record: DnsRecord,
}

#[derive(Debug, thiserror::Error)]
#[error("{} (port {}): {error}", target.label, target.port)]
pub struct TlsaFailure {
    pub target: ProbeTarget,
    #[source]
    pub error: ProbeError,
}

/// Source of the DER-encoded SubjectPublicKeyInfo a server presents.
#[async_trait]
pub trait CertificateInspector: Send + Sync {
    async fn fetch_spki(
        &self,
        server_name: &str,
        endpoint: &ProbeEndpoint,
        target: &ProbeTarget,
    ) -> Result<Vec<u8>, ProbeError>;
}

/// Lowercase hex SHA-256 of a DER public key.
pub fn spki_sha256(spki_der: &[u8]) -> String {
    hex::encode(Sha256::digest(spki_der))
}

/// `_<port>._tcp.<hostname>. TLSA 3 1 1 <sha256>`
pub fn tlsa_record(hostname: &str, port: u16, sha256: &str) -> DnsRecord {
    DnsRecord::single(
        format!("_{port}._tcp.{}", fqdn(hostname)),
        RecordType::Tlsa,
        format!("3 1 1 {sha256}"),
    )
}

#[derive(Clone)]
pub struct TlsaDeriver {
    inspector: Arc<dyn CertificateInspector>,
    timeout: Duration,
}

impl TlsaDeriver {
    pub fn new(inspector: Arc<dyn CertificateInspector>, timeout: Duration) -> Self {
        Self { inspector, timeout }
    }

    /// Probe all [`PROBE_TARGETS`].
    pub async fn derive(
        &self,
        hostname: &str,
        endpoint: &ProbeEndpoint,
    ) -> Vec<Result<TlsaResult, TlsaFailure>> {
        self.derive_targets(hostname, endpoint, &PROBE_TARGETS).await
    }

    /// Probe `targets` concurrently. A failing target never affects the
    /// others; results come back in target order.
    pub async fn derive_targets(
        &self,
        hostname: &str,
        endpoint: &ProbeEndpoint,
        targets: &[ProbeTarget],
    ) -> Vec<Result<TlsaResult, TlsaFailure>> {
        join_all(
            targets
                .iter()
                .map(|target| self.probe(hostname, endpoint, *target)),
        )
        .await
    }

    pub async fn probe(
        &self,
        hostname: &str,
        endpoint: &ProbeEndpoint,
        target: ProbeTarget,
    ) -> Result<TlsaResult, TlsaFailure> {
        let server_name = hostname.trim_end_matches('.');
        debug!(
            target = target.label,
            addr = %endpoint.authority(target.port),
            "probing TLS endpoint"
        );

        let fetched = timeout(
            self.timeout,
            self.inspector.fetch_spki(server_name, endpoint, &target),
        )
        .await
        .unwrap_or(Err(ProbeError::Timeout(self.timeout)));

        match fetched {
            Ok(spki) => {
                let sha256 = spki_sha256(&spki);
                debug!(target = target.label, %sha256, "derived TLSA digest");
                Ok(TlsaResult {
                    target,
                    record: tlsa_record(hostname, target.port, &sha256),
                    sha256,
                })
            }
            Err(error) => {
                warn!(target = target.label, port = target.port, "TLSA probe failed: {error}");
                Err(TlsaFailure { target, error })
            }
        }
    }
}
