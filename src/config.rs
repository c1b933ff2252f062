use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ProbeError;
use crate::mailcow::MailcowClient;
use crate::powerdns::client::{DEFAULT_TTL, PowerDnsClient};
use crate::tlsa::{
    CertificateInspector, DEFAULT_PROBE_TIMEOUT, NativeInspector, OpensslInspector, TlsaDeriver,
};

pub const DEFAULT_QUOTA_MIB: u32 = 3072;

/// How TLSA probes read the server's certificate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inspector {
    /// In-process rustls handshake.
    Native,
    /// External `openssl` binary at the given path.
    Openssl(PathBuf),
}

/// Everything the provisioner needs to reach its collaborators.
#[derive(Clone)]
pub struct ProvisionerConfig {
    pub pdns_url: String, // "http://127.0.0.1:8081/api/v1"
    pub pdns_api_key: String,
    pub pdns_server_id: String, // usually "localhost"
    pub mailcow_url: String,    // "https://mail.example.com"
    pub mailcow_api_key: String,
    pub ttl: u32,
    pub inspector: Inspector,
    pub probe_timeout: Duration,
    pub default_quota_mib: u32,
}

impl ProvisionerConfig {
    pub fn new(
        pdns_url: impl Into<String>,
        pdns_api_key: impl Into<String>,
        mailcow_url: impl Into<String>,
        mailcow_api_key: impl Into<String>,
    ) -> Self {
        Self {
            pdns_url: pdns_url.into(),
            pdns_api_key: pdns_api_key.into(),
            pdns_server_id: "localhost".into(),
            mailcow_url: mailcow_url.into(),
            mailcow_api_key: mailcow_api_key.into(),
            ttl: DEFAULT_TTL,
            inspector: Inspector::Native,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            default_quota_mib: DEFAULT_QUOTA_MIB,
        }
    }

    pub fn pdns_client(&self) -> PowerDnsClient {
        PowerDnsClient::new(&self.pdns_url, &self.pdns_api_key, &self.pdns_server_id)
            .with_ttl(self.ttl)
    }

    pub fn mailcow_client(&self) -> MailcowClient {
        MailcowClient::new(&self.mailcow_url, &self.mailcow_api_key)
    }

    pub fn tlsa_deriver(&self) -> Result<TlsaDeriver, ProbeError> {
        tlsa_deriver(&self.inspector, self.probe_timeout)
    }
}

/// Deriver backed by the chosen certificate source.
pub fn tlsa_deriver(inspector: &Inspector, timeout: Duration) -> Result<TlsaDeriver, ProbeError> {
    let inspector: Arc<dyn CertificateInspector> = match inspector {
        Inspector::Native => Arc::new(NativeInspector::new()?),
        Inspector::Openssl(path) => Arc::new(OpensslInspector::new(path)),
    };
    Ok(TlsaDeriver::new(inspector, timeout))
}
