//! Seams between the orchestrator and the two remote management APIs.
use async_trait::async_trait;
use serde::Serialize;

use crate::error::ApiError;
use crate::records::{DnsRecord, RecordKey};

/// Zone creation parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneSetup {
    pub zone: String,
    pub nameservers: Vec<String>,
    pub hostmaster_email: String,
}

/// DNSSEC key material the operator has to hand to the registrar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DnssecKey {
    pub zone: String,
    pub keytype: String,
    pub dnskey: Option<String>,
    pub ds: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DkimKey {
    pub selector: String,
    /// TXT value, e.g. `v=DKIM1;k=rsa;t=s;s=email;p=MIIB...`
    pub txt: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMailbox {
    pub domain: String,
    pub local_part: String,
    pub name: String,
    pub password: String,
    pub quota_mib: u32,
}

/// DNS zone management API.
#[async_trait]
pub trait DnsZoneApi: Send + Sync {
    /// Create the zone if it does not exist, set its SOA and return its
    /// DNSSEC keys.
    async fn create_and_setup_zone(&self, setup: &ZoneSetup) -> Result<Vec<DnssecKey>, ApiError>;

    /// Replace the record sets matching each record's name and type, leaving
    /// every other record in `zone` untouched.
    async fn upsert_record_sets(&self, zone: &str, records: &[DnsRecord]) -> Result<(), ApiError>;

    async fn delete_record_sets(&self, zone: &str, keys: &[RecordKey]) -> Result<(), ApiError>;

    /// Deleting a zone that does not exist succeeds.
    async fn delete_zone(&self, zone: &str) -> Result<(), ApiError>;
}

/// Mail server management API. Creation calls are no-ops when the object
/// already exists.
#[async_trait]
pub trait MailServerApi: Send + Sync {
    async fn create_domain(&self, domain: &str) -> Result<(), ApiError>;

    async fn delete_domain(&self, domain: &str) -> Result<(), ApiError>;

    async fn create_and_fetch_dkim(&self, domain: &str) -> Result<DkimKey, ApiError>;

    async fn delete_dkim(&self, domain: &str) -> Result<(), ApiError>;

    async fn create_mailbox(&self, mailbox: &NewMailbox) -> Result<(), ApiError>;

    async fn delete_mailbox(&self, address: &str) -> Result<(), ApiError>;

    async fn create_alias(&self, address: &str, goto: &str) -> Result<(), ApiError>;
}
