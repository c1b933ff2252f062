#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use postkutsche::error::{ApiError, ProbeError};
use postkutsche::provision::{
    DkimKey, DnsZoneApi, DnssecKey, MailServerApi, NewMailbox, ProvisionRequest, Provisioner,
    ZoneSetup,
};
use postkutsche::records::{DnsRecord, RecordKey, RecordType};
use postkutsche::tlsa::{CertificateInspector, ProbeEndpoint, ProbeTarget, TlsaDeriver};

pub type Zone = BTreeMap<(String, RecordType), Vec<String>>;

fn rejected(service: &'static str, operation: &'static str, message: impl Into<String>) -> ApiError {
    ApiError::Rejected {
        service,
        operation,
        message: message.into(),
    }
}

/// PowerDNS stand-in keeping zones in memory.
#[derive(Default)]
pub struct MemoryDns {
    pub zones: Mutex<HashMap<String, Zone>>,
    /// Zones whose record updates are rejected.
    pub failing_zones: Mutex<HashSet<String>>,
    pub calls: Mutex<Vec<String>>,
}

impl MemoryDns {
    pub fn with_zone(self, zone: &str) -> Self {
        self.zones.lock().unwrap().insert(zone.to_string(), Zone::new());
        self
    }

    pub fn fail_updates_in(&self, zone: &str) {
        self.failing_zones.lock().unwrap().insert(zone.to_string());
    }

    pub fn zone(&self, zone: &str) -> Option<Zone> {
        self.zones.lock().unwrap().get(zone).cloned()
    }

    pub fn content(&self, zone: &str, name: &str, record_type: RecordType) -> Option<Vec<String>> {
        self.zone(zone)?.get(&(name.to_string(), record_type)).cloned()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn log(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl DnsZoneApi for MemoryDns {
    async fn create_and_setup_zone(&self, setup: &ZoneSetup) -> Result<Vec<DnssecKey>, ApiError> {
        self.log(format!("setup {}", setup.zone));
        let mut zones = self.zones.lock().unwrap();
        let zone = zones.entry(setup.zone.clone()).or_default();
        zone.insert(
            (format!("{}.", setup.zone), RecordType::Ns),
            setup.nameservers.iter().map(|ns| format!("{}.", ns.trim_end_matches('.'))).collect(),
        );
        Ok(vec![DnssecKey {
            zone: setup.zone.clone(),
            keytype: "csk".into(),
            dnskey: Some("257 3 13 AAAA".into()),
            ds: vec![format!("{}. DS 12345 13 2 ABCDEF", setup.zone)],
        }])
    }

    async fn upsert_record_sets(&self, zone: &str, records: &[DnsRecord]) -> Result<(), ApiError> {
        self.log(format!("upsert {zone} {}", records.len()));
        if self.failing_zones.lock().unwrap().contains(zone) {
            return Err(rejected("powerdns", "patch rrsets", format!("zone {zone} is read-only")));
        }
        let mut zones = self.zones.lock().unwrap();
        let stored = zones
            .get_mut(zone)
            .ok_or_else(|| rejected("powerdns", "patch rrsets", format!("no zone {zone}")))?;
        for record in records {
            stored.insert((record.name.clone(), record.record_type), record.content.clone());
        }
        Ok(())
    }

    async fn delete_record_sets(&self, zone: &str, keys: &[RecordKey]) -> Result<(), ApiError> {
        self.log(format!("delete-records {zone} {}", keys.len()));
        let mut zones = self.zones.lock().unwrap();
        let stored = zones
            .get_mut(zone)
            .ok_or_else(|| rejected("powerdns", "patch rrsets", format!("no zone {zone}")))?;
        for key in keys {
            stored.remove(&(key.name.clone(), key.record_type));
        }
        Ok(())
    }

    async fn delete_zone(&self, zone: &str) -> Result<(), ApiError> {
        self.log(format!("delete-zone {zone}"));
        self.zones.lock().unwrap().remove(zone);
        Ok(())
    }
}

/// Mailcow stand-in.
#[derive(Default)]
pub struct MemoryMail {
    pub domains: Mutex<HashSet<String>>,
    pub dkim: Mutex<HashMap<String, DkimKey>>,
    pub mailboxes: Mutex<HashMap<String, NewMailbox>>,
    pub aliases: Mutex<HashMap<String, String>>,
    pub fail_dkim: AtomicBool,
    pub fail_mailbox: AtomicBool,
    pub fail_domain_delete: AtomicBool,
}

impl MemoryMail {
    pub fn mailbox(&self, address: &str) -> Option<NewMailbox> {
        self.mailboxes.lock().unwrap().get(address).cloned()
    }

    pub fn alias(&self, address: &str) -> Option<String> {
        self.aliases.lock().unwrap().get(address).cloned()
    }
}

#[async_trait]
impl MailServerApi for MemoryMail {
    async fn create_domain(&self, domain: &str) -> Result<(), ApiError> {
        self.domains.lock().unwrap().insert(domain.to_string());
        Ok(())
    }

    async fn delete_domain(&self, domain: &str) -> Result<(), ApiError> {
        if self.fail_domain_delete.load(Ordering::SeqCst) {
            return Err(rejected("mailcow", "delete domain", "domain_not_empty"));
        }
        self.domains.lock().unwrap().remove(domain);
        Ok(())
    }

    async fn create_and_fetch_dkim(&self, domain: &str) -> Result<DkimKey, ApiError> {
        if self.fail_dkim.load(Ordering::SeqCst) {
            return Err(rejected("mailcow", "add dkim", "dkim_domain_or_sel_invalid"));
        }
        let key = DkimKey {
            selector: "dkim".into(),
            txt: format!("v=DKIM1;k=rsa;t=s;s=email;p={}", "A".repeat(392)),
        };
        self.dkim.lock().unwrap().insert(domain.to_string(), key.clone());
        Ok(key)
    }

    async fn delete_dkim(&self, domain: &str) -> Result<(), ApiError> {
        self.dkim.lock().unwrap().remove(domain);
        Ok(())
    }

    async fn create_mailbox(&self, mailbox: &NewMailbox) -> Result<(), ApiError> {
        if self.fail_mailbox.load(Ordering::SeqCst) {
            return Err(rejected("mailcow", "add mailbox", "mailbox_quota_exceeded"));
        }
        let address = format!("{}@{}", mailbox.local_part, mailbox.domain);
        self.mailboxes.lock().unwrap().insert(address, mailbox.clone());
        Ok(())
    }

    async fn delete_mailbox(&self, address: &str) -> Result<(), ApiError> {
        self.mailboxes.lock().unwrap().remove(address);
        Ok(())
    }

    async fn create_alias(&self, address: &str, goto: &str) -> Result<(), ApiError> {
        self.aliases
            .lock()
            .unwrap()
            .insert(address.to_string(), goto.to_string());
        Ok(())
    }
}

/// Inspector answering from a port table instead of the network.
#[derive(Default)]
pub struct FakeInspector {
    pub refused_ports: HashSet<u16>,
}

#[async_trait]
impl CertificateInspector for FakeInspector {
    async fn fetch_spki(
        &self,
        _server_name: &str,
        endpoint: &ProbeEndpoint,
        target: &ProbeTarget,
    ) -> Result<Vec<u8>, ProbeError> {
        if self.refused_ports.contains(&target.port) {
            return Err(ProbeError::Connect {
                addr: endpoint.authority(target.port),
                source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
            });
        }
        Ok(b"spki".to_vec())
    }
}

pub struct Harness {
    pub dns: Arc<MemoryDns>,
    pub mail: Arc<MemoryMail>,
    pub provisioner: Provisioner,
}

impl Harness {
    pub fn new(dns: MemoryDns, mail: MemoryMail, inspector: FakeInspector) -> Self {
        let dns = Arc::new(dns);
        let mail = Arc::new(mail);
        let tlsa = TlsaDeriver::new(Arc::new(inspector), Duration::from_secs(1));
        let provisioner = Provisioner::new(mail.clone(), dns.clone(), tlsa, 3072);
        Self {
            dns,
            mail,
            provisioner,
        }
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new(MemoryDns::default(), MemoryMail::default(), FakeInspector::default())
    }
}

pub fn request() -> ProvisionRequest {
    serde_json::from_value(serde_json::json!({
        "mail_domain": "example.com",
        "mail_server_hostname": "mail.example.com",
        "mail_server_ip": "2001:db8::25",
        "mail_server_legacy_ip": "192.0.2.25",
        "nameservers": ["ns1.example.net", "ns2.example.net"],
        "hostmaster_email": "hostmaster@example.net",
        "default_mailbox": { "local_part": "hugh", "name": "Hugh Mann" }
    }))
    .unwrap()
}
