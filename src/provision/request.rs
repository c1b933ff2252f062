use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use serde::{Deserialize, Serialize};

use crate::records::{
    DnsRecord, RecordType, dkim_record, dmarc_authorization_record, mail_domain_records,
};
use crate::validation::{ValidationError, fqdn, second_level_domain, split_email, validate_fqdn_ascii};

use super::traits::{DkimKey, ZoneSetup};

fn default_caa_issuers() -> Vec<String> {
    vec!["digicert.com".into(), "letsencrypt.org".into()]
}

/// Everything needed to provision one mail domain and its mail server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionRequest {
    pub mail_domain: String,
    pub mail_server_hostname: String,
    #[serde(default)]
    pub mail_server_ip: Option<Ipv6Addr>,
    #[serde(default)]
    pub mail_server_legacy_ip: Option<Ipv4Addr>,
    #[serde(default)]
    pub nameservers: Vec<String>,
    pub hostmaster_email: String,
    #[serde(default)]
    pub dmarc_mail: Option<String>,
    #[serde(default)]
    pub postmaster_email: Option<String>,
    pub default_mailbox: DefaultMailbox,
    #[serde(default)]
    pub add_lets_encrypt_caa: bool,
    #[serde(default = "default_caa_issuers")]
    pub caa_issuers: Vec<String>,
    #[serde(default)]
    pub caa_report_mail: Option<String>,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct DefaultMailbox {
    pub local_part: String,
    pub name: String,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    #[serde(default)]
    pub quota_mib: Option<u32>,
}

impl fmt::Debug for DefaultMailbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultMailbox")
            .field("local_part", &self.local_part)
            .field("name", &self.name)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("quota_mib", &self.quota_mib)
            .finish()
    }
}

/// Records destined for a single zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ZoneBatch {
    /// Zone name without the trailing dot.
    pub zone: String,
    pub records: Vec<DnsRecord>,
}

impl ZoneBatch {
    fn new(zone: &str, records: Vec<DnsRecord>) -> Self {
        Self {
            zone: zone.trim_end_matches('.').to_lowercase(),
            records,
        }
    }
}

/// Dry-run result: what the add operations would push.
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    /// DKIM and TLSA records are missing here; they need the remote side.
    pub mail_domain: Vec<ZoneBatch>,
    pub mail_server: Vec<ZoneBatch>,
}

impl ProvisionRequest {
    /// Mail domain without the trailing dot.
    pub fn domain(&self) -> &str {
        self.mail_domain.trim_end_matches('.')
    }

    /// Mail server hostname without the trailing dot.
    pub fn hostname(&self) -> &str {
        self.mail_server_hostname.trim_end_matches('.')
    }

    pub fn mailbox_address(&self) -> String {
        format!("{}@{}", self.default_mailbox.local_part, self.domain())
    }

    /// Mailbox receiving DMARC reports: `dmarc_mail`, else `postmaster_email`.
    pub fn report_mailbox(&self) -> Option<&str> {
        self.dmarc_mail
            .as_deref()
            .or(self.postmaster_email.as_deref())
            .filter(|m| !m.is_empty())
    }

    pub fn zone_setup(&self, zone: &str) -> ZoneSetup {
        ZoneSetup {
            zone: zone.trim_end_matches('.').to_lowercase(),
            nameservers: self.nameservers.clone(),
            hostmaster_email: self.hostmaster_email.clone(),
        }
    }

    /// Checks shared by every operation touching the mail domain.
    pub fn validate_mail_domain(&self) -> Result<(), ValidationError> {
        validate_fqdn_ascii(&self.mail_domain)?;
        validate_fqdn_ascii(&self.mail_server_hostname)?;
        self.validate_zone_setup()?;
        if let Some(mailbox) = self.report_mailbox() {
            split_email(mailbox)?;
        }
        // the DMARC authorization zone is derived mid-operation
        self.dmarc_report_domain()?;
        if self.default_mailbox.local_part.is_empty()
            || self.default_mailbox.local_part.contains(['@', ' '])
        {
            return Err(ValidationError::InvalidEmail(self.mailbox_address()));
        }
        Ok(())
    }

    pub fn validate_mail_server(&self) -> Result<(), ValidationError> {
        validate_fqdn_ascii(&self.mail_server_hostname)?;
        self.validate_zone_setup()?;
        if let Some(mail) = &self.caa_report_mail {
            split_email(mail)?;
        }
        if self.add_lets_encrypt_caa {
            second_level_domain(self.hostname())?;
        }
        Ok(())
    }

    fn validate_zone_setup(&self) -> Result<(), ValidationError> {
        if self.nameservers.is_empty() {
            return Err(ValidationError::MissingNameserver);
        }
        for ns in &self.nameservers {
            validate_fqdn_ascii(ns)?;
        }
        split_email(&self.hostmaster_email)?;
        Ok(())
    }

    /// Organisational domain of the report mailbox when it differs from the
    /// mail domain's, i.e. when reports need an external authorization record.
    pub fn dmarc_report_domain(&self) -> Result<Option<String>, ValidationError> {
        let Some(mailbox) = self.report_mailbox() else {
            return Ok(None);
        };
        let report_domain = second_level_domain(mailbox)?;
        if report_domain == second_level_domain(self.domain())? {
            Ok(None)
        } else {
            Ok(Some(report_domain))
        }
    }

    /// Zone receiving the CAA record set, when CAA was requested.
    pub fn caa_zone(&self) -> Result<Option<String>, ValidationError> {
        if !self.add_lets_encrypt_caa {
            return Ok(None);
        }
        second_level_domain(self.hostname()).map(Some)
    }

    pub fn caa_record(&self, zone: &str) -> DnsRecord {
        let mut content: Vec<String> = self
            .caa_issuers
            .iter()
            .map(|issuer| format!("0 issue \"{issuer}\""))
            .collect();
        if let Some(mail) = &self.caa_report_mail {
            content.push(format!("0 iodef \"mailto:{mail}\""));
        }
        DnsRecord::new(fqdn(zone), RecordType::Caa, content)
    }

    pub fn address_records(&self) -> Vec<DnsRecord> {
        let host = fqdn(self.hostname());
        let mut records = Vec::new();
        if let Some(ip) = self.mail_server_ip {
            records.push(DnsRecord::single(&host, RecordType::Aaaa, ip.to_string()));
        }
        if let Some(ip) = self.mail_server_legacy_ip {
            records.push(DnsRecord::single(&host, RecordType::A, ip.to_string()));
        }
        records
    }

    /// The mail domain's batch comes first; a cross-domain DMARC
    /// authorization batch follows when needed.
    pub fn mail_domain_batches(
        &self,
        dkim: Option<&DkimKey>,
    ) -> Result<Vec<ZoneBatch>, ValidationError> {
        let domain = self.domain();
        let mut records = mail_domain_records(domain, self.hostname(), self.report_mailbox());
        if let Some(dkim) = dkim {
            records.push(dkim_record(domain, &dkim.selector, &dkim.txt));
        }

        let mut batches = vec![ZoneBatch::new(domain, records)];
        if let Some(report_domain) = self.dmarc_report_domain()? {
            batches.push(ZoneBatch::new(
                &report_domain,
                vec![dmarc_authorization_record(domain, &report_domain)],
            ));
        }
        Ok(batches)
    }

    /// Hostname zone batch (TLSA + addresses), then the CAA batch unless the
    /// hostname is its own second-level zone.
    pub fn mail_server_batches(
        &self,
        tlsa: Vec<DnsRecord>,
    ) -> Result<Vec<ZoneBatch>, ValidationError> {
        let host = self.hostname();
        let mut records = tlsa;
        records.extend(self.address_records());

        let mut batches = vec![ZoneBatch::new(host, records)];
        if let Some(zone) = self.caa_zone()? {
            let caa = self.caa_record(&zone);
            if zone.eq_ignore_ascii_case(host) {
                batches[0].records.push(caa);
            } else {
                batches.push(ZoneBatch::new(&zone, vec![caa]));
            }
        }
        Ok(batches)
    }

    pub fn plan(&self) -> Result<Plan, ValidationError> {
        self.validate_mail_domain()?;
        self.validate_mail_server()?;
        Ok(Plan {
            mail_domain: self.mail_domain_batches(None)?,
            mail_server: self.mail_server_batches(Vec::new())?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ProvisionRequest {
        serde_json::from_value(serde_json::json!({
            "mail_domain": "example.com",
            "mail_server_hostname": "mail.example.com",
            "nameservers": ["ns1.example.net", "ns2.example.net"],
            "hostmaster_email": "hostmaster@example.net",
            "default_mailbox": { "local_part": "hugh", "name": "Hugh" }
        }))
        .unwrap()
    }

    #[test]
    fn defaults_from_json() {
        let req = request();
        assert_eq!(req.caa_issuers, vec!["digicert.com", "letsencrypt.org"]);
        assert!(!req.add_lets_encrypt_caa);
        assert_eq!(req.report_mailbox(), None);
        assert_eq!(req.mailbox_address(), "hugh@example.com");
    }

    #[test]
    fn report_mailbox_falls_back_to_postmaster() {
        let mut req = request();
        req.postmaster_email = Some("postmaster@example.com".into());
        assert_eq!(req.report_mailbox(), Some("postmaster@example.com"));
        req.dmarc_mail = Some("dmarc@example.com".into());
        assert_eq!(req.report_mailbox(), Some("dmarc@example.com"));
    }

    #[test]
    fn report_domain_only_when_organisations_differ() {
        let mut req = request();
        req.dmarc_mail = Some("dmarc@lists.example.com".into());
        assert_eq!(req.dmarc_report_domain().unwrap(), None);

        req.dmarc_mail = Some("reports@reports.net".into());
        assert_eq!(req.dmarc_report_domain().unwrap(), Some("reports.net".into()));

        let batches = req.mail_domain_batches(None).unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1].zone, "reports.net");
        assert_eq!(batches[1].records[0].name, "example.com._report._dmarc.reports.net.");
    }

    #[test]
    fn dkim_record_joins_domain_batch() {
        let dkim = DkimKey {
            selector: "dkim".into(),
            txt: "v=DKIM1;k=rsa;p=MIIB".into(),
        };
        let batches = request().mail_domain_batches(Some(&dkim)).unwrap();
        assert_eq!(batches.len(), 1);
        let last = batches[0].records.last().unwrap();
        assert_eq!(last.name, "dkim._domainkey.example.com.");
        assert_eq!(batches[0].records.len(), 18);
    }

    #[test]
    fn caa_record_content() {
        let mut req = request();
        req.caa_report_mail = Some("security@example.com".into());
        let caa = req.caa_record("example.com");
        assert_eq!(caa.name, "example.com.");
        assert_eq!(
            caa.content,
            vec![
                "0 issue \"digicert.com\"",
                "0 issue \"letsencrypt.org\"",
                "0 iodef \"mailto:security@example.com\"",
            ]
        );
    }

    #[test]
    fn mail_server_batches_split_by_zone() {
        let mut req = request();
        req.add_lets_encrypt_caa = true;
        req.mail_server_ip = Some("2001:db8::25".parse().unwrap());
        req.mail_server_legacy_ip = Some("192.0.2.25".parse().unwrap());

        let batches = req.mail_server_batches(Vec::new()).unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].zone, "mail.example.com");
        assert_eq!(batches[0].records.len(), 2);
        assert_eq!(batches[0].records[0].record_type, RecordType::Aaaa);
        assert_eq!(batches[0].records[0].name, "mail.example.com.");
        assert_eq!(batches[1].zone, "example.com");
        assert_eq!(batches[1].records[0].record_type, RecordType::Caa);
    }

    #[test]
    fn caa_stays_in_hostname_zone_for_apex_hosts() {
        let mut req = request();
        req.mail_server_hostname = "example.org".into();
        req.add_lets_encrypt_caa = true;
        let batches = req.mail_server_batches(Vec::new()).unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].records.len(), 1);
    }

    #[test]
    fn validation_rejects_bad_input() {
        let mut req = request();
        req.nameservers.clear();
        assert_eq!(req.validate_mail_domain(), Err(ValidationError::MissingNameserver));

        let mut req = request();
        req.mail_domain = "exa mple.com".into();
        assert!(req.validate_mail_domain().is_err());

        let mut req = request();
        req.hostmaster_email = "nobody".into();
        assert!(matches!(
            req.validate_mail_server(),
            Err(ValidationError::InvalidEmail(_))
        ));
    }

    #[test]
    fn single_label_domain_with_report_mailbox_is_rejected() {
        let mut req = request();
        req.mail_domain = "localhost".into();
        assert!(req.validate_mail_domain().is_ok());

        req.dmarc_mail = Some("dmarc@reports.net".into());
        assert_eq!(
            req.validate_mail_domain(),
            Err(ValidationError::NoSecondLevel("localhost".into()))
        );
    }

    #[test]
    fn password_is_redacted() {
        let mut req = request();
        req.default_mailbox.password = Some("hunter2".into());
        let debug = format!("{:?}", req.default_mailbox);
        assert!(!debug.contains("hunter2"));
    }
}
