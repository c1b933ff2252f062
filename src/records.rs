//! DNS record shapes and the fixed record set every mail domain needs.
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::validation::fqdn;

/// Longest character-string a single TXT string may hold.
const TXT_STRING_MAX: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecordType {
    A,
    Aaaa,
    Mx,
    Cname,
    Srv,
    Txt,
    Caa,
    Tlsa,
    Openpgpkey,
    Ptr,
    Soa,
    Ns,
}

impl RecordType {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordType::A => "A",
            RecordType::Aaaa => "AAAA",
            RecordType::Mx => "MX",
            RecordType::Cname => "CNAME",
            RecordType::Srv => "SRV",
            RecordType::Txt => "TXT",
            RecordType::Caa => "CAA",
            RecordType::Tlsa => "TLSA",
            RecordType::Openpgpkey => "OPENPGPKEY",
            RecordType::Ptr => "PTR",
            RecordType::Soa => "SOA",
            RecordType::Ns => "NS",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One record set: every content string shares the name and type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsRecord {
    pub name: String, // "_dmarc.example.com."
    #[serde(rename = "type")]
    pub record_type: RecordType,
    pub content: Vec<String>,
}

impl DnsRecord {
    pub fn new(name: impl Into<String>, record_type: RecordType, content: Vec<String>) -> Self {
        Self {
            name: name.into(),
            record_type,
            content,
        }
    }

    pub fn single(name: impl Into<String>, record_type: RecordType, content: impl Into<String>) -> Self {
        Self::new(name, record_type, vec![content.into()])
    }

    pub fn key(&self) -> RecordKey {
        RecordKey {
            name: self.name.clone(),
            record_type: self.record_type,
        }
    }
}

impl fmt::Display for DnsRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, content) in self.content.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{} {} {}", self.name, self.record_type, content)?;
        }
        Ok(())
    }
}

/// Identifies a record set for deletion.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    pub name: String,
    #[serde(rename = "type")]
    pub record_type: RecordType,
}

/// Quote a TXT value for the zone API.
pub fn txt(value: &str) -> String {
    format!("\"{value}\"")
}

/// DMARC policy for the mail domain, optionally asking for aggregate and
/// forensic reports.
pub fn dmarc_policy(report_mailbox: Option<&str>) -> String {
    let reports = report_mailbox
        .map(|m| format!("rua=mailto:{m};ruf=mailto:{m};"))
        .unwrap_or_default();
    format!("v=DMARC1;p=reject;sp=reject;{reports}adkim=s;aspf=s;")
}

/// Records a mail domain needs to point at the mail server: MX, client
/// autoconfiguration, SPF, DMARC and service discovery for every mail and
/// groupware protocol.
///
/// Inputs are not validated here; the order of the result is stable.
pub fn mail_domain_records(
    mail_domain: &str,
    mail_server_hostname: &str,
    report_mailbox: Option<&str>,
) -> Vec<DnsRecord> {
    let domain = fqdn(mail_domain);
    let host = fqdn(mail_server_hostname);
    let srv = |service: &str, port: u16| {
        DnsRecord::single(
            format!("_{service}._tcp.{domain}"),
            RecordType::Srv,
            format!("0 1 {port} {host}"),
        )
    };
    let dav_path = |service: &str| {
        DnsRecord::single(
            format!("_{service}._tcp.{domain}"),
            RecordType::Txt,
            txt("path=/SOGo/dav/"),
        )
    };

    vec![
        DnsRecord::single(&domain, RecordType::Mx, format!("10 {host}")),
        DnsRecord::single(format!("autodiscover.{domain}"), RecordType::Cname, &host),
        srv("autodiscover", 443),
        DnsRecord::single(format!("autoconfig.{domain}"), RecordType::Cname, &host),
        DnsRecord::single(&domain, RecordType::Txt, txt("v=spf1 MX -all")),
        DnsRecord::single(
            format!("_dmarc.{domain}"),
            RecordType::Txt,
            txt(&dmarc_policy(report_mailbox)),
        ),
        srv("imap", 143),
        srv("imaps", 993),
        srv("pop3", 110),
        srv("pop3s", 995),
        srv("submission", 587),
        srv("smtps", 465),
        srv("sieve", 4190),
        srv("carddavs", 443),
        srv("caldavs", 443),
        dav_path("carddavs"),
        dav_path("caldavs"),
    ]
}

/// DKIM public key record. Keys longer than one TXT string are split into
/// several quoted strings, which resolvers concatenate.
pub fn dkim_record(mail_domain: &str, selector: &str, dkim_txt: &str) -> DnsRecord {
    let strings: Vec<String> = dkim_txt
        .as_bytes()
        .chunks(TXT_STRING_MAX)
        .map(|chunk| txt(&String::from_utf8_lossy(chunk)))
        .collect();
    DnsRecord::single(
        format!("{selector}._domainkey.{}", fqdn(mail_domain)),
        RecordType::Txt,
        strings.join(" "),
    )
}

/// Authorises `report_domain` to receive DMARC reports for `mail_domain`
/// (RFC 7489, section 7.1).
pub fn dmarc_authorization_record(mail_domain: &str, report_domain: &str) -> DnsRecord {
    DnsRecord::single(
        format!(
            "{}._report._dmarc.{}",
            mail_domain.trim_end_matches('.'),
            fqdn(report_domain)
        ),
        RecordType::Txt,
        txt("v=DMARC1"),
    )
}
