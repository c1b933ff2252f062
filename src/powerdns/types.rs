use serde::{Deserialize, Serialize};

use crate::records::DnsRecord;

#[derive(Debug, Serialize, Deserialize)]
pub struct PdnsZone {
    pub id: String,   // "/api/.../zones/example.com."
    pub name: String, // "example.com."
    #[serde(rename = "type", default)]
    pub zone_type: Option<String>, // "Zone"
    pub kind: String, // "Native", etc.
    #[serde(default)]
    pub dnssec: bool,
    pub rrsets: Option<Vec<PdnsRrset>>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PdnsRrset {
    pub name: String, // "www.example.com."
    #[serde(rename = "type")]
    pub rrtype: String, // "A", "NS", ...
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u32>,
    pub changetype: Option<String>, // "REPLACE" / "DELETE" when patching
    #[serde(default)]
    pub records: Vec<PdnsRecord>,
    #[serde(default)]
    pub comments: Vec<PdnsComment>,
}

impl PdnsRrset {
    pub fn replace(record: &DnsRecord, ttl: u32) -> Self {
        Self {
            name: record.name.clone(),
            rrtype: record.record_type.to_string(),
            ttl: Some(ttl),
            changetype: Some("REPLACE".into()),
            records: record
                .content
                .iter()
                .map(|content| PdnsRecord {
                    content: content.clone(),
                    disabled: false,
                })
                .collect(),
            comments: Vec::new(),
        }
    }

    pub fn delete(name: &str, rrtype: &str) -> Self {
        Self {
            name: name.to_string(),
            rrtype: rrtype.to_string(),
            ttl: None,
            changetype: Some("DELETE".into()),
            records: Vec::new(),
            comments: Vec::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PdnsRecord {
    pub content: String, // "192.0.2.1" or "ns1.example.net."
    #[serde(default)]
    pub disabled: bool,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PdnsComment {
    pub content: String,
    pub account: String,
    pub modified_at: i64,
}

// Used when creating a zone
#[derive(Debug, Serialize, Deserialize)]
pub struct PdnsZoneCreate {
    pub name: String,             // "mail.example.com."
    pub kind: String,             // "Native"
    pub nameservers: Vec<String>, // ["ns1.example.net.", "ns2.example.net."]
    pub dnssec: bool,
    pub soa_edit_api: String, // "DEFAULT"
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PdnsCryptokey {
    pub id: u64,
    pub keytype: String, // "csk", "ksk", "zsk"
    pub active: bool,
    #[serde(default)]
    pub published: Option<bool>,
    #[serde(default)]
    pub dnskey: Option<String>,
    #[serde(default)]
    pub ds: Vec<String>,
    #[serde(default)]
    pub algorithm: Option<String>,
}
