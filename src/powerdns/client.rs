use crate::error::ApiError;
use crate::powerdns::types::*;
use crate::provision::traits::{DnsZoneApi, DnssecKey, ZoneSetup};
use crate::records::{DnsRecord, RecordKey, RecordType};
use crate::validation::{fqdn, soa_rname};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use tracing::{debug, info};

const SERVICE: &str = "PowerDNS";

pub const DEFAULT_TTL: u32 = 3600;

/// Refresh, retry, expire and negative TTL of the SOA written at zone setup.
const SOA_TIMERS: &str = "10800 3600 604800 3600";

#[derive(Clone)]
pub struct PowerDnsClient {
    http: Client,
    base_url: String, // e.g. "http://127.0.0.1:8081/api/v1"
    api_key: String,
    server_id: String, // usually "localhost"
    ttl: u32,
}

impl PowerDnsClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        server_id: impl Into<String>,
    ) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            server_id: server_id.into(),
            ttl: DEFAULT_TTL,
        }
    }

    /// TTL for every record set this client writes.
    pub fn with_ttl(mut self, ttl: u32) -> Self {
        self.ttl = ttl;
        self
    }

    fn auth_header(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("X-API-Key", &self.api_key)
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/servers/{}/{}",
            self.base_url,
            self.server_id,
            path.trim_start_matches('/')
        )
    }

    async fn send(
        &self,
        req: reqwest::RequestBuilder,
        operation: &'static str,
    ) -> Result<reqwest::Response, ApiError> {
        self.auth_header(req)
            .send()
            .await
            .map_err(|source| ApiError::Http {
                service: SERVICE,
                operation,
                source,
            })
    }

    async fn check(
        res: reqwest::Response,
        operation: &'static str,
    ) -> Result<reqwest::Response, ApiError> {
        let status = res.status();
        if status.is_success() {
            return Ok(res);
        }
        let body = res.text().await.unwrap_or_default();
        Err(ApiError::Status {
            service: SERVICE,
            operation,
            status,
            body,
        })
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        res: reqwest::Response,
        operation: &'static str,
    ) -> Result<T, ApiError> {
        res.json::<T>().await.map_err(|e| ApiError::Decode {
            service: SERVICE,
            operation,
            detail: e.to_string(),
        })
    }

    /// `None` when the server does not know the zone.
    pub async fn get_zone(&self, name: &str) -> Result<Option<PdnsZone>, ApiError> {
        const OP: &str = "get_zone";
        let url = self.url(&format!("zones/{}", name));
        debug!(%url, "PowerDNS GET zone");
        let res = self.send(self.http.get(url), OP).await?;
        if res.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let res = Self::check(res, OP).await?;
        Ok(Some(Self::decode(res, OP).await?))
    }

    pub async fn create_zone(&self, z: &PdnsZoneCreate) -> Result<(), ApiError> {
        const OP: &str = "create_zone";
        let url = self.url("zones");
        debug!(%url, zone = %z.name, "PowerDNS POST zone");
        let res = self.send(self.http.post(url).json(z), OP).await?;
        Self::check(res, OP).await?;
        Ok(())
    }

    pub async fn patch_rrsets(&self, zone_name: &str, rrsets: &[PdnsRrset]) -> Result<(), ApiError> {
        const OP: &str = "patch_rrsets";

        #[derive(Serialize)]
        struct PatchBody<'a> {
            rrsets: &'a [PdnsRrset],
        }

        let url = self.url(&format!("zones/{}", zone_name));
        debug!(%url, count = rrsets.len(), "PowerDNS PATCH rrsets");
        let body = PatchBody { rrsets };
        let res = self.send(self.http.patch(url).json(&body), OP).await?;
        Self::check(res, OP).await?;
        Ok(())
    }

    /// `false` when the zone was already gone.
    pub async fn drop_zone(&self, name: &str) -> Result<bool, ApiError> {
        const OP: &str = "delete_zone";
        let url = self.url(&format!("zones/{}", name));
        debug!(%url, "PowerDNS DELETE zone");
        let res = self.send(self.http.delete(url), OP).await?;
        if res.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        Self::check(res, OP).await?;
        Ok(true)
    }

    pub async fn list_cryptokeys(&self, zone_name: &str) -> Result<Vec<PdnsCryptokey>, ApiError> {
        const OP: &str = "list_cryptokeys";
        let url = self.url(&format!("zones/{}/cryptokeys", zone_name));
        let res = self.send(self.http.get(url), OP).await?;
        let res = Self::check(res, OP).await?;
        Self::decode(res, OP).await
    }
}

/// SOA content: primary nameserver, responsible mailbox, serial, timers.
pub fn soa_content(primary_ns: &str, hostmaster_email: &str) -> String {
    format!(
        "{} {} 1 {SOA_TIMERS}",
        fqdn(primary_ns),
        soa_rname(hostmaster_email)
    )
}

#[async_trait]
impl DnsZoneApi for PowerDnsClient {
    async fn create_and_setup_zone(&self, setup: &ZoneSetup) -> Result<Vec<DnssecKey>, ApiError> {
        let zone = fqdn(&setup.zone);
        let nameservers: Vec<String> = setup.nameservers.iter().map(|ns| fqdn(ns)).collect();

        if self.get_zone(&zone).await?.is_none() {
            self.create_zone(&PdnsZoneCreate {
                name: zone.clone(),
                kind: "Native".into(),
                nameservers: nameservers.clone(),
                dnssec: true,
                soa_edit_api: "DEFAULT".into(),
            })
            .await?;
            info!(%zone, "created zone");
        } else {
            debug!(%zone, "zone already exists");
        }

        if let Some(primary) = nameservers.first() {
            let soa = DnsRecord::single(
                &zone,
                RecordType::Soa,
                soa_content(primary, &setup.hostmaster_email),
            );
            self.patch_rrsets(&zone, &[PdnsRrset::replace(&soa, self.ttl)])
                .await?;
        }

        let keys = self.list_cryptokeys(&zone).await?;
        Ok(keys
            .into_iter()
            .filter(|k| k.active)
            .map(|k| DnssecKey {
                zone: zone.clone(),
                keytype: k.keytype,
                dnskey: k.dnskey,
                ds: k.ds,
            })
            .collect())
    }

    async fn upsert_record_sets(&self, zone: &str, records: &[DnsRecord]) -> Result<(), ApiError> {
        if records.is_empty() {
            return Ok(());
        }
        let rrsets: Vec<PdnsRrset> = records
            .iter()
            .map(|r| PdnsRrset::replace(r, self.ttl))
            .collect();
        self.patch_rrsets(&fqdn(zone), &rrsets).await
    }

    async fn delete_record_sets(&self, zone: &str, keys: &[RecordKey]) -> Result<(), ApiError> {
        if keys.is_empty() {
            return Ok(());
        }
        let rrsets: Vec<PdnsRrset> = keys
            .iter()
            .map(|k| PdnsRrset::delete(&k.name, k.record_type.as_str()))
            .collect();
        self.patch_rrsets(&fqdn(zone), &rrsets).await
    }

    async fn delete_zone(&self, zone: &str) -> Result<(), ApiError> {
        let zone = fqdn(zone);
        if self.drop_zone(&zone).await? {
            info!(%zone, "deleted zone");
        } else {
            debug!(%zone, "zone already absent");
        }
        Ok(())
    }
}
