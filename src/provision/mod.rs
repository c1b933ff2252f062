//! Provisioning operations that drive the mail server API, the DNS API and
//! the TLSA deriver together.
pub mod report;
pub mod request;
pub mod traits;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::auth::generate_password;
use crate::config::ProvisionerConfig;
use crate::error::{Error, Result};
use crate::openpgp::openpgp_record_for;
use crate::records::{RecordKey, RecordType, dmarc_authorization_record};
use crate::tlsa::{ProbeEndpoint, TlsaDeriver};
use crate::validation::{fqdn, validate_fqdn_ascii};

pub use report::{ProvisionReport, StepOutcome, StepStatus};
pub use request::{DefaultMailbox, Plan, ProvisionRequest, ZoneBatch};
pub use traits::{DkimKey, DnsZoneApi, DnssecKey, MailServerApi, NewMailbox, ZoneSetup};

/// Run `operation`, giving up after `limit` if one is set.
pub async fn within<T>(limit: Option<Duration>, operation: impl Future<Output = Result<T>>) -> Result<T> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, operation)
            .await
            .unwrap_or(Err(Error::Timeout(limit))),
        None => operation.await,
    }
}

pub struct Provisioner {
    mail: Arc<dyn MailServerApi>,
    dns: Arc<dyn DnsZoneApi>,
    tlsa: TlsaDeriver,
    default_quota_mib: u32,
}

impl Provisioner {
    pub fn new(
        mail: Arc<dyn MailServerApi>,
        dns: Arc<dyn DnsZoneApi>,
        tlsa: TlsaDeriver,
        default_quota_mib: u32,
    ) -> Self {
        Self {
            mail,
            dns,
            tlsa,
            default_quota_mib,
        }
    }

    /// Provisioner talking to the Mailcow and PowerDNS instances in `config`.
    pub fn from_config(config: &ProvisionerConfig) -> Result<Self> {
        Ok(Self::new(
            Arc::new(config.mailcow_client()),
            Arc::new(config.pdns_client()),
            config.tlsa_deriver()?,
            config.default_quota_mib,
        ))
    }

    /// Set up the mail domain on the mail server and publish its DNS zone.
    ///
    /// Failing to create the domain or its DKIM key on the mail server is an
    /// error since no DKIM record can be published without it; a zone set up
    /// concurrently stays in place and is removed by
    /// [`Self::cleanup_add_mail_domain`]. Every other failure is recorded in
    /// the report and the remaining steps still run.
    pub async fn add_mail_domain(&self, req: &ProvisionRequest) -> Result<ProvisionReport> {
        req.validate_mail_domain()?;
        let domain = req.domain();
        let mut report = ProvisionReport::new("add_mail_domain");
        info!(%domain, hostname = req.hostname(), "adding mail domain");

        let setup = req.zone_setup(domain);
        let (zone, created, dkim) = tokio::join!(
            self.dns.create_and_setup_zone(&setup),
            self.mail.create_domain(domain),
            self.mail.create_and_fetch_dkim(domain),
        );
        match zone {
            Ok(keys) => {
                report.applied(format!("set up zone {domain}"));
                report.dnssec_keys.extend(keys);
            }
            Err(e) => {
                report.record(format!("set up zone {domain}"), Err(e));
            }
        }
        let dkim = match (created, dkim) {
            (Ok(()), Ok(dkim)) => dkim,
            (Err(e), _) | (_, Err(e)) => {
                warn!(
                    %domain,
                    zone_ready = report.is_complete(),
                    "mail domain setup failed, zone {domain} is left in place: {e}"
                );
                return Err(e.into());
            }
        };
        report.applied(format!("create mail domain {domain}"));
        report.applied(format!("create DKIM key {}", dkim.selector));

        let mut batches = req.mail_domain_batches(Some(&dkim))?.into_iter();
        let Some(domain_batch) = batches.next() else {
            return Ok(report);
        };

        // DMARC report authorizations live in foreign zones
        for batch in batches {
            let result = self.dns.upsert_record_sets(&batch.zone, &batch.records).await;
            report.record(format!("authorize DMARC reports in zone {}", batch.zone), result);
        }

        let mailbox = &req.default_mailbox;
        let address = req.mailbox_address();
        let generated = mailbox.password.is_none().then(generate_password);
        let new_mailbox = NewMailbox {
            domain: domain.to_string(),
            local_part: mailbox.local_part.clone(),
            name: mailbox.name.clone(),
            password: mailbox
                .password
                .clone()
                .or_else(|| generated.clone())
                .unwrap_or_default(),
            quota_mib: mailbox.quota_mib.unwrap_or(self.default_quota_mib),
        };

        let (pushed, mailbox_created) = tokio::join!(
            self.dns
                .upsert_record_sets(&domain_batch.zone, &domain_batch.records),
            self.mail.create_mailbox(&new_mailbox),
        );
        report.record(
            format!(
                "publish {} records in zone {}",
                domain_batch.records.len(),
                domain_batch.zone
            ),
            pushed,
        );

        let alias = format!("@{domain}");
        if report.record(format!("create mailbox {address}"), mailbox_created) {
            report.generated_password = generated;
            let result = self.mail.create_alias(&alias, &address).await;
            report.record(format!("create alias {alias} -> {address}"), result);
        } else {
            report.skip(format!("create alias {alias}"), "mailbox was not created");
        }

        Ok(report)
    }

    /// Publish the mail server's TLSA, address and CAA records.
    pub async fn add_mail_server_dns_records(
        &self,
        req: &ProvisionRequest,
    ) -> Result<ProvisionReport> {
        req.validate_mail_server()?;
        let host = req.hostname();
        let mut report = ProvisionReport::new("add_mail_server_dns_records");
        info!(hostname = host, "adding mail server records");

        let setup = req.zone_setup(host);
        let endpoint =
            ProbeEndpoint::preferred(req.mail_server_ip, req.mail_server_legacy_ip, host);
        let (zone, probes) = tokio::join!(
            self.dns.create_and_setup_zone(&setup),
            self.tlsa.derive(host, &endpoint),
        );
        match zone {
            Ok(keys) => {
                report.applied(format!("set up zone {host}"));
                report.dnssec_keys.extend(keys);
            }
            Err(e) => {
                report.record(format!("set up zone {host}"), Err(e));
            }
        }

        let mut tlsa = Vec::new();
        for probe in probes {
            match probe {
                Ok(result) => {
                    tlsa.push(result.record.clone());
                    report.tlsa.push(result);
                }
                Err(failure) => {
                    let step = format!("derive TLSA for port {}", failure.target.port);
                    report.record(step, Err(failure));
                }
            }
        }

        for batch in req.mail_server_batches(tlsa)? {
            if batch.records.is_empty() {
                report.skip(format!("publish records in zone {}", batch.zone), "nothing to publish");
                continue;
            }
            let result = self.dns.upsert_record_sets(&batch.zone, &batch.records).await;
            report.record(
                format!("publish {} records in zone {}", batch.records.len(), batch.zone),
                result,
            );
        }

        Ok(report)
    }

    /// Publish an OPENPGPKEY record for `local_part@domain`.
    pub async fn set_openpgp_record(
        &self,
        local_part: &str,
        domain: &str,
        public_key: &str,
    ) -> Result<ProvisionReport> {
        validate_fqdn_ascii(domain)?;
        let record = openpgp_record_for(local_part, domain, public_key)?;
        let zone = domain.trim_end_matches('.');
        let mut report = ProvisionReport::new("set_openpgp_record");
        info!(%zone, name = %record.name, "publishing OpenPGP key");

        let result = self.dns.upsert_record_sets(zone, std::slice::from_ref(&record)).await;
        report.record(format!("publish OPENPGPKEY for {local_part}@{zone}"), result);
        Ok(report)
    }

    /// Undo [`Self::add_mail_server_dns_records`].
    pub async fn cleanup_add_mail_server(&self, req: &ProvisionRequest) -> Result<ProvisionReport> {
        req.validate_mail_server()?;
        let host = req.hostname();
        let mut report = ProvisionReport::new("cleanup_add_mail_server");
        info!(hostname = host, "removing mail server records");

        let result = self.dns.delete_zone(host).await;
        report.record(format!("delete zone {host}"), result);

        let caa_zone = req.caa_zone()?.filter(|zone| !zone.eq_ignore_ascii_case(host));
        if let Some(zone) = caa_zone {
            let key = RecordKey {
                name: fqdn(&zone),
                record_type: RecordType::Caa,
            };
            let result = self.dns.delete_record_sets(&zone, &[key]).await;
            report.record(format!("delete CAA in zone {zone}"), result);
        }

        Ok(report)
    }

    /// Undo [`Self::add_mail_domain`]. Every deletion is attempted even when
    /// an earlier one fails.
    pub async fn cleanup_add_mail_domain(&self, req: &ProvisionRequest) -> Result<ProvisionReport> {
        req.validate_mail_domain()?;
        let domain = req.domain();
        let address = req.mailbox_address();
        let mut report = ProvisionReport::new("cleanup_add_mail_domain");
        info!(%domain, "removing mail domain");

        let result = self.mail.delete_mailbox(&address).await;
        if !report.record(format!("delete mailbox {address}"), result) {
            warn!(%domain, "continuing cleanup despite mailbox deletion failure");
        }

        let (deleted_domain, deleted_dkim, deleted_zone) = tokio::join!(
            self.mail.delete_domain(domain),
            self.mail.delete_dkim(domain),
            self.dns.delete_zone(domain),
        );
        report.record(format!("delete mail domain {domain}"), deleted_domain);
        report.record(format!("delete DKIM key of {domain}"), deleted_dkim);
        report.record(format!("delete zone {domain}"), deleted_zone);

        if let Some(report_domain) = req.dmarc_report_domain()? {
            let key = dmarc_authorization_record(domain, &report_domain).key();
            let result = self.dns.delete_record_sets(&report_domain, &[key]).await;
            report.record(
                format!("delete DMARC report authorization in zone {report_domain}"),
                result,
            );
        }

        Ok(report)
    }
}
