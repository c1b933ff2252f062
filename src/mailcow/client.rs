use crate::error::ApiError;
use crate::mailcow::types::*;
use crate::provision::traits::{DkimKey, MailServerApi, NewMailbox};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, info};

const SERVICE: &str = "Mailcow";

pub const DKIM_SELECTOR: &str = "dkim";
const DKIM_KEY_SIZE: u32 = 2048;

#[derive(Clone)]
pub struct MailcowClient {
    http: Client,
    base_url: String, // e.g. "https://mail.example.com"
    api_key: String,
}

impl MailcowClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    fn auth_header(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("X-API-Key", &self.api_key)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn send(
        &self,
        req: reqwest::RequestBuilder,
        operation: &'static str,
    ) -> Result<reqwest::Response, ApiError> {
        let res = self
            .auth_header(req)
            .send()
            .await
            .map_err(|source| ApiError::Http {
                service: SERVICE,
                operation,
                source,
            })?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                service: SERVICE,
                operation,
                status,
                body,
            });
        }
        Ok(res)
    }

    async fn get_json(&self, path: &str, operation: &'static str) -> Result<serde_json::Value, ApiError> {
        let url = self.url(path);
        debug!(%url, "Mailcow GET");
        let res = self.send(self.http.get(url), operation).await?;
        res.json().await.map_err(|e| ApiError::Decode {
            service: SERVICE,
            operation,
            detail: e.to_string(),
        })
    }

    /// POST a write call and turn `danger`/`error` entries into an error.
    async fn post<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
        operation: &'static str,
    ) -> Result<(), ApiError> {
        let url = self.url(path);
        debug!(%url, "Mailcow POST");
        let res = self.send(self.http.post(url).json(body), operation).await?;
        let answer: McResponse = res.json().await.map_err(|e| ApiError::Decode {
            service: SERVICE,
            operation,
            detail: e.to_string(),
        })?;

        let failures: Vec<String> = answer
            .messages()
            .iter()
            .filter(|m| m.is_failure())
            .map(McMessage::text)
            .collect();
        if !failures.is_empty() {
            return Err(ApiError::Rejected {
                service: SERVICE,
                operation,
                message: failures.join("; "),
            });
        }
        Ok(())
    }

    pub async fn domain_exists(&self, domain: &str) -> Result<bool, ApiError> {
        let value = self
            .get_json(&format!("get/domain/{domain}"), "get_domain")
            .await?;
        Ok(value.as_object().is_some_and(|o| !o.is_empty()))
    }

    pub async fn mailbox_exists(&self, address: &str) -> Result<bool, ApiError> {
        let value = self
            .get_json(&format!("get/mailbox/{address}"), "get_mailbox")
            .await?;
        Ok(value.as_object().is_some_and(|o| !o.is_empty()))
    }

    pub async fn get_dkim(&self, domain: &str) -> Result<Option<DkimKey>, ApiError> {
        let value = self
            .get_json(&format!("get/dkim/{domain}"), "get_dkim")
            .await?;
        // no key: `{}` or `[]`
        if !value.as_object().is_some_and(|o| !o.is_empty()) {
            return Ok(None);
        }
        let dkim: McDkim = serde_json::from_value(value).map_err(|e| ApiError::Decode {
            service: SERVICE,
            operation: "get_dkim",
            detail: e.to_string(),
        })?;
        Ok(dkim.dkim_txt.map(|txt| DkimKey {
            selector: dkim
                .dkim_selector
                .unwrap_or_else(|| DKIM_SELECTOR.to_string()),
            txt,
        }))
    }
}

#[async_trait]
impl MailServerApi for MailcowClient {
    async fn create_domain(&self, domain: &str) -> Result<(), ApiError> {
        if self.domain_exists(domain).await? {
            debug!(%domain, "mail domain already exists");
            return Ok(());
        }
        let body = McAddDomain {
            domain,
            description: "",
            aliases: 400,
            mailboxes: 10,
            defquota: 3072,
            maxquota: 10240,
            quota: 10240,
            active: "1",
            backupmx: "0",
            relay_all_recipients: "0",
            restart_sogo: "10",
        };
        self.post("add/domain", &body, "add_domain").await?;
        info!(%domain, "created mail domain");
        Ok(())
    }

    async fn delete_domain(&self, domain: &str) -> Result<(), ApiError> {
        self.post("delete/domain", &[domain], "delete_domain").await
    }

    async fn create_and_fetch_dkim(&self, domain: &str) -> Result<DkimKey, ApiError> {
        if let Some(key) = self.get_dkim(domain).await? {
            debug!(%domain, "DKIM key already exists");
            return Ok(key);
        }
        let body = McAddDkim {
            domains: domain,
            dkim_selector: DKIM_SELECTOR,
            key_size: DKIM_KEY_SIZE,
        };
        self.post("add/dkim", &body, "add_dkim").await?;
        info!(%domain, "created DKIM key");

        self.get_dkim(domain).await?.ok_or_else(|| ApiError::Decode {
            service: SERVICE,
            operation: "get_dkim",
            detail: format!("no DKIM key for {domain} after creating it"),
        })
    }

    async fn delete_dkim(&self, domain: &str) -> Result<(), ApiError> {
        self.post("delete/dkim", &[domain], "delete_dkim").await
    }

    async fn create_mailbox(&self, mailbox: &NewMailbox) -> Result<(), ApiError> {
        let address = format!("{}@{}", mailbox.local_part, mailbox.domain);
        if self.mailbox_exists(&address).await? {
            debug!(%address, "mailbox already exists");
            return Ok(());
        }
        let body = McAddMailbox {
            active: "1",
            domain: &mailbox.domain,
            local_part: &mailbox.local_part,
            name: &mailbox.name,
            password: &mailbox.password,
            password2: &mailbox.password,
            quota: mailbox.quota_mib.to_string(),
            force_pw_update: "0",
            tls_enforce_in: "1",
            tls_enforce_out: "1",
        };
        self.post("add/mailbox", &body, "add_mailbox").await?;
        info!(%address, "created mailbox");
        Ok(())
    }

    async fn delete_mailbox(&self, address: &str) -> Result<(), ApiError> {
        self.post("delete/mailbox", &[address], "delete_mailbox").await
    }

    async fn create_alias(&self, address: &str, goto: &str) -> Result<(), ApiError> {
        let body = McAddAlias {
            address,
            goto,
            active: "1",
        };
        self.post("add/alias", &body, "add_alias").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn ok(msg: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!([{"type": "success", "log": [], "msg": [msg]}]))
    }

    #[tokio::test]
    async fn create_domain_skips_existing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/get/domain/example.com"))
            .and(header("X-API-Key", "key"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"domain_name": "example.com"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ok("domain_added"))
            .expect(0)
            .mount(&server)
            .await;

        let client = MailcowClient::new(server.uri(), "key");
        client.create_domain("example.com").await.unwrap();
    }

    #[tokio::test]
    async fn create_domain_posts_when_missing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/get/domain/example.com"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/add/domain"))
            .and(body_partial_json(json!({"domain": "example.com", "active": "1"})))
            .respond_with(ok("domain_added"))
            .expect(1)
            .mount(&server)
            .await;

        let client = MailcowClient::new(format!("{}/", server.uri()), "key");
        client.create_domain("example.com").await.unwrap();
    }

    #[tokio::test]
    async fn danger_answer_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/add/alias"))
            .and(body_json(json!({"address": "@example.com", "goto": "info@example.com", "active": "1"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"type": "danger", "log": [], "msg": ["is_alias_or_mailbox", "@example.com"]}
            ])))
            .mount(&server)
            .await;

        let client = MailcowClient::new(server.uri(), "key");
        let err = client
            .create_alias("@example.com", "info@example.com")
            .await
            .unwrap_err();
        match err {
            ApiError::Rejected { operation, message, .. } => {
                assert_eq!(operation, "add_alias");
                assert_eq!(message, "is_alias_or_mailbox @example.com");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn dkim_is_created_then_fetched() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/get/dkim/example.com"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/add/dkim"))
            .and(body_json(json!({"domains": "example.com", "dkim_selector": "dkim", "key_size": 2048})))
            .respond_with(ok("dkim_added"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/get/dkim/example.com"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "pubkey": "MIIB", "length": "2048",
                "dkim_txt": "v=DKIM1;k=rsa;t=s;s=email;p=MIIB",
                "dkim_selector": "dkim", "privkey": ""
            })))
            .mount(&server)
            .await;

        let client = MailcowClient::new(server.uri(), "key");
        let key = client.create_and_fetch_dkim("example.com").await.unwrap();
        assert_eq!(
            key,
            DkimKey {
                selector: "dkim".into(),
                txt: "v=DKIM1;k=rsa;t=s;s=email;p=MIIB".into(),
            }
        );
    }

    #[tokio::test]
    async fn mailbox_and_deletions() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/get/mailbox/info@example.com"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/add/mailbox"))
            .and(body_partial_json(json!({
                "domain": "example.com", "local_part": "info", "name": "Info",
                "password": "pw", "password2": "pw", "quota": "3072"
            })))
            .respond_with(ok("mailbox_added"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/delete/mailbox"))
            .and(body_json(json!(["info@example.com"])))
            .respond_with(ok("mailbox_removed"))
            .expect(1)
            .mount(&server)
            .await;

        let client = MailcowClient::new(server.uri(), "key");
        client
            .create_mailbox(&NewMailbox {
                domain: "example.com".into(),
                local_part: "info".into(),
                name: "Info".into(),
                password: "pw".into(),
                quota_mib: 3072,
            })
            .await
            .unwrap();
        client.delete_mailbox("info@example.com").await.unwrap();
    }

    #[tokio::test]
    async fn existing_mailbox_is_left_alone() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/get/mailbox/info@example.com"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "username": "info@example.com", "domain": "example.com", "active": 1
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ok("mailbox_added"))
            .expect(0)
            .mount(&server)
            .await;

        let client = MailcowClient::new(server.uri(), "key");
        client
            .create_mailbox(&NewMailbox {
                domain: "example.com".into(),
                local_part: "info".into(),
                name: "Info".into(),
                password: "pw".into(),
                quota_mib: 3072,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unauthorized_surfaces_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(json!({"type": "error", "msg": "authentication failed"})),
            )
            .mount(&server)
            .await;

        let client = MailcowClient::new(server.uri(), "wrong");
        let err = client.delete_dkim("example.com").await.unwrap_err();
        assert!(matches!(err, ApiError::Status { status, .. } if status.as_u16() == 401));
    }
}
