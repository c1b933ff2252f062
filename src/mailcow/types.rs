use serde::{Deserialize, Serialize};

/// One entry of the status list Mailcow answers write calls with.
#[derive(Debug, Deserialize)]
pub struct McMessage {
    #[serde(rename = "type")]
    pub kind: String, // "success", "danger", "error"
    #[serde(default)]
    pub msg: serde_json::Value, // "text" or ["key", "arg", ...]
}

impl McMessage {
    pub fn is_failure(&self) -> bool {
        matches!(self.kind.as_str(), "danger" | "error")
    }

    pub fn text(&self) -> String {
        match &self.msg {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Array(parts) => parts
                .iter()
                .map(|p| p.as_str().map(str::to_string).unwrap_or_else(|| p.to_string()))
                .collect::<Vec<_>>()
                .join(" "),
            serde_json::Value::Null => self.kind.clone(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum McResponse {
    Many(Vec<McMessage>),
    One(McMessage),
}

impl McResponse {
    pub fn messages(&self) -> &[McMessage] {
        match self {
            McResponse::Many(all) => all,
            McResponse::One(one) => std::slice::from_ref(one),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct McAddDomain<'a> {
    pub domain: &'a str,
    pub description: &'a str,
    pub aliases: u32,
    pub mailboxes: u32,
    pub defquota: u32,
    pub maxquota: u32,
    pub quota: u32,
    pub active: &'a str,
    pub backupmx: &'a str,
    pub relay_all_recipients: &'a str,
    pub restart_sogo: &'a str,
}

#[derive(Debug, Serialize)]
pub struct McAddDkim<'a> {
    pub domains: &'a str,
    pub dkim_selector: &'a str,
    pub key_size: u32,
}

#[derive(Debug, Default, Deserialize)]
pub struct McDkim {
    #[serde(default)]
    pub dkim_txt: Option<String>,
    #[serde(default)]
    pub dkim_selector: Option<String>,
    #[serde(default)]
    pub length: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct McAddMailbox<'a> {
    pub active: &'a str,
    pub domain: &'a str,
    pub local_part: &'a str,
    pub name: &'a str,
    pub password: &'a str,
    pub password2: &'a str,
    pub quota: String,
    pub force_pw_update: &'a str,
    pub tls_enforce_in: &'a str,
    pub tls_enforce_out: &'a str,
}

#[derive(Debug, Serialize)]
pub struct McAddAlias<'a> {
    pub address: &'a str,
    pub goto: &'a str,
    pub active: &'a str,
}
