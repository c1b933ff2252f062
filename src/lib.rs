//! Mail domain provisioning across a Mailcow server and a PowerDNS
//! authoritative server, including DANE TLSA records derived by probing the
//! mail server's TLS endpoints.

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod mailcow;
pub mod openpgp;
pub mod powerdns;
pub mod provision;
pub mod records;
pub mod tlsa;
pub mod validation;

use provision::Provisioner;

use std::sync::Arc;
use std::time::Duration;

/// Dependencies shared across HTTP handlers.
pub struct AppState {
    pub provisioner: Provisioner,
    pub api_key: String,
    pub operation_timeout: Option<Duration>,
}

/// Arc-wrapped version of `AppState` passed into Axum extensions.
pub type SharedState = Arc<AppState>;
