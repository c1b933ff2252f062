// src/api/provision.rs
use axum::{Extension, Json};
use serde::Deserialize;

use crate::error::Result;
use crate::provision::{Plan, ProvisionReport, ProvisionRequest, within};
use crate::{SharedState, auth::ApiKeyAuth};

#[derive(Deserialize)]
pub struct OpenpgpRequest {
    pub local_part: String,
    pub domain: String,
    /// ASCII-armored or bare base64 key.
    pub public_key: String,
}

// POST /api/mail-domain
pub async fn add_mail_domain(
    _auth: ApiKeyAuth,
    Extension(state): Extension<SharedState>,
    Json(req): Json<ProvisionRequest>,
) -> Result<Json<ProvisionReport>> {
    let report = within(state.operation_timeout, state.provisioner.add_mail_domain(&req)).await?;
    Ok(Json(report))
}

// POST /api/mail-domain/cleanup
pub async fn cleanup_mail_domain(
    _auth: ApiKeyAuth,
    Extension(state): Extension<SharedState>,
    Json(req): Json<ProvisionRequest>,
) -> Result<Json<ProvisionReport>> {
    let report = within(
        state.operation_timeout,
        state.provisioner.cleanup_add_mail_domain(&req),
    )
    .await?;
    Ok(Json(report))
}

// POST /api/mail-server
pub async fn add_mail_server(
    _auth: ApiKeyAuth,
    Extension(state): Extension<SharedState>,
    Json(req): Json<ProvisionRequest>,
) -> Result<Json<ProvisionReport>> {
    let report = within(
        state.operation_timeout,
        state.provisioner.add_mail_server_dns_records(&req),
    )
    .await?;
    Ok(Json(report))
}

// POST /api/mail-server/cleanup
pub async fn cleanup_mail_server(
    _auth: ApiKeyAuth,
    Extension(state): Extension<SharedState>,
    Json(req): Json<ProvisionRequest>,
) -> Result<Json<ProvisionReport>> {
    let report = within(
        state.operation_timeout,
        state.provisioner.cleanup_add_mail_server(&req),
    )
    .await?;
    Ok(Json(report))
}

// PUT /api/openpgp
pub async fn set_openpgp(
    _auth: ApiKeyAuth,
    Extension(state): Extension<SharedState>,
    Json(req): Json<OpenpgpRequest>,
) -> Result<Json<ProvisionReport>> {
    let report = within(
        state.operation_timeout,
        state
            .provisioner
            .set_openpgp_record(&req.local_part, &req.domain, &req.public_key),
    )
    .await?;
    Ok(Json(report))
}

// POST /api/plan
pub async fn plan(_auth: ApiKeyAuth, Json(req): Json<ProvisionRequest>) -> Result<Json<Plan>> {
    Ok(Json(req.plan()?))
}
