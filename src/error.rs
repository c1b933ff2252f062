// src/error.rs
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

pub use crate::validation::ValidationError;

#[derive(Debug, Serialize)]
pub struct ErrorResponseBody {
    pub error: String,
}

/// A remote management API (Mailcow or PowerDNS) rejected or failed a call.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{service} {operation}: request failed: {source}")]
    Http {
        service: &'static str,
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{service} {operation} failed with {status}: {body}")]
    Status {
        service: &'static str,
        operation: &'static str,
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("{service} {operation} rejected: {message}")]
    Rejected {
        service: &'static str,
        operation: &'static str,
        message: String,
    },

    #[error("{service} {operation}: unexpected response: {detail}")]
    Decode {
        service: &'static str,
        operation: &'static str,
        detail: String,
    },
}

/// Failure of a single TLSA probe.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("connecting to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("probe timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("TLS handshake failed: {0}")]
    Tls(#[source] std::io::Error),

    #[error("{protocol} STARTTLS negotiation failed: {reply}")]
    Starttls {
        protocol: &'static str,
        reply: String,
    },

    #[error("certificate error: {0}")]
    Certificate(String),

    #[error("{program} exited with {status}: {stderr}")]
    Tool {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid server name {0:?}")]
    ServerName(String),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    RemoteApi(#[from] ApiError),

    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error(transparent)]
    InvalidInput(#[from] ValidationError),

    #[error("operation did not finish within {0:?}")]
    Timeout(std::time::Duration),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match self {
            Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Error::RemoteApi(_) | Error::Probe(_) => StatusCode::BAD_GATEWAY,
            Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        };

        let body = Json(ErrorResponseBody {
            error: self.to_string(),
        });
        (status, body).into_response()
    }
}
