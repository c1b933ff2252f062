//! API-key extractor for the HTTP front-end plus password helpers.
use axum::{
    Extension,
    extract::FromRequestParts,
    http::{StatusCode, request::Parts},
};
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as BASE64;
use rand_core::{OsRng, RngCore};
use sha2::{Digest, Sha256};

use crate::SharedState;

/// Header carrying the front-end's API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Random bytes behind a generated mailbox password (24 base64 characters).
const PASSWORD_BYTES: usize = 18;

/// Axum extractor that checks the `X-API-Key` header against the configured key.
pub struct ApiKeyAuth;

impl<S> FromRequestParts<S> for ApiKeyAuth
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Extension(app_state): Extension<SharedState> =
            Extension::from_request_parts(parts, state)
                .await
                .map_err(|_| (StatusCode::INTERNAL_SERVER_ERROR, "missing state"))?;

        let presented = parts
            .headers
            .get(API_KEY_HEADER)
            .ok_or((StatusCode::UNAUTHORIZED, "missing X-API-Key header"))?
            .to_str()
            .map_err(|_| (StatusCode::BAD_REQUEST, "invalid X-API-Key header"))?;

        if !keys_match(presented, &app_state.api_key) {
            return Err((StatusCode::UNAUTHORIZED, "invalid credentials"));
        }

        Ok(ApiKeyAuth)
    }
}

/// Compare digests so the comparison does not depend on where the keys differ.
fn keys_match(presented: &str, expected: &str) -> bool {
    !expected.is_empty() && Sha256::digest(presented.as_bytes()) == Sha256::digest(expected.as_bytes())
}

/// Random password for a mailbox created without one.
pub fn generate_password() -> String {
    let mut bytes = [0u8; PASSWORD_BYTES];
    OsRng.fill_bytes(&mut bytes);
    BASE64.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_passwords_differ() {
        let a = generate_password();
        let b = generate_password();
        assert_eq!(a.len(), 24);
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn key_comparison() {
        assert!(keys_match("s3cret", "s3cret"));
        assert!(!keys_match("s3cret", "other"));
        assert!(!keys_match("", ""));
    }
}
