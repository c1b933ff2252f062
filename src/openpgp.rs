//! OPENPGPKEY records (RFC 7929).
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::records::{DnsRecord, RecordType};
use crate::validation::{ValidationError, fqdn};

const ARMOR_BEGIN: &str = "-----BEGIN PGP PUBLIC KEY BLOCK-----";
const ARMOR_END: &str = "-----END PGP PUBLIC KEY BLOCK-----";

lazy_static::lazy_static! {
    static ref WHITESPACE_RE: Regex = Regex::new(r"\s+").unwrap();
    static ref KEY_BODY_RE: Regex = Regex::new(r"^[A-Za-z0-9+/]*").unwrap();
    /// Armor header lines such as `Version: GnuPG v2`.
    static ref ARMOR_HEADER_RE: Regex = Regex::new(r"^[A-Za-z][A-Za-z-]*: ").unwrap();
    /// What may follow the key body: base64 padding and the armor checksum.
    static ref KEY_TRAILER_RE: Regex = Regex::new(r"^={0,2}(=[A-Za-z0-9+/]{4})?$").unwrap();
}

/// Owner-name label for a mailbox local part: SHA-256 truncated to 28 octets.
pub fn openpgp_hash(local_part: &str) -> String {
    let digest = hex::encode(Sha256::digest(local_part.as_bytes()));
    digest[..56].to_string()
}

/// Extract the base64 key body from an ASCII-armored (or bare) public key.
pub fn key_body(public_key: &str) -> Result<String, ValidationError> {
    let without_headers: String = public_key
        .lines()
        .filter(|line| !ARMOR_HEADER_RE.is_match(line.trim_start()))
        .collect::<Vec<_>>()
        .join("\n");
    let collapsed = WHITESPACE_RE.replace_all(&without_headers, "");
    let begin = ARMOR_BEGIN.replace(' ', "");
    let end = ARMOR_END.replace(' ', "");
    let stripped = collapsed.replacen(&begin, "", 1).replacen(&end, "", 1);

    let body = KEY_BODY_RE
        .find(&stripped)
        .map(|m| m.as_str())
        .unwrap_or_default();
    if body.is_empty() || !KEY_TRAILER_RE.is_match(&stripped[body.len()..]) {
        return Err(ValidationError::InvalidPublicKey);
    }
    Ok(body.to_string())
}

/// Record for `local_part`, named relative to the `_openpgpkey` label; the
/// caller appends the mail domain.
pub fn openpgp_record(local_part: &str, public_key: &str) -> Result<DnsRecord, ValidationError> {
    let body = key_body(public_key)?;
    Ok(DnsRecord::single(
        format!("{}._openpgpkey.", openpgp_hash(local_part)),
        RecordType::Openpgpkey,
        body,
    ))
}

/// [`openpgp_record`] qualified with `domain`.
pub fn openpgp_record_for(
    local_part: &str,
    domain: &str,
    public_key: &str,
) -> Result<DnsRecord, ValidationError> {
    let mut record = openpgp_record(local_part, public_key)?;
    record.name.push_str(&fqdn(domain));
    Ok(record)
}

/// Wrap a key body in standard armor with 64-column lines.
pub fn armor(body: &str) -> String {
    let mut out = String::with_capacity(body.len() + body.len() / 64 + 80);
    out.push_str(ARMOR_BEGIN);
    out.push_str("\n\n");
    for line in body.as_bytes().chunks(64) {
        out.push_str(&String::from_utf8_lossy(line));
        out.push('\n');
    }
    out.push_str(ARMOR_END);
    out.push('\n');
    out
}
