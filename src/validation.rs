use regex::Regex;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("domain label is empty")]
    Empty,
    #[error("domain label too long (max 63 characters)")]
    TooLong,
    #[error("domain label contains invalid characters (only a-z, 0-9, and '-' allowed)")]
    InvalidCharacters,
    #[error("domain label must not start or end with '-'")]
    LeadingOrTrailingHyphen,
    #[error("no second-level domain in {0:?}")]
    NoSecondLevel(String),
    #[error("invalid e-mail address {0:?}")]
    InvalidEmail(String),
    #[error("invalid public key")]
    InvalidPublicKey,
    #[error("at least one nameserver is required")]
    MissingNameserver,
}

lazy_static::lazy_static! {
    /// Only lowercase letters, digits and '-'
    static ref LABEL_RE: Regex = Regex::new(r"^[a-z0-9-]+$").unwrap();
    /// Last two labels of a name or e-mail address.
    static ref SECOND_LEVEL_RE: Regex =
        Regex::new(r"[A-Za-z0-9-]{1,63}\.[A-Za-z0-9-]{1,63}$").unwrap();
}

pub fn validate_label(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::Empty);
    }
    if name.len() > 63 {
        return Err(ValidationError::TooLong);
    }
    if !LABEL_RE.is_match(&name.to_ascii_lowercase()) {
        return Err(ValidationError::InvalidCharacters);
    }
    if name.starts_with('-') || name.ends_with('-') {
        return Err(ValidationError::LeadingOrTrailingHyphen);
    }

    Ok(())
}

pub fn validate_fqdn_ascii(domain: &str) -> Result<(), ValidationError> {
    let d = domain.trim_end_matches('.');
    if d.is_empty() {
        return Err(ValidationError::Empty);
    }
    for label in d.split('.') {
        validate_label(label)?;
    }
    Ok(())
}

/// Canonical absolute form (`example.com.`) of a domain name.
pub fn fqdn(name: &str) -> String {
    format!("{}.", name.trim().trim_end_matches('.'))
}

/// Registrable part of a domain or e-mail address, e.g. `example.com` for
/// `mail.example.com` or `dmarc@reports.example.com`.
///
/// This is a naive last-two-labels rule; public suffixes such as `co.uk` are
/// not recognised.
pub fn second_level_domain(input: &str) -> Result<String, ValidationError> {
    let trimmed = input.trim().trim_end_matches('.');
    SECOND_LEVEL_RE
        .find(trimmed)
        .map(|m| m.as_str().to_ascii_lowercase())
        .ok_or_else(|| ValidationError::NoSecondLevel(input.to_string()))
}

/// Split `local@domain`, validating the domain part.
pub fn split_email(address: &str) -> Result<(&str, &str), ValidationError> {
    let invalid = || ValidationError::InvalidEmail(address.to_string());
    let (local, domain) = address.rsplit_once('@').ok_or_else(invalid)?;
    if local.is_empty() || local.contains(char::is_whitespace) {
        return Err(invalid());
    }
    validate_fqdn_ascii(domain).map_err(|_| invalid())?;
    Ok((local, domain))
}

/// SOA RNAME for a hostmaster address: `host.master@example.com` becomes
/// `host\.master.example.com.`.
pub fn soa_rname(email: &str) -> String {
    match email.split_once('@') {
        Some((user, domain)) => {
            let user = user.replace('.', "\\.");
            fqdn(&format!("{user}.{domain}"))
        }
        None => fqdn(email),
    }
}
