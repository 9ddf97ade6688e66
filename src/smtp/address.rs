//! Recipient address validation.

use validator::ValidateEmail;

use crate::{EphimailError, Result};

/// Canonical mailbox form used for storage keys and subscriptions.
pub fn normalize_mailbox(address: &str) -> String {
    address.trim().to_ascii_lowercase()
}

/// Split a syntactically valid address into its canonical mailbox and domain.
pub fn parse_address(address: &str) -> Result<(String, String)> {
    let mailbox = normalize_mailbox(address);
    if !mailbox.validate_email() {
        return Err(EphimailError::InvalidRecipient(address.to_string()));
    }
    let domain = match mailbox.rsplit_once('@') {
        Some((_, domain)) => domain.to_string(),
        None => return Err(EphimailError::InvalidRecipient(address.to_string())),
    };
    Ok((mailbox, domain))
}

/// Domains this server accepts mail for.
#[derive(Debug, Clone, Default)]
pub struct DomainAllowList {
    domains: Vec<String>,
}

impl DomainAllowList {
    pub fn new<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let domains = domains
            .into_iter()
            .map(|d| d.as_ref().trim().to_ascii_lowercase())
            .filter(|d| !d.is_empty())
            .collect();
        Self { domains }
    }

    /// Whether `domain` is allowed (exact, case-insensitive).
    pub fn contains(&self, domain: &str) -> bool {
        self.domains.iter().any(|d| d.eq_ignore_ascii_case(domain))
    }

    pub fn domains(&self) -> &[String] {
        &self.domains
    }

    /// Validate a recipient, returning its canonical mailbox.
    pub fn check_recipient(&self, address: &str) -> Result<String> {
        let (mailbox, domain) = parse_address(address)?;
        if !self.contains(&domain) {
            return Err(EphimailError::DomainNotAllowed(domain));
        }
        Ok(mailbox)
    }
}
