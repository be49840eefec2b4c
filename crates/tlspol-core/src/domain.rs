//! Recipient domain validation
//!
//! The socketmap client hands over whatever Postfix saw as the next-hop
//! destination; only syntactically valid hostnames are worth a policy
//! lookup. IP literals and leading-dot parent forms are rejected before the
//! cache or the resolver is consulted.

use std::net::IpAddr;

/// Check RFC 1035/1123 hostname syntax
///
/// Accepts a case-folded ASCII label sequence with an optional trailing
/// dot. IP literals pass this check per se and are screened separately.
pub fn is_valid_hostname(domain: &str) -> bool {
    let name = domain.strip_suffix('.').unwrap_or(domain);
    if name.is_empty() || name.len() > 253 {
        return false;
    }

    name.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-')
    })
}

/// Why a queried name is not eligible for policy lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectedDomain {
    /// IPv4 or IPv6 literal
    IpLiteral,
    /// Leading-dot parent form (`.example.com`)
    ParentForm,
    /// Fails hostname syntax
    InvalidName,
}

/// Validate a case-folded query argument
pub fn validate(domain: &str) -> Result<(), RejectedDomain> {
    if domain.parse::<IpAddr>().is_ok() {
        return Err(RejectedDomain::IpLiteral);
    }
    if let Some(rest) = domain.strip_prefix('.') {
        if is_valid_hostname(rest) {
            return Err(RejectedDomain::ParentForm);
        }
    }
    if !is_valid_hostname(domain) {
        return Err(RejectedDomain::InvalidName);
    }
    Ok(())
}
