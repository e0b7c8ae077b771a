//! Identity normalization and hashing.
//!
//! Contact identifiers are compared, stored and delivered to the advertising platform as lowercase hex SHA-256
//! digests of their normalized form. Normalization must be byte-identical for semantically identical input, since
//! both the matching engine and the platform dedupe on the digest.

use sha2::{Digest, Sha256};

/// Canonical form of an email address: trimmed and lowercased.
pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Canonical form of a phone number: digits only, with a single leading `+` preserved when present.
///
/// `+1 (555) 123-4567`, `+1 555 123 4567` and `+15551234567` all normalize to the same string. No attempt is made
/// to infer a country code for numbers captured without one.
pub fn normalize_phone(raw: &str) -> String {
    let trimmed = raw.trim();
    let plus = if trimmed.starts_with('+') { "+" } else { "" };
    let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        String::new()
    } else {
        format!("{plus}{digits}")
    }
}

/// Lowercase hex SHA-256 digest of the input. Empty input yields the empty digest, never the hash of `""`.
pub fn sha256_hex(normalized: &str) -> String {
    if normalized.is_empty() {
        return String::new();
    }
    let digest = Sha256::digest(normalized.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Normalize-and-hash convenience for emails. Blank input yields `None`.
pub fn email_digest(raw: &str) -> Option<String> {
    let digest = sha256_hex(&normalize_email(raw));
    if digest.is_empty() {
        None
    } else {
        Some(digest)
    }
}

/// Normalize-and-hash convenience for phone numbers. Input without any digits yields `None`.
pub fn phone_digest(raw: &str) -> Option<String> {
    let digest = sha256_hex(&normalize_phone(raw));
    if digest.is_empty() {
        None
    } else {
        Some(digest)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn email_normalization_is_case_and_whitespace_insensitive() {
        assert_eq!(normalize_email(" A@X.com "), "a@x.com");
        assert_eq!(normalize_email("a@x.com"), "a@x.com");
        assert_eq!(email_digest(" A@X.com "), email_digest("a@x.com"));
    }

    #[test]
    fn phone_normalization_strips_formatting() {
        assert_eq!(normalize_phone("+1 (555) 123-4567"), "+15551234567");
        assert_eq!(normalize_phone("555.123.4567"), "5551234567");
        assert_eq!(phone_digest("+1 555 123 4567"), phone_digest("+1(555)123-4567"));
    }

    #[test]
    fn digest_is_deterministic_lowercase_hex() {
        // SHA-256 of "a@x.com"
        let digest = sha256_hex("a@x.com");
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(digest, sha256_hex("a@x.com"));
    }

    #[test]
    fn empty_input_yields_empty_digest() {
        assert_eq!(sha256_hex(""), "");
        assert_eq!(email_digest("   "), None);
        assert_eq!(phone_digest("ext."), None);
    }
}
