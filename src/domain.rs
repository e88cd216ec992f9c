//! DNS domain name validation.

/// Maximum total length of a domain name.
pub const MAX_DOMAIN_LENGTH: usize = 253;

/// Maximum length of a single label.
pub const MAX_LABEL_LENGTH: usize = 63;

/// Check whether a string is a syntactically valid DNS domain.
///
/// Labels are 1-63 characters of `[a-zA-Z0-9-]` and may not start or end
/// with `-`. Single-label names such as `localhost` are accepted.
///
/// # Example
/// ```
/// use hostmerge::domain::is_valid_domain;
///
/// assert!(is_valid_domain("ads.example.com"));
/// assert!(is_valid_domain("localhost"));
/// assert!(!is_valid_domain("-bad.com"));
/// ```
pub fn is_valid_domain(s: &str) -> bool {
    if s.is_empty() || s.len() > MAX_DOMAIN_LENGTH {
        return false;
    }

    s.split('.').all(is_valid_label)
}

/// Stricter validation used for adblock network rules.
///
/// Requires at least two labels: `||token^` without a dot is almost never
/// a real domain.
pub fn is_valid_adblock_domain(s: &str) -> bool {
    is_valid_domain(s) && s.contains('.')
}

fn is_valid_label(label: &str) -> bool {
    if label.is_empty() || label.len() > MAX_LABEL_LENGTH {
        return false;
    }
    if label.starts_with('-') || label.ends_with('-') {
        return false;
    }
    label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
}
