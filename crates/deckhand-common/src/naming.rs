//! Kubernetes name validation and derivation

use crate::Error;

/// Maximum length of a DNS-1123 label
pub const MAX_LABEL_LEN: usize = 63;

/// Validate that `value` is a DNS-1123 label: `[a-z0-9]([-a-z0-9]*[a-z0-9])?`, max 63 chars.
///
/// `what` names the value in the error (e.g., "name", "namespace").
pub fn validate_dns_label(value: &str, what: &str) -> Result<(), Error> {
    let invalid = |reason: &str| {
        Error::input_for_field(
            what,
            format!("invalid {} format '{}': {}", what, value, reason),
        )
    };

    if value.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if value.len() > MAX_LABEL_LEN {
        return Err(invalid("must be at most 63 characters"));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(invalid(
            "must contain only lowercase letters, digits and hyphens",
        ));
    }
    if value.starts_with('-') || value.ends_with('-') {
        return Err(invalid("must start and end with a letter or digit"));
    }
    Ok(())
}

/// Sanitize a string into a valid DNS label.
///
/// Lowercases, replaces anything outside `[a-z0-9]` with `-`, trims hyphens
/// and truncates to 63 characters. May return an empty string.
pub fn sanitize_dns_label(s: &str) -> String {
    let sanitized: String = s
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    let trimmed = sanitized.trim_matches('-');
    if trimmed.len() > MAX_LABEL_LEN {
        trimmed[..MAX_LABEL_LEN].trim_end_matches('-').to_string()
    } else {
        trimmed.to_string()
    }
}

/// Name of a companion object derived from an application name (`<app>-<suffix>`)
pub fn companion_name(app: &str, suffix: &str) -> String {
    format!("{}-{}", app, suffix)
}
