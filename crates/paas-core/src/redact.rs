//! Redaction of sensitive field values

use std::collections::BTreeMap;

/// Placeholder written in place of sensitive values
pub const REDACTED: &str = "<redacted>";

const SENSITIVE_MARKERS: &[&str] = &[
    "secret",
    "token",
    "password",
    "credential",
    "private_key",
    "api_key",
];

const SAFE_MARKERS: &[&str] = &["count", "findings", "guardrail"];

/// Whether a field name carries secret material
///
/// `secret_count` or `plaintext_guardrail` describe secrets without holding
/// them and stay visible.
pub fn is_sensitive_field(name: &str) -> bool {
    let name = name.trim().to_ascii_lowercase();
    if name.is_empty() {
        return false;
    }
    if SAFE_MARKERS.iter().any(|m| name.contains(m)) {
        return false;
    }
    SENSITIVE_MARKERS.iter().any(|m| name.contains(m))
}

pub fn redact_value(name: &str, value: &str) -> String {
    if is_sensitive_field(name) && !value.is_empty() {
        REDACTED.to_string()
    } else {
        value.to_string()
    }
}

/// Copy of `fields` with sensitive values replaced and blank keys dropped
pub fn redact_fields(fields: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    fields
        .iter()
        .filter(|(k, _)| !k.trim().is_empty())
        .map(|(k, v)| (k.trim().to_string(), redact_value(k, v)))
        .collect()
}
