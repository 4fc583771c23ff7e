//! # paas-vault
//!
//! Deploy guardrails around the dotenv vault:
//!
//! - locate the vault and fingerprint its `@vault-recipient:` headers
//! - compare against the pinned fingerprint in the trust store
//! - refuse compose files that carry literal secrets

pub mod dotenv;
pub mod guardrail;
pub mod plaintext;
pub mod trust;

pub use dotenv::{render_value_plain, DotenvDocument, DotenvEntry, RECIPIENT_HEADER};
pub use guardrail::{check_vault, trust_vault, VaultOptions, VaultReport, VAULT_FILE_ENV};
pub use paas_core::redact::{is_sensitive_field, redact_fields, REDACTED};
pub use plaintext::{
    enforce_plaintext_guardrail, scan_plaintext_secrets, PlaintextFinding, PlaintextReport,
};
pub use trust::{recipients_fingerprint, TrustStore, TRUST_STORE_ENV};
