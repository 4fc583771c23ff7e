//! Unified error types for the paas deploy loop

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Unified error type for all paas operations
#[derive(Error, Debug)]
pub enum PaasError {
    // Caller errors
    #[error("{0}")]
    Usage(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("{0}")]
    InUse(String),

    // Guardrails
    #[error("untrusted vault: {0}")]
    UntrustedVault(String),

    #[error("plaintext secret detected: {0}")]
    PlaintextSecret(String),

    // Compose preparation
    #[error("unresolved magic variable(s): {0}")]
    UnresolvedMagic(String),

    #[error("addon {addon:?} merge conflict in section {section:?} for key {key:?} (merge strategy additive-no-override forbids overriding existing keys)")]
    AddonMergeConflict {
        addon: String,
        section: String,
        key: String,
    },

    #[error("{0}")]
    BundleCorrupt(String),

    // Agent scheduler
    #[error("lock is active (owner={owner} heartbeat={heartbeat})")]
    LockActive { owner: String, heartbeat: String },

    // External collaborators
    #[error("{operation} timed out after {}s", .after.as_secs())]
    Timeout { operation: String, after: Duration },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("notifier error: {0}")]
    Notifier(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // Generic
    #[error("{0}")]
    Internal(String),
}

/// Result type alias using PaasError
pub type Result<T> = std::result::Result<T, PaasError>;

/// Stable error kinds surfaced in envelopes and exit codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UsageError,
    NotFound,
    AlreadyExists,
    InUse,
    UntrustedVault,
    PlaintextSecret,
    UnresolvedMagic,
    AddonMergeConflict,
    LockActive,
    BundleCorrupt,
    Timeout,
    TransportError,
    NotifierError,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::UsageError => "UsageError",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::AlreadyExists => "AlreadyExists",
            ErrorKind::InUse => "InUse",
            ErrorKind::UntrustedVault => "UntrustedVault",
            ErrorKind::PlaintextSecret => "PlaintextSecret",
            ErrorKind::UnresolvedMagic => "UnresolvedMagic",
            ErrorKind::AddonMergeConflict => "AddonMergeConflict",
            ErrorKind::LockActive => "LockActive",
            ErrorKind::BundleCorrupt => "BundleCorrupt",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::TransportError => "TransportError",
            ErrorKind::NotifierError => "NotifierError",
            ErrorKind::Internal => "Internal",
        }
    }

    /// Process exit code: 1 user/usage, 2 external failure, 3 guardrail refusal
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorKind::Timeout | ErrorKind::TransportError | ErrorKind::NotifierError => 2,
            ErrorKind::UntrustedVault | ErrorKind::PlaintextSecret => 3,
            _ => 1,
        }
    }

    /// Refusals that protect secrets; these always reach the operator
    pub fn is_guardrail(&self) -> bool {
        self.exit_code() == 3
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PaasError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PaasError::Usage(_) => ErrorKind::UsageError,
            PaasError::NotFound(_) => ErrorKind::NotFound,
            PaasError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            PaasError::InUse(_) => ErrorKind::InUse,
            PaasError::UntrustedVault(_) => ErrorKind::UntrustedVault,
            PaasError::PlaintextSecret(_) => ErrorKind::PlaintextSecret,
            PaasError::UnresolvedMagic(_) => ErrorKind::UnresolvedMagic,
            PaasError::AddonMergeConflict { .. } => ErrorKind::AddonMergeConflict,
            PaasError::BundleCorrupt(_) => ErrorKind::BundleCorrupt,
            PaasError::LockActive { .. } => ErrorKind::LockActive,
            PaasError::Timeout { .. } => ErrorKind::Timeout,
            PaasError::Transport(_) => ErrorKind::TransportError,
            PaasError::Notifier(_) => ErrorKind::NotifierError,
            PaasError::Io(_)
            | PaasError::Serialization(_)
            | PaasError::Yaml(_)
            | PaasError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Remediation hint shown next to the error, if any
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            PaasError::UntrustedVault(_) => Some(
                "run `paas vault trust` after reviewing recipients, or pass --allow-untrusted-vault",
            ),
            PaasError::PlaintextSecret(_) => Some(
                "move secret values into the vault and reference them as ${VAR} in compose",
            ),
            PaasError::UnresolvedMagic(_) => Some(
                "supported placeholders: SI_PAAS_APP, SI_PAAS_CONTEXT, SI_PAAS_RELEASE, SI_PAAS_TARGETS, SI_PAAS_STRATEGY, SI_PAAS_TIMESTAMP",
            ),
            PaasError::AddonMergeConflict { .. } => {
                Some("rename the conflicting key in the addon fragment")
            }
            PaasError::LockActive { .. } => {
                Some("wait for the running agent or let the lock expire (15m)")
            }
            PaasError::InUse(_) => Some("pass --force or select another target first"),
            PaasError::Transport(_) => {
                Some("verify ssh connectivity, known_hosts entry and key-based auth for the target")
            }
            PaasError::Timeout { .. } => Some("retry the command; the remote side is idempotent"),
            PaasError::Notifier(_) => {
                Some("Verify Telegram bot token/chat id and outbound network access.")
            }
            _ => None,
        }
    }

    pub fn usage(msg: impl Into<String>) -> Self {
        PaasError::Usage(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        PaasError::NotFound(what.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        PaasError::Internal(msg.into())
    }
}
