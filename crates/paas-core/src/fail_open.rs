//! Best-effort bookkeeping around a primary action
//!
//! Audit appends after a failed command, alert history rows and agent run
//! records are written once the real outcome is already decided. Their own
//! failure is logged with its [`ErrorKind`] and never replaces that outcome.
//! Store mutations and guardrail checks must propagate instead.

use std::future::Future;
use tracing::{error, warn};

use crate::{ErrorKind, Result};

/// Run bookkeeping whose failure is only logged
///
/// Returns `None` on failure. The log line carries `error_kind` and
/// `exit_code` fields; guardrail kinds are logged at error level since a
/// vault or plaintext refusal inside bookkeeping means a caller misuse.
///
/// ```no_run
/// use paas_core::fail_open::fail_open;
/// use paas_core::Result;
///
/// async fn append_audit() -> Result<()> {
///     Ok(())
/// }
///
/// async fn example() {
///     let _ = fail_open("audit append", || append_audit()).await;
/// }
/// ```
pub async fn fail_open<F, Fut, T>(what: &str, f: F) -> Option<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let err = match f().await {
        Ok(val) => return Some(val),
        Err(e) => e,
    };
    let kind: ErrorKind = err.kind();
    if kind.is_guardrail() {
        error!(error_kind = kind.as_str(), exit_code = kind.exit_code(), "{} refused: {}", what, err);
    } else {
        warn!(error_kind = kind.as_str(), exit_code = kind.exit_code(), "{} skipped: {}", what, err);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PaasError;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fail_open_passes_value_through() {
        let result = fail_open("audit append", || async { Ok::<_, PaasError>(42) }).await;
        assert_eq!(result, Some(42));
    }

    #[tokio::test]
    async fn test_bookkeeping_errors_are_absorbed() {
        let result = fail_open("alert history append", || async {
            Err::<i32, _>(PaasError::internal("disk full"))
        })
        .await;
        assert_eq!(result, None);

        let result = fail_open("deploy failure alert", || async {
            Err::<i32, _>(PaasError::Timeout {
                operation: "telegram send".to_string(),
                after: Duration::from_secs(10),
            })
        })
        .await;
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn test_guardrail_kind_is_absorbed_but_classified() {
        let err = PaasError::UntrustedVault("fingerprint changed".to_string());
        assert!(err.kind().is_guardrail());
        assert!(!PaasError::internal("x").kind().is_guardrail());

        let result = fail_open("agent run record", || async { Err::<(), _>(err) }).await;
        assert_eq!(result, None);
    }
}
