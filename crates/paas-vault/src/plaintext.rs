//! Plaintext-secret guardrail for compose files

use regex::Regex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use paas_core::redact::REDACTED;
use paas_core::{PaasError, Result};

fn assignment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(?:-\s*)?([A-Za-z_][A-Za-z0-9_]*)\s*[:=]\s*(.+?)\s*$")
            .expect("static assignment regex")
    })
}

/// A literal secret-like assignment found in a compose file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaintextFinding {
    pub path: PathBuf,
    pub line: usize,
    pub key: String,
}

/// Outcome of the plaintext guardrail when it does not refuse
#[derive(Debug, Clone, Serialize)]
pub struct PlaintextReport {
    pub findings: usize,
    /// `ok` or `bypassed`
    pub guardrail: &'static str,
}

fn is_secret_like(key: &str, markers: &[String]) -> bool {
    let key = key.to_ascii_uppercase();
    markers
        .iter()
        .map(|m| m.trim().to_ascii_uppercase())
        .any(|m| !m.is_empty() && key.contains(&m))
}

fn candidate_value(raw: &str) -> String {
    let mut value = raw.trim();
    if let Some(idx) = value.find(" #") {
        value = value[..idx].trim();
    }
    value.trim_matches(|c| c == '"' || c == '\'').trim().to_string()
}

fn is_plaintext_value(value: &str) -> bool {
    if value.is_empty() {
        return false;
    }
    if matches!(value.to_ascii_lowercase().as_str(), "null" | "~" | "{}" | "[]") {
        return false;
    }
    if value.starts_with('$') {
        return false;
    }
    !value.to_ascii_uppercase().starts_with("ENC[")
}

/// Find literal assignments to sensitive keys
///
/// Matches `- KEY=VALUE` list entries and `KEY: VALUE` map entries; values
/// that are interpolations (`$VAR`, `${VAR}`), `ENC[...]` or YAML empties are
/// not findings.
pub fn scan_plaintext_secrets(
    path: &Path,
    content: &str,
    markers: &[String],
) -> Vec<PlaintextFinding> {
    let mut findings = Vec::new();
    for (idx, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some(caps) = assignment_re().captures(line) else {
            continue;
        };
        let key = caps[1].trim().to_ascii_uppercase();
        if !is_secret_like(&key, markers) {
            continue;
        }
        if !is_plaintext_value(&candidate_value(&caps[2])) {
            continue;
        }
        findings.push(PlaintextFinding {
            path: path.to_path_buf(),
            line: idx + 1,
            key,
        });
    }
    findings
}

/// Refuse a compose file holding literal secrets unless bypassed
pub async fn enforce_plaintext_guardrail(
    compose_path: &Path,
    markers: &[String],
    allow_plaintext: bool,
) -> Result<PlaintextReport> {
    let content = tokio::fs::read_to_string(compose_path).await.map_err(|e| {
        PaasError::usage(format!(
            "unable to read compose file {}: {}",
            compose_path.display(),
            e
        ))
    })?;
    let findings = scan_plaintext_secrets(compose_path, &content, markers);

    if findings.is_empty() {
        return Ok(PlaintextReport {
            findings: 0,
            guardrail: "ok",
        });
    }
    if allow_plaintext {
        return Ok(PlaintextReport {
            findings: findings.len(),
            guardrail: "bypassed",
        });
    }

    let mut message = String::from(
        "plaintext secret assignments in compose file; move values into the vault and reference them as ${VAR}",
    );
    for finding in &findings {
        message.push_str(&format!(
            "\n  - {}:{} ({}={})",
            finding.path.display(),
            finding.line,
            finding.key,
            REDACTED
        ));
    }
    Err(PaasError::PlaintextSecret(message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use paas_core::ErrorKind;
    use tempfile::TempDir;

    fn markers() -> Vec<String> {
        paas_core::PaasConfig::default().sensitive_key_markers
    }

    #[test]
    fn test_scan_list_and_map_forms() {
        let compose = "\
services:
  api:
    environment:
      - DB_PASSWORD=abc123
      - DB_HOST=db
      - API_TOKEN=${API_TOKEN}
      SESSION_SECRET: \"s3cr3t\" # inline
      SIGNING_KEY: ~
";
        let findings = scan_plaintext_secrets(Path::new("compose.yaml"), compose, &markers());
        let keys: Vec<&str> = findings.iter().map(|f| f.key.as_str()).collect();
        assert_eq!(keys, vec!["DB_PASSWORD", "SESSION_SECRET"]);
        assert_eq!(findings[0].line, 4);
    }

    #[tokio::test]
    async fn test_refusal_redacts_value() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("compose.yaml");
        std::fs::write(
            &path,
            "services:\n  api:\n    environment:\n      - DB_PASSWORD=abc123\n",
        )
        .unwrap();

        let err = enforce_plaintext_guardrail(&path, &markers(), false)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PlaintextSecret);
        let msg = err.to_string();
        assert!(msg.contains("<redacted>"));
        assert!(msg.contains("DB_PASSWORD"));
        assert!(!msg.contains("abc123"));
    }

    #[tokio::test]
    async fn test_bypass_reports_findings() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("compose.yaml");
        std::fs::write(&path, "environment:\n  - ADMIN_TOKEN=xyz\n").unwrap();

        let report = enforce_plaintext_guardrail(&path, &markers(), true)
            .await
            .unwrap();
        assert_eq!(report.findings, 1);
        assert_eq!(report.guardrail, "bypassed");
    }

    #[tokio::test]
    async fn test_clean_compose_passes() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("compose.yaml");
        std::fs::write(&path, "services:\n  api:\n    image: nginx\n").unwrap();

        let report = enforce_plaintext_guardrail(&path, &markers(), false)
            .await
            .unwrap();
        assert_eq!(report.guardrail, "ok");
    }
}
