//! Dotenv vault document model
//!
//! Only what the guardrail needs: assignments, recipient headers and
//! ciphertext detection. Encryption lives outside this crate.

use std::path::Path;

use paas_core::Result;

/// Header line declaring a public key values may be encrypted to
pub const RECIPIENT_HEADER: &str = "@vault-recipient:";

const LEGACY_RECIPIENT_HEADER: &str = "si-vault:recipient";

const CIPHERTEXT_PREFIXES: &[&str] = &["encrypted:", "es2:"];

/// One `KEY=VALUE` assignment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DotenvEntry {
    pub key: String,
    pub value: String,
    pub line: usize,
}

impl DotenvEntry {
    pub fn is_ciphertext(&self) -> bool {
        is_ciphertext(&self.value)
    }
}

/// Parsed vault file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DotenvDocument {
    entries: Vec<DotenvEntry>,
    recipients: Vec<String>,
}

impl DotenvDocument {
    pub fn parse(text: &str) -> Self {
        let mut doc = DotenvDocument::default();
        for (idx, raw) in text.lines().enumerate() {
            if let Some(recipient) = parse_recipient_line(raw) {
                if !doc.recipients.contains(&recipient) {
                    doc.recipients.push(recipient);
                }
                continue;
            }
            if let Some((key, value)) = parse_assignment(raw) {
                doc.entries.push(DotenvEntry {
                    key,
                    value,
                    line: idx + 1,
                });
            }
        }
        doc
    }

    pub async fn read(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path).await?;
        Ok(Self::parse(&text))
    }

    pub fn entries(&self) -> &[DotenvEntry] {
        &self.entries
    }

    pub fn recipients(&self) -> &[String] {
        &self.recipients
    }

    /// Last assignment wins, as with shell sourcing
    pub fn lookup(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.key == key)
            .map(|e| e.value.as_str())
    }

    /// `KEY=VALUE` pairs for entries that are not ciphertext
    pub fn plaintext_pairs(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| !e.is_ciphertext())
            .map(|e| format!("{}={}", e.key, e.value))
            .collect()
    }

    pub fn ciphertext_keys(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.is_ciphertext())
            .map(|e| e.key.as_str())
            .collect()
    }
}

pub fn is_ciphertext(value: &str) -> bool {
    let value = value.trim();
    CIPHERTEXT_PREFIXES.iter().any(|p| value.starts_with(p))
}

fn parse_recipient_line(line: &str) -> Option<String> {
    let mut trimmed = line.trim();
    if let Some(rest) = trimmed.strip_prefix('#') {
        trimmed = rest.trim();
    }
    let rest = trimmed
        .strip_prefix(RECIPIENT_HEADER)
        .or_else(|| trimmed.strip_prefix(LEGACY_RECIPIENT_HEADER))?;
    let recipient = rest.trim();
    if recipient.is_empty() {
        None
    } else {
        Some(recipient.to_string())
    }
}

fn parse_assignment(line: &str) -> Option<(String, String)> {
    let trimmed = line.trim_start();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }
    let (left, right) = trimmed.split_once('=')?;
    let left = left.trim();
    let key = left
        .strip_prefix("export ")
        .or_else(|| left.strip_prefix("export\t"))
        .unwrap_or(left)
        .trim();
    if key.is_empty() || key.contains(char::is_whitespace) {
        return None;
    }
    Some((key.to_string(), normalize_value(right)))
}

/// Strip quotes and trailing inline comments from a raw value
pub fn normalize_value(raw: &str) -> String {
    let value = raw.trim();
    if let Some(rest) = value.strip_prefix('\'') {
        if let Some(end) = rest.find('\'') {
            return rest[..end].to_string();
        }
        return value.to_string();
    }
    if let Some(rest) = value.strip_prefix('"') {
        let mut out = String::new();
        let mut chars = rest.chars();
        while let Some(ch) = chars.next() {
            match ch {
                '\\' => match chars.next() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some(other) => out.push(other),
                    None => out.push('\\'),
                },
                '"' => return out,
                other => out.push(other),
            }
        }
        return value.to_string();
    }
    if value.starts_with('#') {
        return String::new();
    }
    match value.find(" #").or_else(|| value.find("\t#")) {
        Some(idx) => value[..idx].trim_end().to_string(),
        None => value.to_string(),
    }
}

/// Render a value for a generated `.env` line
///
/// Values made only of shell-safe characters are written bare; anything else
/// is double-quoted with `\`, `"`, newlines and tabs escaped.
pub fn render_value_plain(value: &str) -> String {
    let safe = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-.:/@+,=%".contains(c));
    if safe {
        return value.to_string();
    }
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# si-vault:v1
@vault-recipient:age1alpha
# @vault-recipient: age1beta

export DB_HOST=db.internal # primary
DB_PASSWORD=encrypted:si:v2:AAAA
GREETING=\"hello\\nworld\"
QUOTED='single # not a comment'
EMPTY=
";

    #[test]
    fn test_parse_recipients_and_entries() {
        let doc = DotenvDocument::parse(SAMPLE);
        assert_eq!(doc.recipients(), &["age1alpha".to_string(), "age1beta".to_string()]);
        assert_eq!(doc.lookup("DB_HOST"), Some("db.internal"));
        assert_eq!(doc.lookup("GREETING"), Some("hello\nworld"));
        assert_eq!(doc.lookup("QUOTED"), Some("single # not a comment"));
        assert_eq!(doc.lookup("EMPTY"), Some(""));
        assert_eq!(doc.entries().len(), 5);
    }

    #[test]
    fn test_ciphertext_filtered_from_plaintext_pairs() {
        let doc = DotenvDocument::parse(SAMPLE);
        assert_eq!(doc.ciphertext_keys(), vec!["DB_PASSWORD"]);
        let pairs = doc.plaintext_pairs();
        assert!(pairs.contains(&"DB_HOST=db.internal".to_string()));
        assert!(!pairs.iter().any(|p| p.starts_with("DB_PASSWORD=")));
    }

    #[test]
    fn test_legacy_recipient_header() {
        let doc = DotenvDocument::parse("# si-vault:recipient age1legacy\nA=1\n");
        assert_eq!(doc.recipients(), &["age1legacy".to_string()]);
    }

    #[test]
    fn test_render_value_plain_roundtrips_through_parse() {
        assert_eq!(render_value_plain("postgres://db:5432/app"), "postgres://db:5432/app");
        assert_eq!(render_value_plain(""), "\"\"");
        for value in ["two words", "quote\"inside", "line\nbreak", "back\\slash #x"] {
            let rendered = render_value_plain(value);
            let doc = DotenvDocument::parse(&format!("K={}\n", rendered));
            assert_eq!(doc.lookup("K"), Some(value), "value {:?}", value);
        }
    }
}
