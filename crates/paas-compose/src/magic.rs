//! Magic placeholders resolved at bundle preparation time
//!
//! Two spellings are accepted: `${SI_PAAS_APP}` and `{{paas.app}}` (inner
//! whitespace allowed). Anything that still looks like a placeholder after
//! substitution is an error.

use chrono::{DateTime, SecondsFormat, Utc};
use regex::{Captures, Regex};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use paas_core::{PaasError, Result};

fn mustache_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{\s*paas\.([a-zA-Z0-9_.-]+)\s*\}\}").expect("static mustache regex")
    })
}

fn leftover_dollar_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\$\{SI_PAAS_[A-Za-z0-9_]*[^}]*\}").expect("static placeholder regex")
    })
}

/// Values substituted into compose sources
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MagicVars {
    vars: BTreeMap<&'static str, String>,
}

impl MagicVars {
    pub fn new(
        app: &str,
        context: &str,
        release_id: &str,
        strategy: &str,
        targets: &[String],
        now: DateTime<Utc>,
    ) -> Self {
        let mut sorted: Vec<&str> = targets.iter().map(|t| t.trim()).collect();
        sorted.sort_unstable();

        let mut vars = BTreeMap::new();
        vars.insert("app", app.trim().to_string());
        vars.insert("context", context.trim().to_string());
        vars.insert("release", release_id.trim().to_string());
        vars.insert("targets", sorted.join(","));
        vars.insert("strategy", strategy.trim().to_string());
        vars.insert(
            "timestamp",
            now.to_rfc3339_opts(SecondsFormat::Secs, true),
        );
        Self { vars }
    }

    /// `SI_PAAS_*` name to value
    pub fn to_env_map(&self) -> BTreeMap<String, String> {
        self.vars
            .iter()
            .map(|(k, v)| (format!("SI_PAAS_{}", k.to_ascii_uppercase()), v.clone()))
            .collect()
    }

    /// Substitute every known placeholder in `content`
    pub fn resolve(&self, content: &str) -> Result<String> {
        let mut text = content.to_string();
        for (name, value) in &self.vars {
            let placeholder = format!("${{SI_PAAS_{}}}", name.to_ascii_uppercase());
            text = text.replace(&placeholder, value);
        }

        let text = mustache_re()
            .replace_all(&text, |caps: &Captures<'_>| {
                let name = caps[1].to_ascii_lowercase();
                match self.vars.get(name.as_str()) {
                    Some(value) => value.clone(),
                    None => caps[0].to_string(),
                }
            })
            .into_owned();

        let leftovers: BTreeSet<String> = mustache_re()
            .find_iter(&text)
            .chain(leftover_dollar_re().find_iter(&text))
            .map(|m| m.as_str().trim().to_string())
            .collect();
        if !leftovers.is_empty() {
            return Err(PaasError::UnresolvedMagic(
                leftovers.into_iter().collect::<Vec<_>>().join(", "),
            ));
        }
        Ok(text)
    }
}
