//! Human and `--json` rendering of command results
//!
//! JSON success: `{ok, command, context, mode, fields, data?}`.
//! JSON failure: `{ok:false, command, context, mode, error:{kind, message, hint?}}`.

use colored::Colorize;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

use paas_core::PaasError;

pub const MODE_LIVE: &str = "live";
pub const MODE_DRY_RUN: &str = "dry-run";

/// What a command handler hands back for printing
#[derive(Debug, Default)]
pub struct Outcome {
    pub mode: &'static str,
    pub fields: BTreeMap<String, String>,
    pub data: Option<Value>,
    /// Extra lines printed below the fields in human mode
    pub rows: Vec<String>,
}

impl Outcome {
    pub fn live() -> Self {
        Self {
            mode: MODE_LIVE,
            ..Default::default()
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        if dry_run {
            self.mode = MODE_DRY_RUN;
        }
        self
    }

    pub fn field(mut self, key: &str, value: impl ToString) -> Self {
        self.fields.insert(key.to_string(), value.to_string());
        self
    }

    pub fn data<T: Serialize>(mut self, data: &T) -> Result<Self, PaasError> {
        self.data = Some(serde_json::to_value(data)?);
        Ok(self)
    }

    pub fn row(mut self, line: impl Into<String>) -> Self {
        self.rows.push(line.into());
        self
    }

    pub fn rows<I: IntoIterator<Item = String>>(mut self, lines: I) -> Self {
        self.rows.extend(lines);
        self
    }
}

#[derive(Serialize)]
struct Envelope<'a> {
    ok: bool,
    command: &'a str,
    context: &'a str,
    mode: &'a str,
    fields: &'a BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: &'a Option<Value>,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    kind: &'a str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<&'a str>,
}

#[derive(Serialize)]
struct ErrorEnvelope<'a> {
    ok: bool,
    command: &'a str,
    context: &'a str,
    mode: &'a str,
    error: ErrorBody<'a>,
}

pub fn print_success(command: &str, context: &str, json: bool, outcome: &Outcome) {
    if json {
        let envelope = Envelope {
            ok: true,
            command,
            context,
            mode: outcome.mode,
            fields: &outcome.fields,
            data: &outcome.data,
        };
        print_json(&envelope);
        return;
    }

    let heading = format!("paas {}", command);
    if outcome.mode == MODE_DRY_RUN {
        println!("{} {}", heading.green().bold(), "(dry-run)".yellow());
    } else {
        println!("{}", heading.green().bold());
    }
    println!("  {}={}", "context".dimmed(), context);
    for (key, value) in &outcome.fields {
        println!("  {}={}", key.dimmed(), value);
    }
    for row in &outcome.rows {
        println!("  - {}", row);
    }
}

pub fn print_failure(command: &str, context: &str, json: bool, err: &PaasError) {
    let kind = err.kind();
    if json {
        let envelope = ErrorEnvelope {
            ok: false,
            command,
            context,
            mode: MODE_LIVE,
            error: ErrorBody {
                kind: kind.as_str(),
                message: err.to_string(),
                hint: err.hint(),
            },
        };
        print_json(&envelope);
        return;
    }

    eprintln!("{} {}", format!("error[{}]:", kind.as_str()).red().bold(), err.to_string().red());
    if let Some(hint) = err.hint() {
        eprintln!("  {} {}", "hint:".yellow(), hint);
    }
    if kind == paas_core::ErrorKind::UsageError {
        eprintln!("usage: paas {} [OPTIONS] (see `paas {} --help`)", command, command);
    }
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!("failed to render JSON output: {}", e),
    }
}
