//! Remote shell command builders for docker compose

use crate::resolver::BASE_COMPOSE;

const UNAVAILABLE: &str =
    "echo 'docker compose and docker-compose are unavailable' >&2; exit 127";
const PULL_WARNING: &str =
    "echo 'WARNING: compose pull failed; continuing with local/build images' >&2";

/// Quote for POSIX `sh` inside single quotes
pub fn quote_single(value: &str) -> String {
    format!("'{}'", value.replace('\'', r#"'"'"'"#))
}

/// `-f 'a.yaml' -f 'b.yaml'`, defaulting to the base compose
pub fn compose_file_args(files: &[String]) -> String {
    let mut parts = Vec::with_capacity(files.len() * 2);
    for file in files.iter().map(|f| f.trim()).filter(|f| !f.is_empty()) {
        parts.push("-f".to_string());
        parts.push(quote_single(file));
    }
    if parts.is_empty() {
        parts.push("-f".to_string());
        parts.push(quote_single(BASE_COMPOSE));
    }
    parts.join(" ")
}

/// Run `compose <tail>` with the plugin, falling back to `docker-compose`
pub fn exec_command(files: &[String], tail: &str) -> String {
    let args = compose_file_args(files);
    let tail = tail.trim();
    let suffix = if tail.is_empty() {
        String::new()
    } else {
        format!(" {}", tail)
    };
    format!(
        "if docker compose version >/dev/null 2>&1; then docker compose {args}{suffix}; \
         elif command -v docker-compose >/dev/null 2>&1; then docker-compose {args}{suffix}; \
         else {UNAVAILABLE}; fi"
    )
}

/// Pull images; buildable services are skipped first, then retried plainly.
/// A failed pull only warns.
pub fn pull_command(files: &[String]) -> String {
    let args = compose_file_args(files);
    format!(
        "if docker compose version >/dev/null 2>&1; then \
         (docker compose {args} pull --ignore-buildable 2>/dev/null || docker compose {args} pull) || {PULL_WARNING}; \
         elif command -v docker-compose >/dev/null 2>&1; then docker-compose {args} pull || {PULL_WARNING}; \
         else {UNAVAILABLE}; fi"
    )
}

pub fn up_command(files: &[String]) -> String {
    exec_command(files, "up -d --remove-orphans")
}

/// Succeeds when at least one service is running
pub fn health_check_command(files: &[String]) -> String {
    format!(
        "{} | grep -q .",
        exec_command(files, "ps --status running --services")
    )
}
