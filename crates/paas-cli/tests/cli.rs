use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const COMPOSE: &str = "services:\n  api:\n    image: nginx:1.27\n    ports:\n      - \"8080:80\"\n";

struct Workspace {
    temp_dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let repo = temp_dir.path().join("repo");
        std::fs::create_dir_all(repo.join(".git")).unwrap();
        std::fs::write(repo.join("compose.yaml"), COMPOSE).unwrap();
        Self { temp_dir }
    }

    fn repo(&self) -> PathBuf {
        self.temp_dir.path().join("repo")
    }

    fn state(&self) -> PathBuf {
        self.temp_dir.path().join("state")
    }

    fn paas(&self) -> Command {
        let mut cmd = Command::cargo_bin("paas").unwrap();
        cmd.current_dir(self.repo())
            .env("HOME", self.temp_dir.path())
            .env("PAAS_STATE_ROOT", self.state())
            .env("SI_VAULT_TRUST_STORE", self.temp_dir.path().join("trust.json"))
            .env("PAAS_CODEX_PROFILES_ROOT", self.temp_dir.path().join("profiles"))
            .env_remove("SI_VAULT_FILE")
            .env_remove("PAAS_TELEGRAM_API_BASE")
            .env_remove("PAAS_AGENT_OFFLINE_FAKE_CODEX")
            .env_remove("RUST_LOG");
        cmd
    }

    fn json(&self, args: &[&str]) -> Value {
        let output = self.paas().args(args).arg("--json").output().unwrap();
        serde_json::from_slice(&output.stdout).unwrap()
    }

    fn add_target(&self, name: &str) {
        self.paas()
            .args(["target", "add", "--name", name, "--host", "10.0.0.4", "--user", "root"])
            .assert()
            .success();
    }
}

fn read_json(path: &Path) -> Value {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

#[test]
fn test_help_lists_command_groups() {
    let ws = Workspace::new();
    ws.paas()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("deploy"))
        .stdout(predicate::str::contains("incident"))
        .stdout(predicate::str::contains("alert"));
}

#[test]
fn test_context_init_and_show() {
    let ws = Workspace::new();
    ws.paas()
        .args(["context", "init", "staging"])
        .assert()
        .success()
        .stdout(predicate::str::contains("paas context init"));
    assert!(ws.state().join("contexts/staging").is_dir());

    let shown = ws.json(&["context", "show"]);
    assert_eq!(shown["ok"], true);
    assert_eq!(shown["context"], "staging");

    let listed = ws.json(&["context", "list"]);
    assert_eq!(listed["command"], "context list");
}

#[test]
fn test_first_target_becomes_current() {
    let ws = Workspace::new();
    ws.add_target("edge-a");
    ws.add_target("edge-b");

    let listed = ws.json(&["target", "list"]);
    assert_eq!(listed["ok"], true);
    assert_eq!(listed["data"]["current_target"], "edge-a");
    assert_eq!(listed["data"]["targets"].as_array().unwrap().len(), 2);
}

#[test]
fn test_secret_key_uses_current_target() {
    let ws = Workspace::new();
    ws.add_target("edge-a");

    let key = ws.json(&["secret", "key", "--app", "billing-api", "--name", "db-url"]);
    assert_eq!(
        key["fields"]["key"],
        "PAAS__CTX_DEFAULT__NS_DEFAULT__APP_BILLING_API__TARGET_EDGE_A__VAR_DB_URL"
    );

    let key = ws.json(&[
        "secret",
        "key",
        "--app",
        "billing-api",
        "--name",
        "db-url",
        "--target",
        "edge-b",
        "--no-namespace",
    ]);
    assert_eq!(
        key["fields"]["key"],
        "PAAS__CTX_DEFAULT__APP_BILLING_API__TARGET_EDGE_B__VAR_DB_URL"
    );
}

#[test]
fn test_deploy_writes_bundle() {
    let ws = Workspace::new();
    ws.add_target("edge-a");

    let output = ws
        .paas()
        .args(["deploy", "--app", "billing-api", "--allow-untrusted-vault", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let body: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(body["ok"], true);
    assert_eq!(body["command"], "deploy");
    assert_eq!(body["fields"]["result"], "bundled");
    assert_eq!(body["fields"]["targets"], "edge-a");

    let bundle_dir = PathBuf::from(body["fields"]["bundle_dir"].as_str().unwrap());
    assert!(bundle_dir.join("compose.yaml").is_file());
    let metadata = read_json(&bundle_dir.join("metadata.json"));
    assert_eq!(metadata["app"], "billing-api");
    assert_eq!(metadata["release_id"], body["fields"]["release_id"]);

    let events = ws.json(&["events", "list", "--source", "deploy"]);
    assert!(events["fields"]["count"].as_str().unwrap() != "0");
}

#[test]
fn test_deploy_without_trust_is_blocked() {
    let ws = Workspace::new();
    ws.add_target("edge-a");

    let output = ws
        .paas()
        .args(["deploy", "--app", "billing-api", "--json"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(3));
    let body: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(body["ok"], false);
    assert_eq!(body["error"]["kind"], "UntrustedVault");
    assert!(!ws.state().join("contexts/default/releases").exists());
}

#[test]
fn test_deploy_requires_app() {
    let ws = Workspace::new();
    ws.paas()
        .arg("deploy")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("--app is required"));
}

#[test]
fn test_alert_test_without_telegram_config_fails() {
    let ws = Workspace::new();

    let output = ws
        .paas()
        .args(["alert", "test", "--severity", "warning", "--message", "m", "--json"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    let body: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(body["ok"], false);
    assert_eq!(body["error"]["kind"], "NotifierError");

    let history = ws.json(&["alert", "history"]);
    let rows = history["data"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["status"], "failed");
    assert!(rows[0]["guidance"].as_str().unwrap().contains("Telegram"));
}

#[test]
fn test_alert_info_is_logged_by_default() {
    let ws = Workspace::new();
    let body = ws.json(&["alert", "test", "--severity", "info"]);
    assert_eq!(body["ok"], true);
    assert_eq!(body["fields"]["channel"], "log");
    assert_eq!(body["fields"]["status"], "logged");
}

#[test]
fn test_alert_policy_set_and_show() {
    let ws = Workspace::new();
    let set = ws.json(&["alert", "policy", "set", "--warning", "off"]);
    assert_eq!(set["fields"]["warning"], "disabled");

    let shown = ws.json(&["alert", "policy", "show"]);
    assert_eq!(shown["fields"]["warning"], "disabled");
    assert_eq!(shown["fields"]["critical"], "telegram");

    ws.paas()
        .args(["alert", "policy", "set", "--info", "pager"])
        .assert()
        .code(1);
}

#[test]
fn test_setup_telegram_never_echoes_token() {
    let ws = Workspace::new();
    ws.paas()
        .args(["alert", "setup-telegram", "--bot-token", "123:secret-token", "--chat-id", "42"])
        .assert()
        .success()
        .stdout(predicate::str::contains("secret-token").not());
    assert!(ws.state().join("contexts/default/alerts").is_dir());
}

#[test]
fn test_agent_run_once_with_empty_queue() {
    let ws = Workspace::new();
    let profile = ws.temp_dir.path().join("profiles/ops");
    std::fs::create_dir_all(&profile).unwrap();
    std::fs::write(profile.join("auth.json"), "{\"token\":\"x\"}").unwrap();

    ws.paas()
        .args(["agent", "enable", "--name", "ops-agent"])
        .assert()
        .success();

    let run = ws.json(&["agent", "run-once", "--name", "ops-agent"]);
    assert_eq!(run["ok"], true);
    assert_eq!(run["fields"]["status"], "noop");

    let logs = ws.json(&["agent", "logs", "--name", "ops-agent"]);
    assert_eq!(logs["fields"]["count"], "1");
}

#[test]
fn test_failed_command_is_audited() {
    let ws = Workspace::new();
    ws.paas()
        .args(["target", "use", "--name", "ghost"])
        .assert()
        .failure();

    let events = ws.json(&["events", "list", "--source", "audit"]);
    let rows = events["data"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["command"], "target use");
    assert_eq!(rows[0]["status"], "failed");
}
