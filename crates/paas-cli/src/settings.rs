//! Process environment, read once at startup and passed down explicitly

use std::env;
use std::path::PathBuf;

use paas_agent::{OFFLINE_FAKE_CODEX_CMD_ENV, OFFLINE_FAKE_CODEX_ENV, PROFILES_ROOT_ENV};
use paas_alert::API_BASE_ENV;
use paas_core::layout::STATE_ROOT_ENV;
use paas_deploy::{SCP_BIN_ENV, SSH_BIN_ENV};
use paas_vault::{TRUST_STORE_ENV, VAULT_FILE_ENV};

#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub state_root: Option<String>,
    pub ssh_bin: Option<PathBuf>,
    pub scp_bin: Option<PathBuf>,
    pub vault_file: Option<PathBuf>,
    pub trust_store: Option<PathBuf>,
    pub fake_codex: Option<String>,
    pub fake_codex_cmd: Option<String>,
    pub profiles_root: Option<PathBuf>,
    pub telegram_api_base: Option<String>,
}

fn var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Settings {
    pub fn from_env() -> Self {
        Self {
            state_root: var(STATE_ROOT_ENV),
            ssh_bin: var(SSH_BIN_ENV).map(PathBuf::from),
            scp_bin: var(SCP_BIN_ENV).map(PathBuf::from),
            vault_file: var(VAULT_FILE_ENV).map(PathBuf::from),
            trust_store: var(TRUST_STORE_ENV).map(PathBuf::from),
            fake_codex: var(OFFLINE_FAKE_CODEX_ENV),
            fake_codex_cmd: var(OFFLINE_FAKE_CODEX_CMD_ENV),
            profiles_root: var(PROFILES_ROOT_ENV).map(PathBuf::from),
            telegram_api_base: var(API_BASE_ENV),
        }
    }

    /// `KEY=VALUE` pairs handed to runtime env materialization
    pub fn process_env() -> Vec<String> {
        env::vars().map(|(k, v)| format!("{}={}", k, v)).collect()
    }
}
