//! Telegram notifier
//!
//! The bot config lives at `alerts/telegram.json`. Messages are sent with one
//! `sendMessage` POST bounded by the notifier timeout; there is no retry here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, instrument};

use paas_core::fsio;
use paas_core::layout::ContextPaths;
use paas_core::{PaasError, Result};

/// Default Bot API base
pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Environment variable overriding the Bot API base
pub const API_BASE_ENV: &str = "PAAS_TELEGRAM_API_BASE";

const ERROR_BODY_MAX: usize = 200;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
    pub updated_at: DateTime<Utc>,
}

pub struct TelegramConfigStore {
    path: PathBuf,
}

impl TelegramConfigStore {
    pub fn new(ctx: &ContextPaths) -> Self {
        Self {
            path: ctx.telegram_config_file(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn save(&self, bot_token: &str, chat_id: &str) -> Result<TelegramConfig> {
        let bot_token = bot_token.trim();
        let chat_id = chat_id.trim();
        if bot_token.is_empty() {
            return Err(PaasError::usage("--bot-token is required"));
        }
        if chat_id.is_empty() {
            return Err(PaasError::usage("--chat-id is required"));
        }
        let config = TelegramConfig {
            bot_token: bot_token.to_string(),
            chat_id: chat_id.to_string(),
            updated_at: Utc::now(),
        };
        fsio::write_json_pretty(&self.path, &config).await?;
        Ok(config)
    }

    /// Saved config; missing or incomplete config is a notifier error
    pub async fn load(&self) -> Result<TelegramConfig> {
        let config: Option<TelegramConfig> = fsio::read_json(&self.path).await.map_err(|e| {
            PaasError::Notifier(format!("invalid telegram config {}: {}", self.path.display(), e))
        })?;
        match config {
            Some(c) if !c.bot_token.trim().is_empty() && !c.chat_id.trim().is_empty() => Ok(c),
            Some(_) => Err(PaasError::Notifier(format!(
                "telegram config {} is incomplete",
                self.path.display()
            ))),
            None => Err(PaasError::Notifier(format!(
                "telegram notifier is not configured ({} not found)",
                self.path.display()
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TelegramNotifier {
    client: reqwest::Client,
    api_base: String,
    timeout: Duration,
}

impl TelegramNotifier {
    pub fn new(api_base: impl Into<String>, timeout: Duration) -> Self {
        let api_base = api_base.into();
        let api_base = match api_base.trim().trim_end_matches('/') {
            "" => DEFAULT_API_BASE.to_string(),
            base => base.to_string(),
        };
        Self {
            client: reqwest::Client::new(),
            api_base,
            timeout,
        }
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    /// POST `{chat_id, text, parse_mode}` to `sendMessage`
    ///
    /// Errors never include the request URL, which carries the bot token.
    #[instrument(skip(self, config, text), fields(chat_id = %config.chat_id))]
    pub async fn send(&self, config: &TelegramConfig, text: &str) -> Result<()> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, config.bot_token.trim());
        let body = json!({
            "chat_id": config.chat_id.trim(),
            "text": text,
            "parse_mode": "Markdown",
        });

        let response = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PaasError::Timeout {
                        operation: "telegram sendMessage".to_string(),
                        after: self.timeout,
                    }
                } else {
                    PaasError::Notifier(format!("telegram sendMessage failed: {}", e.without_url()))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let snippet: String = text.trim().chars().take(ERROR_BODY_MAX).collect();
            return Err(PaasError::Notifier(format!(
                "telegram sendMessage returned {}: {}",
                status, snippet
            )));
        }
        debug!("Telegram message delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paas_core::StateRoot;
    use tempfile::TempDir;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config() -> TelegramConfig {
        TelegramConfig {
            bot_token: "123:abc".into(),
            chat_id: "-100".into(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_send_posts_markdown_message() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bot123:abc/sendMessage"))
            .and(body_partial_json(json!({
                "chat_id": "-100",
                "text": "hello",
                "parse_mode": "Markdown"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&mock_server)
            .await;

        let notifier = TelegramNotifier::new(mock_server.uri(), Duration::from_secs(5));
        notifier.send(&config(), "hello").await.unwrap();
    }

    #[tokio::test]
    async fn test_send_rejected_is_notifier_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("Unauthorized"))
            .mount(&mock_server)
            .await;

        let notifier = TelegramNotifier::new(format!("{}/", mock_server.uri()), Duration::from_secs(5));
        let err = notifier.send(&config(), "hello").await.unwrap_err();
        assert_eq!(err.kind(), paas_core::ErrorKind::NotifierError);
        assert!(err.to_string().contains("401"));
        assert!(!err.to_string().contains("123:abc"));
    }

    #[tokio::test]
    async fn test_config_store() {
        let temp_dir = TempDir::new().unwrap();
        let ctx = StateRoot::new(temp_dir.path()).context("default").unwrap();
        let store = TelegramConfigStore::new(&ctx);

        let err = store.load().await.unwrap_err();
        assert_eq!(err.kind(), paas_core::ErrorKind::NotifierError);
        assert!(store.save(" ", "1").await.is_err());

        store.save(" tok ", "42").await.unwrap();
        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.bot_token, "tok");
        assert_eq!(loaded.chat_id, "42");
    }
}
