use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::{DeployError, Result};
use crate::notify::ProviderKind;

const DEFAULT_REPOSITORY_BASE: &str = "https://github.com";
const DEFAULT_TELEGRAM_API_BASE: &str = "https://api.telegram.org";
const DEFAULT_SENDMAIL: &str = "/usr/sbin/sendmail";

const DEFAULT_BODY_TEMPLATE: &str = "<p>GitDeploy for {currentSite}</p>\
<p><strong>{pusherName}</strong> pushed to \
<a href='{repoUrl}' title='{repoUrl}'>{repoUrl}</a></p>\
<p><strong>Commits</strong></p>{commitsHtml}\
<p><strong>Git output</strong></p><pre>{gitOutput}</pre>";

const DEFAULT_COMMIT_LINE_TEMPLATE: &str = "<li>{commitMessage} \
<small>(added: {commitAdded}, modified: {commitModified}, removed: {commitRemoved})</small> \
<a href='{commitUrl}' title='View commit'>View commit</a></li>";

/// Deploy trigger settings, snapshotted once per request
#[derive(Debug, Deserialize, Clone)]
pub struct DeployConfig {
    #[serde(default)]
    pub secret: String,
    #[serde(default = "default_true")]
    pub check_secret: bool,
    #[serde(default = "default_true")]
    pub check_content_type: bool,
    pub repo: String,
    pub branch: String,
    #[serde(default = "default_remote")]
    pub remote: String,
    #[serde(default = "default_git")]
    pub git: String,
    #[serde(default)]
    pub cd: bool,
    #[serde(default)]
    pub cd_path: String,
    #[serde(default)]
    pub git_reset: bool,
    #[serde(default)]
    pub send_notifications: bool,
    /// Site identity shown in notifications
    pub site_url: Option<String>,
    #[serde(default = "default_repository_base")]
    pub repository_base: String,
    #[serde(default = "default_notification_timeout")]
    pub notification_timeout_secs: u64,
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
    #[serde(default)]
    pub notifications: NotificationSettings,
    #[serde(default)]
    pub mail: MailSettings,
    #[serde(default)]
    pub messages: MessageTemplates,
}

#[derive(Debug, Deserialize, Clone)]
pub struct NotificationSettings {
    #[serde(default)]
    pub providers: Vec<ProviderKind>,
    pub glip_webhook: Option<String>,
    pub slack_webhook: Option<String>,
    pub slack_username: Option<String>,
    pub mattermost_webhook: Option<String>,
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    #[serde(default = "default_telegram_api_base")]
    pub telegram_api_base: String,
    pub recipient: Option<String>,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            glip_webhook: None,
            slack_webhook: None,
            slack_username: None,
            mattermost_webhook: None,
            telegram_bot_token: None,
            telegram_chat_id: None,
            telegram_api_base: default_telegram_api_base(),
            recipient: None,
        }
    }
}

/// System mail identity used for the email provider
#[derive(Debug, Deserialize, Clone)]
pub struct MailSettings {
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub from_name: String,
    #[serde(default)]
    pub reply_to: String,
    #[serde(default = "default_sendmail")]
    pub sendmail: String,
}

impl Default for MailSettings {
    fn default() -> Self {
        Self {
            from: String::new(),
            from_name: String::new(),
            reply_to: String::new(),
            sendmail: default_sendmail(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MessageTemplates {
    #[serde(default = "default_body_template")]
    pub body: String,
    #[serde(default = "default_commit_line_template")]
    pub commit_line: String,
}

impl Default for MessageTemplates {
    fn default() -> Self {
        Self {
            body: default_body_template(),
            commit_line: default_commit_line_template(),
        }
    }
}

impl DeployConfig {
    /// Returns true if incoming requests must carry a valid signature.
    pub fn needs_signature(&self) -> bool {
        self.check_secret && !self.secret.is_empty()
    }

    /// Full repository URL a push event must report to match.
    pub fn repository_url(&self) -> String {
        format!("{}/{}", self.repository_base.trim_end_matches('/'), self.repo)
    }

    pub fn notification_timeout(&self) -> Duration {
        Duration::from_secs(self.notification_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// Rejects configurations that would only fail later, at request time.
    pub fn validate(&self) -> Result<()> {
        if self.repo.trim().is_empty() {
            return Err(DeployError::ConfigError("'repo' must not be empty".into()));
        }
        if self.branch.trim().is_empty() {
            return Err(DeployError::ConfigError("'branch' must not be empty".into()));
        }

        let n = &self.notifications;
        for kind in &n.providers {
            let missing = match kind {
                ProviderKind::Glip => is_blank(&n.glip_webhook).then_some("glip_webhook"),
                ProviderKind::Slack => is_blank(&n.slack_webhook).then_some("slack_webhook"),
                ProviderKind::Mattermost => {
                    is_blank(&n.mattermost_webhook).then_some("mattermost_webhook")
                }
                ProviderKind::Telegram => {
                    if is_blank(&n.telegram_bot_token) {
                        Some("telegram_bot_token")
                    } else {
                        is_blank(&n.telegram_chat_id).then_some("telegram_chat_id")
                    }
                }
                ProviderKind::Email => None,
            };
            if let Some(field) = missing {
                return Err(DeployError::ConfigError(format!(
                    "provider '{}' is enabled but '{}' is not set",
                    kind, field
                )));
            }
        }
        Ok(())
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().is_none_or(|v| v.trim().is_empty())
}

/// Parse and validate a configuration document
pub fn parse_config(source: &str) -> Result<DeployConfig> {
    let config: DeployConfig = toml::from_str(source)?;
    config.validate()?;
    Ok(config)
}

/// Load and parse the configuration file
pub fn load_config(path: &Path) -> Result<DeployConfig> {
    let source = std::fs::read_to_string(path).map_err(|e| {
        DeployError::ConfigError(format!("Failed to read config file '{}': {}", path.display(), e))
    })?;
    parse_config(&source)
}

/// Re-read the configuration file without blocking the runtime
pub async fn reload_config(path: &Path) -> Result<DeployConfig> {
    let source = tokio::fs::read_to_string(path).await.map_err(|e| {
        DeployError::ConfigError(format!("Failed to read config file '{}': {}", path.display(), e))
    })?;
    parse_config(&source)
}

fn default_true() -> bool {
    true
}

fn default_remote() -> String {
    "origin".to_string()
}

fn default_git() -> String {
    "git".to_string()
}

fn default_repository_base() -> String {
    DEFAULT_REPOSITORY_BASE.to_string()
}

fn default_telegram_api_base() -> String {
    DEFAULT_TELEGRAM_API_BASE.to_string()
}

fn default_sendmail() -> String {
    DEFAULT_SENDMAIL.to_string()
}

fn default_notification_timeout() -> u64 {
    10
}

fn default_command_timeout() -> u64 {
    300
}

fn default_body_template() -> String {
    DEFAULT_BODY_TEMPLATE.to_string()
}

fn default_commit_line_template() -> String {
    DEFAULT_COMMIT_LINE_TEMPLATE.to_string()
}
