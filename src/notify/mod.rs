//! Notification fan-out to the configured providers
//!
//! Every provider is sent to on its own task with its own timeout, so one
//! slow or broken endpoint never stops the others. Failures are logged and
//! reported back, never raised.

pub mod mail;
pub mod message;

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::{DeployConfig, MailSettings};
use crate::error::{DeployError, Result};
use crate::markup;
use mail::{MailTransport, OutgoingMail};
pub use message::NotificationMessage;
use message::CURRENT_SITE_KEY;

const GLIP_TITLE: &str = "Github Webhook Endpoint";
const TELEGRAM_PARSE_MODE: &str = "MarkdownV2";
const DEFAULT_SUBJECT: &str = "GitDeploy for your site";

/// Provider identifiers as they appear in the configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Glip,
    Slack,
    Mattermost,
    Telegram,
    Email,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProviderKind::Glip => "glip",
            ProviderKind::Slack => "slack",
            ProviderKind::Mattermost => "mattermost",
            ProviderKind::Telegram => "telegram",
            ProviderKind::Email => "email",
        };
        f.write_str(name)
    }
}

/// A configured notification channel
#[derive(Debug, Clone)]
pub enum Provider {
    /// Markdown chat webhook
    Glip { webhook: String },
    /// JSON chat webhook with a username
    Slack { webhook: String, username: String },
    /// JSON chat webhook, text only
    Mattermost { webhook: String },
    /// Bot API `sendMessage`
    Telegram {
        api_base: String,
        bot_token: String,
        chat_id: String,
    },
    Email {
        recipient: Option<String>,
        mail: MailSettings,
    },
}

impl Provider {
    pub fn kind(&self) -> ProviderKind {
        match self {
            Provider::Glip { .. } => ProviderKind::Glip,
            Provider::Slack { .. } => ProviderKind::Slack,
            Provider::Mattermost { .. } => ProviderKind::Mattermost,
            Provider::Telegram { .. } => ProviderKind::Telegram,
            Provider::Email { .. } => ProviderKind::Email,
        }
    }

    /// Enabled providers in configured order, each listed once.
    pub fn from_config(config: &DeployConfig) -> Vec<Provider> {
        let n = &config.notifications;
        let mut kinds: Vec<ProviderKind> = Vec::new();
        for kind in &n.providers {
            if !kinds.contains(kind) {
                kinds.push(*kind);
            }
        }

        kinds
            .into_iter()
            .map(|kind| match kind {
                ProviderKind::Glip => Provider::Glip {
                    webhook: n.glip_webhook.clone().unwrap_or_default(),
                },
                ProviderKind::Slack => Provider::Slack {
                    webhook: n.slack_webhook.clone().unwrap_or_default(),
                    username: n.slack_username.clone().unwrap_or_default(),
                },
                ProviderKind::Mattermost => Provider::Mattermost {
                    webhook: n.mattermost_webhook.clone().unwrap_or_default(),
                },
                ProviderKind::Telegram => Provider::Telegram {
                    api_base: n.telegram_api_base.clone(),
                    bot_token: n.telegram_bot_token.clone().unwrap_or_default(),
                    chat_id: n.telegram_chat_id.clone().unwrap_or_default(),
                },
                ProviderKind::Email => Provider::Email {
                    recipient: n.recipient.clone().filter(|r| !r.trim().is_empty()),
                    mail: config.mail.clone(),
                },
            })
            .collect()
    }
}

/// What happened to one provider's delivery
#[derive(Debug)]
pub enum DeliveryOutcome {
    Delivered,
    Skipped(&'static str),
    Failed(DeployError),
}

#[derive(Debug)]
pub struct DeliveryReport {
    pub provider: ProviderKind,
    pub outcome: DeliveryOutcome,
}

/// The rendered message shared by every provider task
#[derive(Debug)]
struct Rendered {
    html: String,
    site: Option<String>,
}

impl Rendered {
    fn title(&self) -> String {
        match &self.site {
            Some(site) => format!("GitDeploy for {}", site),
            None => DEFAULT_SUBJECT.to_string(),
        }
    }
}

/// Sends notifications to every configured provider
#[derive(Clone)]
pub struct Notifier {
    client: reqwest::Client,
    mailer: Arc<dyn MailTransport>,
}

impl Notifier {
    pub fn new(client: reqwest::Client, mailer: Arc<dyn MailTransport>) -> Self {
        Self { client, mailer }
    }

    /// Renders `message` and delivers it to the providers enabled in `config`.
    pub async fn notify(
        &self,
        message: &NotificationMessage,
        config: &DeployConfig,
    ) -> Vec<DeliveryReport> {
        let providers = Provider::from_config(config);
        self.dispatch(message, &providers, config.notification_timeout())
            .await
    }

    /// Best-effort fan-out. Returns one report per provider, in order.
    pub async fn dispatch(
        &self,
        message: &NotificationMessage,
        providers: &[Provider],
        timeout: Duration,
    ) -> Vec<DeliveryReport> {
        if providers.is_empty() {
            return Vec::new();
        }

        let rendered = Arc::new(Rendered {
            html: message.render(),
            site: message.get(CURRENT_SITE_KEY).map(str::to_string),
        });

        let handles: Vec<_> = providers
            .iter()
            .cloned()
            .map(|provider| {
                let kind = provider.kind();
                let client = self.client.clone();
                let mailer = self.mailer.clone();
                let rendered = rendered.clone();
                let handle = tokio::spawn(async move {
                    match tokio::time::timeout(timeout, send(&client, mailer.as_ref(), &provider, &rendered))
                        .await
                    {
                        Ok(outcome) => outcome,
                        Err(_) => Err(DeployError::delivery(
                            kind.to_string(),
                            format!("timed out after {:?}", timeout),
                        )),
                    }
                });
                (kind, handle)
            })
            .collect();

        let mut reports = Vec::with_capacity(handles.len());
        for (kind, handle) in handles {
            let outcome = match handle.await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) => DeliveryOutcome::Failed(e),
                Err(e) => DeliveryOutcome::Failed(DeployError::delivery(kind.to_string(), e)),
            };

            match &outcome {
                DeliveryOutcome::Delivered => info!(provider = %kind, "Notification delivered"),
                DeliveryOutcome::Skipped(reason) => {
                    info!(provider = %kind, "Notification skipped: {}", reason)
                }
                DeliveryOutcome::Failed(e) => warn!(provider = %kind, "Notification failed: {}", e),
            }
            reports.push(DeliveryReport {
                provider: kind,
                outcome,
            });
        }
        reports
    }
}

async fn send(
    client: &reqwest::Client,
    mailer: &dyn MailTransport,
    provider: &Provider,
    rendered: &Rendered,
) -> Result<DeliveryOutcome> {
    let kind = provider.kind();
    let request = match provider {
        Provider::Glip { webhook } => {
            let mut form = vec![
                ("body", markup::to_markdown(&rendered.html)),
                ("title", GLIP_TITLE.to_string()),
            ];
            if rendered.site.is_some() {
                form.push(("activity", rendered.title()));
            }
            client.post(webhook).form(&form)
        }
        // Slack and Mattermost render markdown, not HTML, so they get the
        // transcoded text rather than the raw message.
        Provider::Slack { webhook, username } => {
            let payload = json!({
                "username": username,
                "text": markup::to_markdown(&rendered.html),
            });
            client.post(webhook).form(&[("payload", payload.to_string())])
        }
        Provider::Mattermost { webhook } => {
            let payload = json!({ "text": markup::to_markdown(&rendered.html) });
            client.post(webhook).form(&[("payload", payload.to_string())])
        }
        Provider::Telegram {
            api_base,
            bot_token,
            chat_id,
        } => {
            let url = format!(
                "{}/bot{}/sendMessage",
                api_base.trim_end_matches('/'),
                bot_token
            );
            client.post(url).form(&[
                ("chat_id", chat_id.clone()),
                ("parse_mode", TELEGRAM_PARSE_MODE.to_string()),
                ("disable_web_page_preview", "true".to_string()),
                ("text", markup::to_strict_markdown(&rendered.html)),
            ])
        }
        Provider::Email { recipient, mail } => {
            let Some(to) = recipient else {
                return Ok(DeliveryOutcome::Skipped("no recipient configured"));
            };
            let reply_to = if mail.reply_to.is_empty() {
                mail.from.clone()
            } else {
                mail.reply_to.clone()
            };
            mailer
                .send(&OutgoingMail {
                    from: mail.from.clone(),
                    from_name: mail.from_name.clone(),
                    reply_to,
                    to: to.clone(),
                    subject: rendered.title(),
                    html_body: rendered.html.clone(),
                })
                .await?;
            return Ok(DeliveryOutcome::Delivered);
        }
    };

    // Never log the request URL: the bot token is part of it.
    let response = request
        .send()
        .await
        .map_err(|e| DeployError::delivery(kind.to_string(), e.without_url()))?;
    response
        .error_for_status()
        .map_err(|e| DeployError::delivery(kind.to_string(), e.without_url()))?;
    Ok(DeliveryOutcome::Delivered)
}
