//! Notification templates and the message data they are filled with

use serde_json::Value;

use crate::config::DeployConfig;
use crate::error::DeployError;
use crate::payload::PushEvent;

/// Key naming the site a notification is about
pub const CURRENT_SITE_KEY: &str = "currentSite";

/// Fills `{currentSite}` in the body when no site is configured
const UNNAMED_SITE: &str = "your site";

/// A template with `{name}` placeholders plus the values to put in them
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationMessage {
    template: String,
    data: Vec<(String, String)>,
}

impl NotificationMessage {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            data: Vec::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.push((key.into(), value.into()));
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.data
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Substitutes every `{key}` in insertion order, one key at a time.
    ///
    /// Values are not re-scanned for their own placeholders, except that a
    /// value containing `{laterKey}` will be substituted when `laterKey`'s turn
    /// comes. Message data is trusted, so this is left as is.
    pub fn render(&self) -> String {
        self.data
            .iter()
            .fold(self.template.clone(), |message, (key, value)| {
                message.replace(&format!("{{{}}}", key), value)
            })
    }
}

pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#039;")
}

/// Inserts `<br />` before every line break.
pub fn nl2br(s: &str) -> String {
    s.replace("\r\n", "\n").replace('\n', "<br />\n")
}

/// Summary sent after a successful deploy.
pub fn push_summary(event: &PushEvent, config: &DeployConfig, output: &str) -> NotificationMessage {
    let mut commits_html = String::from("<ul>");
    for commit in &event.commits {
        let line = NotificationMessage::new(config.messages.commit_line.as_str())
            .with("commitMessage", html_escape(&commit.message))
            .with("commitAdded", commit.added.len().to_string())
            .with("commitModified", commit.modified.len().to_string())
            .with("commitRemoved", commit.removed.len().to_string())
            .with("commitUrl", html_escape(&commit.url))
            .render();
        commits_html.push_str(&line);
    }
    commits_html.push_str("</ul>");

    summary_for_site(config)
        .with("pusherName", html_escape(&event.pusher.name))
        .with("repoUrl", html_escape(&event.repository.url))
        .with("commitsHtml", commits_html)
        .with("gitOutput", nl2br(&html_escape(output)))
}

/// Diagnostic sent when the host checks the webhook.
pub fn ping_message(payload: &Value) -> NotificationMessage {
    let pretty = serde_json::to_string_pretty(payload).unwrap_or_else(|_| payload.to_string());
    NotificationMessage::new(format!(
        "Github Ping: <pre>{}</pre>",
        nl2br(&html_escape(&pretty))
    ))
}

/// Report of a push that could not be deployed.
pub fn failure_message(error: &DeployError) -> NotificationMessage {
    NotificationMessage::new(format!(
        "<p><strong>GitDeploy failed</strong></p><pre>{}</pre>",
        nl2br(&html_escape(&error.to_string()))
    ))
}

/// Body template with the site filled in. Only a configured site becomes
/// message data, so the subject and Glip activity stay generic without one.
fn summary_for_site(config: &DeployConfig) -> NotificationMessage {
    let body = config.messages.body.as_str();
    match config.site_url.as_deref().filter(|s| !s.is_empty()) {
        Some(site) => NotificationMessage::new(body).with(CURRENT_SITE_KEY, site),
        None => {
            let placeholder = format!("{{{}}}", CURRENT_SITE_KEY);
            NotificationMessage::new(body.replace(&placeholder, UNNAMED_SITE))
        }
    }
}
