//! Outgoing mail for the email provider

use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::error::{DeployError, Result};

/// A ready-to-send HTML email
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub from: String,
    pub from_name: String,
    pub reply_to: String,
    pub to: String,
    pub subject: String,
    pub html_body: String,
}

impl OutgoingMail {
    /// RFC 5322 message text. Header values are flattened to one line.
    pub fn to_message(&self) -> String {
        let mut message = String::new();
        if !self.from.is_empty() {
            message.push_str(&format!("From: {}\r\n", mailbox(&self.from_name, &self.from)));
        }
        if !self.reply_to.is_empty() {
            message.push_str(&format!(
                "Reply-To: {}\r\n",
                mailbox(&self.from_name, &self.reply_to)
            ));
        }
        message.push_str(&format!("To: {}\r\n", header_value(&self.to)));
        message.push_str(&format!("Subject: {}\r\n", header_value(&self.subject)));
        message.push_str("MIME-Version: 1.0\r\n");
        message.push_str("Content-Type: text/html; charset=utf-8\r\n");
        message.push_str("\r\n");
        message.push_str(&self.html_body);
        message
    }
}

fn header_value(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}

fn mailbox(name: &str, address: &str) -> String {
    if name.is_empty() {
        header_value(address)
    } else {
        format!(
            "\"{}\" <{}>",
            header_value(name).replace('"', ""),
            header_value(address)
        )
    }
}

/// Delivers mail on behalf of the email provider
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, mail: &OutgoingMail) -> Result<()>;
}

/// Hands messages to the local `sendmail` binary
pub struct SendmailTransport {
    program: String,
}

impl SendmailTransport {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl MailTransport for SendmailTransport {
    async fn send(&self, mail: &OutgoingMail) -> Result<()> {
        debug!("Sending mail to {} via {}", mail.to, self.program);
        let mut child = Command::new(&self.program)
            .arg("-t")
            .arg("-i")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DeployError::delivery("email", format!("{} failed to start: {}", self.program, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(mail.to_message().as_bytes()).await?;
        }

        let output = child.wait_with_output().await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(DeployError::delivery(
                "email",
                format!(
                    "{} exited with {}: {}",
                    self.program,
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ))
        }
    }
}
