//! Inbound webhook request, content negotiation and event payloads

use axum::http::{HeaderMap, header::CONTENT_TYPE};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::error::{DeployError, Result};
use crate::signature::SIGNATURE_HEADER;

/// Header naming the event type
pub const EVENT_HEADER: &str = "X-GitHub-Event";

const JSON_CONTENT_TYPE: &str = "application/json";
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
const BRANCH_REF_PREFIX: &str = "refs/heads/";

/// One inbound webhook call, captured once and never mutated
#[derive(Debug, Clone)]
pub struct WebhookRequest {
    pub body: Vec<u8>,
    pub content_type: Option<String>,
    pub event: Option<String>,
    pub signature: Option<String>,
    pub activated: bool,
}

impl WebhookRequest {
    pub fn from_parts(headers: &HeaderMap, body: Vec<u8>, activated: bool) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };

        Self {
            body,
            content_type: headers
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            event: header(EVENT_HEADER),
            signature: header(SIGNATURE_HEADER),
            activated,
        }
    }
}

/// Event types the router knows about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Ping,
    Push,
    Other(String),
}

impl EventKind {
    pub fn parse(event: &str) -> Self {
        match event.to_lowercase().as_str() {
            "ping" => EventKind::Ping,
            "push" => EventKind::Push,
            _ => EventKind::Other(event.to_string()),
        }
    }
}

/// Checks the required headers and returns the event type.
///
/// When `check_content_type` is off, a missing content type falls back to JSON.
pub fn require_headers(request: &WebhookRequest, check_content_type: bool) -> Result<EventKind> {
    let has_content_type = request
        .content_type
        .as_deref()
        .is_some_and(|ct| !ct.trim().is_empty());
    if check_content_type && !has_content_type {
        return Err(DeployError::MissingContentType);
    }

    let event = request
        .event
        .as_deref()
        .filter(|e| !e.trim().is_empty())
        .ok_or(DeployError::MissingEventType)?;

    Ok(EventKind::parse(event.trim()))
}

/// Extracts and parses the JSON payload according to the content type.
pub fn decode_payload(request: &WebhookRequest) -> Result<Value> {
    let content_type = request
        .content_type
        .as_deref()
        .filter(|ct| !ct.trim().is_empty())
        .unwrap_or(JSON_CONTENT_TYPE);
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    let raw = match essence.as_str() {
        JSON_CONTENT_TYPE => std::borrow::Cow::Borrowed(request.body.as_slice()),
        FORM_CONTENT_TYPE => {
            let field = url::form_urlencoded::parse(&request.body)
                .find(|(key, _)| key == "payload")
                .map(|(_, value)| value.into_owned())
                .ok_or_else(|| {
                    DeployError::MalformedPayload("form field 'payload' is missing".to_string())
                })?;
            std::borrow::Cow::Owned(field.into_bytes())
        }
        _ => return Err(DeployError::UnsupportedContentType(content_type.to_string())),
    };

    let payload = serde_json::from_slice(&raw)
        .map_err(|e| DeployError::MalformedPayload(e.to_string()))?;
    debug!("{:#?}", &payload);
    Ok(payload)
}

#[derive(Debug, Clone, Deserialize)]
pub struct Repository {
    pub url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Pusher {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Commit {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub added: Vec<String>,
    #[serde(default)]
    pub modified: Vec<String>,
    #[serde(default)]
    pub removed: Vec<String>,
    #[serde(default)]
    pub url: String,
}

/// Push notification from the source-code host
#[derive(Debug, Clone, Deserialize)]
pub struct PushEvent {
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub repository: Repository,
    #[serde(default)]
    pub pusher: Pusher,
    #[serde(default)]
    pub commits: Vec<Commit>,
}

impl PushEvent {
    pub fn from_value(payload: &Value) -> Result<Self> {
        PushEvent::deserialize(payload).map_err(|e| DeployError::MalformedPayload(e.to_string()))
    }

    /// Branch name with the `refs/heads/` prefix removed
    pub fn branch(&self) -> &str {
        self.git_ref
            .strip_prefix(BRANCH_REF_PREFIX)
            .unwrap_or(&self.git_ref)
    }
}
