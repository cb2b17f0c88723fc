//! Webhook handler for GitHub ping and push events

use axum::{
    body::to_bytes,
    extract::{Query, Request, State as AxumState},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{error, info, warn};

use crate::SharedState;
use crate::config::DeployConfig;
use crate::error::{DeployError, Result};
use crate::notify::message::{failure_message, html_escape, ping_message, push_summary};
use crate::payload::{EventKind, PushEvent, WebhookRequest, decode_payload, require_headers};
use crate::planner;
use crate::run::DeployRun;
use crate::signature::verify_signature;

/// Query parameter that activates the webhook handler
pub const ACTIVATION_PARAM: &str = "github";

/// Largest body accepted from the git host (GitHub caps payloads at 25MB)
const MAX_BODY_BYTES: usize = 25 * 1024 * 1024;

/// Result of handling a push event
#[derive(Debug)]
pub enum PushOutcome {
    /// Repository or branch differs from the configuration; nothing to do
    NoMatchingTarget,
    Deployed(DeployRun),
}

fn is_activated(params: &HashMap<String, String>) -> bool {
    params
        .get(ACTIVATION_PARAM)
        .is_some_and(|v| !v.is_empty() && v != "0")
}

/// Middleware taking over requests carrying `?github=<non-empty>`.
/// Everything else passes through to the router untouched.
pub async fn github_gate(
    AxumState(state): AxumState<SharedState>,
    Query(params): Query<HashMap<String, String>>,
    request: Request,
    next: Next,
) -> Response {
    if !is_activated(&params) {
        return next.run(request).await;
    }

    let (parts, body) = request.into_parts();
    let body = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(e) => {
            return error_response(
                "request body",
                &DeployError::MalformedPayload(e.to_string()),
            );
        }
    };

    let webhook = WebhookRequest::from_parts(&parts.headers, body.to_vec(), true);
    handle_github_event(&state, webhook).await
}

/// Runs the trusted-event pipeline for one activated request.
pub async fn handle_github_event(state: &SharedState, request: WebhookRequest) -> Response {
    let config = state.config_snapshot();

    if config.needs_signature() {
        if let Err(e) = verify_signature(&config.secret, &request.body, request.signature.as_deref())
        {
            return error_response("signature check", &e);
        }
    }

    let event = match require_headers(&request, config.check_content_type) {
        Ok(event) => event,
        Err(e) => return error_response("header check", &e),
    };

    let payload = match decode_payload(&request) {
        Ok(payload) => payload,
        Err(e) => return error_response("payload decoding", &e),
    };

    match event {
        EventKind::Ping => {
            info!("Received ping event");
            state
                .notifier
                .notify(&ping_message(&payload), &config)
                .await;
            StatusCode::OK.into_response()
        }
        EventKind::Push => {
            match handle_push(state, &config, &payload).await {
                Ok(PushOutcome::NoMatchingTarget) => {}
                Ok(PushOutcome::Deployed(run)) => {
                    info!(
                        run_id = %run.id,
                        "Deploy finished in {}ms",
                        run.duration_ms().unwrap_or_default()
                    );
                }
                Err(e) => {
                    // The host gets a normal response; the failure goes to the providers.
                    error!("Push handling failed: {}", e);
                    state
                        .notifier
                        .notify(&failure_message(&e), &config)
                        .await;
                }
            }
            StatusCode::OK.into_response()
        }
        EventKind::Other(name) => {
            info!("Unhandled event '{}'", name);
            (
                StatusCode::NOT_FOUND,
                // a literal backslash and `n`, not a line break
                format!("Event: {} Payload: \\n{}", name, payload),
            )
                .into_response()
        }
    }
}

/// Plans, executes and reports a push event.
pub async fn handle_push(
    state: &SharedState,
    config: &DeployConfig,
    payload: &Value,
) -> Result<PushOutcome> {
    let event = PushEvent::from_value(payload)?;

    let Some(plan) = planner::plan(&event, config) else {
        warn!(
            "No matching target for '{}' branch '{}', skipping.",
            event.repository.url,
            event.branch()
        );
        return Ok(PushOutcome::NoMatchingTarget);
    };

    let mut run = DeployRun::start(&plan.repo, &plan.branch, plan.command_line());
    {
        let _guard = state.target_locks.acquire(&plan.lock_key()).await;
        info!(run_id = %run.id, "Push to '{}' branch '{}'. Running: {}", run.repo, run.branch, run.command);

        match state.executor.execute(&plan).await {
            Ok(output) => run.mark_success(output.output),
            Err(e) => {
                run.mark_failed(e.to_string());
                error!(run_id = %run.id, "Deploy failed: {}", e);
                return Err(e);
            }
        }
    }

    if config.send_notifications {
        let message = push_summary(&event, config, run.output.as_deref().unwrap_or_default());
        state.notifier.notify(&message, config).await;
    }

    Ok(PushOutcome::Deployed(run))
}

fn error_response(stage: &str, err: &DeployError) -> Response {
    error!("Rejected webhook during {}: {}", stage, err);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("Error in {}: {}", stage, html_escape(&err.to_string())),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn activation_requires_non_empty_flag() {
        assert!(is_activated(&params(&[("github", "1")])));
        assert!(is_activated(&params(&[("github", "yes")])));
        assert!(!is_activated(&params(&[("github", "")])));
        assert!(!is_activated(&params(&[("github", "0")])));
        assert!(!is_activated(&params(&[("other", "1")])));
    }
}
