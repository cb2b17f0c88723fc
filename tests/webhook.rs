use async_trait::async_trait;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;
use simple_git_deploy::config::parse_config;
use simple_git_deploy::error::{DeployError, Result};
use simple_git_deploy::executor::{CommandExecutor, CommandOutput};
use simple_git_deploy::notify::Notifier;
use simple_git_deploy::notify::mail::{MailTransport, OutgoingMail};
use simple_git_deploy::planner::DeployPlan;
use simple_git_deploy::{AppState, SharedState, api};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tower::ServiceExt;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SECRET: &str = "It's a Secret to Everybody";

#[derive(Default)]
struct RecordingExecutor {
    commands: Mutex<Vec<String>>,
    fail: bool,
}

#[async_trait]
impl CommandExecutor for RecordingExecutor {
    async fn execute(&self, plan: &DeployPlan) -> Result<CommandOutput> {
        let command = plan.command_line();
        self.commands.lock().unwrap().push(command.clone());
        if self.fail {
            return Err(DeployError::CommandExecutionFailure {
                command,
                status: "exit code 1".into(),
                output: "fatal: refusing to merge unrelated histories".into(),
            });
        }
        Ok(CommandOutput {
            output: "Already up to date.\n".into(),
            exit_code: Some(0),
        })
    }
}

impl RecordingExecutor {
    fn calls(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

#[derive(Default)]
struct RecordingMailer {
    sent: Mutex<Vec<OutgoingMail>>,
}

#[async_trait]
impl MailTransport for RecordingMailer {
    async fn send(&self, mail: &OutgoingMail) -> Result<()> {
        self.sent.lock().unwrap().push(mail.clone());
        Ok(())
    }
}

struct Harness {
    state: SharedState,
    executor: Arc<RecordingExecutor>,
    mailer: Arc<RecordingMailer>,
}

fn harness(config: &str, executor: RecordingExecutor) -> Harness {
    let config = parse_config(config).unwrap();
    let executor = Arc::new(executor);
    let mailer = Arc::new(RecordingMailer::default());
    let state = Arc::new(AppState::new(
        config,
        PathBuf::from("unused.toml"),
        executor.clone(),
        Notifier::new(reqwest::Client::new(), mailer.clone()),
    ));
    Harness {
        state,
        executor,
        mailer,
    }
}

fn base_config(extra: &str) -> String {
    format!(
        "secret = \"{}\"\nrepo = \"acme/site\"\nbranch = \"main\"\n{}",
        SECRET, extra
    )
}

fn sign(body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(SECRET.as_bytes()).unwrap();
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

fn push_payload(branch: &str) -> String {
    json!({
        "ref": format!("refs/heads/{}", branch),
        "repository": { "url": "https://github.com/acme/site" },
        "pusher": { "name": "octocat" },
        "commits": [{
            "message": "Update README",
            "added": [],
            "modified": ["README.md"],
            "removed": [],
            "url": "https://github.com/acme/site/commit/abc123"
        }]
    })
    .to_string()
}

fn webhook(event: &str, content_type: &str, body: String, signed: bool) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/?github=1")
        .header("content-type", content_type)
        .header("X-GitHub-Event", event);
    if signed {
        builder = builder.header("X-Hub-Signature-256", sign(body.as_bytes()));
    }
    builder.body(Body::from(body)).unwrap()
}

async fn send(state: &SharedState, request: Request<Body>) -> (StatusCode, String) {
    let response = api::router(state.clone()).oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8_lossy(&body).into_owned())
}

#[tokio::test]
async fn valid_push_runs_the_deploy() {
    let h = harness(&base_config(""), RecordingExecutor::default());

    let (status, _) = send(
        &h.state,
        webhook("push", "application/json", push_payload("main"), true),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(h.executor.calls(), vec!["git pull origin main 2>&1"]);
}

#[tokio::test]
async fn push_to_other_branch_is_ignored() {
    let h = harness(&base_config(""), RecordingExecutor::default());

    let (status, _) = send(
        &h.state,
        webhook("push", "application/json", push_payload("develop"), true),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(h.executor.calls().is_empty());
}

#[tokio::test]
async fn form_encoded_push_is_decoded() {
    let h = harness(&base_config(""), RecordingExecutor::default());
    let body: String = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("payload", &push_payload("main"))
        .finish();

    let (status, _) = send(
        &h.state,
        webhook("push", "application/x-www-form-urlencoded", body, true),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(h.executor.calls().len(), 1);
}

#[tokio::test]
async fn missing_signature_is_rejected() {
    let h = harness(&base_config(""), RecordingExecutor::default());

    let (status, body) = send(
        &h.state,
        webhook("push", "application/json", push_payload("main"), false),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.starts_with("Error in signature check"));
    assert!(h.executor.calls().is_empty());
}

#[tokio::test]
async fn tampered_body_is_rejected() {
    let h = harness(&base_config(""), RecordingExecutor::default());
    let signature = sign(push_payload("main").as_bytes());
    let request = Request::builder()
        .method("POST")
        .uri("/?github=1")
        .header("content-type", "application/json")
        .header("X-GitHub-Event", "push")
        .header("X-Hub-Signature-256", signature)
        .body(Body::from(push_payload("develop")))
        .unwrap();

    let (status, _) = send(&h.state, request).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(h.executor.calls().is_empty());
}

#[tokio::test]
async fn unsigned_requests_pass_when_checking_is_off() {
    let h = harness(&base_config("check_secret = false"), RecordingExecutor::default());

    let (status, _) = send(
        &h.state,
        webhook("push", "application/json", push_payload("main"), false),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(h.executor.calls().len(), 1);
}

#[tokio::test]
async fn unknown_event_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let config = base_config(&format!(
        "send_notifications = true\n\
         [notifications]\nproviders = [\"glip\", \"email\"]\n\
         glip_webhook = \"{}/glip\"\nrecipient = \"ops@site.test\"\n",
        server.uri()
    ));
    let h = harness(&config, RecordingExecutor::default());
    let body = json!({"action": "opened"}).to_string();

    let (status, text) = send(
        &h.state,
        webhook("issues", "application/json", body, true),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(text, r#"Event: issues Payload: \n{"action":"opened"}"#);
    assert!(h.executor.calls().is_empty());
    assert!(h.mailer.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn unsupported_content_type_is_rejected() {
    let h = harness(&base_config(""), RecordingExecutor::default());

    let (status, body) = send(
        &h.state,
        webhook("push", "text/plain", push_payload("main"), true),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.contains("text/plain"));
}

#[tokio::test]
async fn error_body_is_html_escaped() {
    let h = harness(&base_config(""), RecordingExecutor::default());

    let (status, body) = send(
        &h.state,
        webhook("push", "text/<x>", push_payload("main"), true),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        body,
        "Error in payload decoding: Unsupported content type: text/&lt;x&gt;"
    );
    assert!(h.executor.calls().is_empty());
}

#[tokio::test]
async fn ping_notifies_providers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/glip"))
        .and(body_string_contains("title=Github+Webhook+Endpoint"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let config = base_config(&format!(
        "[notifications]\nproviders = [\"glip\"]\nglip_webhook = \"{}/glip\"\n",
        server.uri()
    ));
    let h = harness(&config, RecordingExecutor::default());
    let body = json!({"zen": "Keep it logically awesome."}).to_string();

    let (status, _) = send(&h.state, webhook("ping", "application/json", body, true)).await;

    assert_eq!(status, StatusCode::OK);
    assert!(h.executor.calls().is_empty());
}

#[tokio::test]
async fn successful_push_sends_summary_mail() {
    let config = base_config(
        "send_notifications = true\nsite_url = \"https://site.test/\"\n\
         [notifications]\nproviders = [\"email\"]\nrecipient = \"ops@site.test\"\n\
         [mail]\nfrom = \"deploy@site.test\"\n",
    );
    let h = harness(&config, RecordingExecutor::default());

    let (status, _) = send(
        &h.state,
        webhook("push", "application/json", push_payload("main"), true),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let sent = h.mailer.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "ops@site.test");
    assert_eq!(sent[0].subject, "GitDeploy for https://site.test/");
    assert_eq!(sent[0].reply_to, "deploy@site.test");
    assert!(sent[0].html_body.contains("octocat"));
    assert!(sent[0].html_body.contains("Already up to date."));
}

#[tokio::test]
async fn summary_is_not_sent_when_notifications_are_off() {
    let config = base_config(
        "[notifications]\nproviders = [\"email\"]\nrecipient = \"ops@site.test\"\n",
    );
    let h = harness(&config, RecordingExecutor::default());

    send(
        &h.state,
        webhook("push", "application/json", push_payload("main"), true),
    )
    .await;

    assert_eq!(h.executor.calls().len(), 1);
    assert!(h.mailer.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn failed_deploy_is_reported_to_providers() {
    let config = base_config(
        "site_url = \"https://site.test/\"\n\
         [notifications]\nproviders = [\"email\"]\nrecipient = \"ops@site.test\"\n",
    );
    let h = harness(
        &config,
        RecordingExecutor {
            fail: true,
            ..Default::default()
        },
    );

    let (status, _) = send(
        &h.state,
        webhook("push", "application/json", push_payload("main"), true),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let sent = h.mailer.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].subject, "GitDeploy for your site");
    assert!(sent[0].html_body.contains("GitDeploy failed"));
    assert!(sent[0].html_body.contains("unrelated histories"));
}

#[tokio::test]
async fn requests_without_the_flag_reach_the_router() {
    let h = harness(&base_config(""), RecordingExecutor::default());

    let root = Request::builder().uri("/").body(Body::empty()).unwrap();
    let (status, body) = send(&h.state, root).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "GitDeploy is running");

    let unflagged = Request::builder()
        .method("POST")
        .uri("/hook?github=0")
        .header("content-type", "application/json")
        .header("X-GitHub-Event", "push")
        .body(Body::from(push_payload("main")))
        .unwrap();
    let (status, _) = send(&h.state, unflagged).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(h.executor.calls().is_empty());
}

#[tokio::test]
async fn status_reports_the_target_as_json() {
    let h = harness(&base_config(""), RecordingExecutor::default());

    let request = Request::builder()
        .uri("/?format=json")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&h.state, request).await;

    assert_eq!(status, StatusCode::OK);
    let value: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(value["target"]["repo"], "acme/site");
    assert_eq!(value["target"]["branch"], "main");
    assert_eq!(value["status"], "ok");
}

#[tokio::test]
async fn reload_swaps_the_configuration() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("deploy_config.toml");
    std::fs::write(&config_path, base_config("")).unwrap();

    let state = Arc::new(AppState::new(
        parse_config(&base_config("")).unwrap(),
        config_path.clone(),
        Arc::new(RecordingExecutor::default()),
        Notifier::new(reqwest::Client::new(), Arc::new(RecordingMailer::default())),
    ));

    std::fs::write(
        &config_path,
        "repo = \"acme/site\"\nbranch = \"production\"\n",
    )
    .unwrap();
    let request = Request::builder()
        .method("POST")
        .uri("/reload")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&state, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(state.config_snapshot().branch, "production");
}

#[tokio::test]
async fn broken_reload_keeps_the_old_configuration() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("deploy_config.toml");
    std::fs::write(&config_path, "repo = ").unwrap();

    let state = Arc::new(AppState::new(
        parse_config(&base_config("")).unwrap(),
        config_path,
        Arc::new(RecordingExecutor::default()),
        Notifier::new(reqwest::Client::new(), Arc::new(RecordingMailer::default())),
    ));

    let request = Request::builder()
        .method("POST")
        .uri("/reload")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&state, request).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(state.config_snapshot().branch, "main");
}
