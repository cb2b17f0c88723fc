use simple_git_deploy::executor::ShellExecutor;
use simple_git_deploy::logging::{FileLogger, setup_logging};
use simple_git_deploy::notify::Notifier;
use simple_git_deploy::notify::mail::SendmailTransport;
use simple_git_deploy::{AppState, api, load_config};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:8888";
const DEFAULT_CONFIG_PATH: &str = "deploy_config.toml";
const HTTP_CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

fn fail(context: &str, err: impl std::fmt::Display) -> ! {
    eprintln!("{}: {}", context, err);
    std::process::exit(1);
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    let bind_address =
        std::env::var("BIND_ADDRESS").unwrap_or_else(|_| DEFAULT_BIND_ADDRESS.to_string());
    let config_path = PathBuf::from(
        std::env::var("DEPLOY_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string()),
    );
    let file_logger = std::env::var("LOG_DIR")
        .ok()
        .map(|dir| FileLogger::new(PathBuf::from(dir)));

    let _log_guard = match setup_logging(file_logger.as_ref()) {
        Ok(guard) => guard,
        Err(e) => fail("Logging error", e),
    };

    let config = match load_config(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => fail("Configuration error", e),
    };

    let client = match reqwest::Client::builder()
        .timeout(HTTP_CLIENT_TIMEOUT)
        .build()
    {
        Ok(client) => client,
        Err(e) => fail("HTTP client error", e),
    };
    let mailer = Arc::new(SendmailTransport::new(config.mail.sendmail.clone()));
    let executor = Arc::new(ShellExecutor::new(config.command_timeout()));

    info!(
        "Deploying '{}' branch '{}' on push",
        config.repo, config.branch
    );
    let state = Arc::new(AppState::new(
        config,
        config_path.clone(),
        executor,
        Notifier::new(client, mailer),
    ));
    let app = api::router(state);

    info!("Listening on {}", bind_address);
    info!("Using config at {:?}", config_path);
    let listener = match tokio::net::TcpListener::bind(&bind_address).await {
        Ok(listener) => listener,
        Err(e) => fail(&format!("Failed to bind {}", bind_address), e),
    };
    if let Err(e) = axum::serve(listener, app).await {
        fail("Server error", e);
    }
}
