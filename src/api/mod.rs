//! HTTP surface: health, config reload and the GitHub webhook gate

pub mod handlers;
pub mod webhook;

use axum::{Router, middleware, routing};

use crate::SharedState;

pub use handlers::{not_found, reload_config_endpoint, root};
pub use webhook::{github_gate, handle_github_event};

/// Builds the application router.
///
/// Every request passes through [`github_gate`] first, so `?github=1` is
/// honoured on any path and method.
pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", routing::get(root))
        .route("/reload", routing::post(reload_config_endpoint))
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(state.clone(), github_gate))
        .with_state(state)
}
