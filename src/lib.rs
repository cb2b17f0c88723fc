pub mod api;
pub mod config;
pub mod error;
pub mod executor;
pub mod lock;
pub mod logging;
pub mod markup;
pub mod notify;
pub mod payload;
pub mod planner;
pub mod run;
pub mod signature;

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Instant;

pub use config::{DeployConfig, load_config, reload_config};
use executor::CommandExecutor;
use lock::TargetLocks;
use notify::Notifier;

pub struct AppState {
    pub config: RwLock<DeployConfig>,
    pub config_path: PathBuf,
    pub executor: Arc<dyn CommandExecutor>,
    pub notifier: Notifier,
    pub target_locks: TargetLocks,
    pub start_time: Instant,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        config: DeployConfig,
        config_path: PathBuf,
        executor: Arc<dyn CommandExecutor>,
        notifier: Notifier,
    ) -> Self {
        Self {
            config: RwLock::new(config),
            config_path,
            executor,
            notifier,
            target_locks: TargetLocks::new(),
            start_time: Instant::now(),
            started_at: Utc::now(),
        }
    }

    /// Copy of the current configuration, read-only for one request
    pub fn config_snapshot(&self) -> DeployConfig {
        self.config
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

pub type SharedState = Arc<AppState>;
