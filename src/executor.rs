//! Runs deploy plans as a local shell process

use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Command;
use tracing::{error, info};

use crate::error::{DeployError, Result};
use crate::planner::DeployPlan;

const SHELL: &str = "sh";

/// Combined stdout/stderr of a finished command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub output: String,
    pub exit_code: Option<i32>,
}

/// Executes a deploy plan and captures its combined output
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, plan: &DeployPlan) -> Result<CommandOutput>;
}

/// Runs the rendered command line through `sh -c`
pub struct ShellExecutor {
    timeout: Duration,
}

impl ShellExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl CommandExecutor for ShellExecutor {
    async fn execute(&self, plan: &DeployPlan) -> Result<CommandOutput> {
        let command_line = plan.command_line();

        // The directory was checked when the plan was built; check again right
        // before running so a vanished checkout fails loudly.
        if let Some(dir) = plan.working_dir() {
            if !dir.is_dir() {
                let msg = format!("working directory '{}' no longer exists", dir.display());
                error!("{}", msg);
                return Err(DeployError::CommandExecutionFailure {
                    command: command_line,
                    status: "not started".to_string(),
                    output: msg,
                });
            }
        }

        info!("Running: {}", command_line);
        let child = Command::new(SHELL)
            .arg("-c")
            .arg(&command_line)
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                error!("'{}' failed to start: {}", command_line, e);
                return Err(DeployError::CommandExecutionFailure {
                    command: command_line,
                    status: "not started".to_string(),
                    output: e.to_string(),
                });
            }
            Err(_) => {
                error!("'{}' timed out after {:?}", command_line, self.timeout);
                return Err(DeployError::CommandExecutionFailure {
                    command: command_line,
                    status: format!("timed out after {}s", self.timeout.as_secs()),
                    output: String::new(),
                });
            }
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if output.status.success() {
            info!("Command output:\n{}", combined);
            Ok(CommandOutput {
                output: combined,
                exit_code: output.status.code(),
            })
        } else {
            let status = match output.status.code() {
                Some(code) => format!("exit code {}", code),
                None => "terminated by signal".to_string(),
            };
            error!("'{}' failed with {}:\n{}", command_line, status, combined);
            Err(DeployError::CommandExecutionFailure {
                command: command_line,
                status,
                output: combined,
            })
        }
    }
}
