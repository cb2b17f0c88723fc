//! Builds the shell command sequence for a matching push event

use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::config::DeployConfig;
use crate::payload::PushEvent;

/// One step of a deploy plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanStep {
    ChangeDir(PathBuf),
    HardReset { git: String },
    Pull {
        git: String,
        remote: String,
        branch: String,
    },
}

impl fmt::Display for PlanStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanStep::ChangeDir(path) => {
                write!(f, "cd {}", shell_quote(&path.to_string_lossy()))
            }
            PlanStep::HardReset { git } => write!(f, "{} reset --hard HEAD", shell_quote(git)),
            PlanStep::Pull { git, remote, branch } => write!(
                f,
                "{} pull {} {}",
                shell_quote(git),
                shell_quote(remote),
                shell_quote(branch)
            ),
        }
    }
}

/// Ordered, unexecuted deploy commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployPlan {
    pub steps: Vec<PlanStep>,
    pub repo: String,
    pub branch: String,
}

impl DeployPlan {
    /// The full command line, with stderr folded into stdout.
    pub fn command_line(&self) -> String {
        let chained = self
            .steps
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" && ");
        format!("{} 2>&1", chained)
    }

    /// Directory the plan changes into, if any
    pub fn working_dir(&self) -> Option<&Path> {
        self.steps.iter().find_map(|step| match step {
            PlanStep::ChangeDir(path) => Some(path.as_path()),
            _ => None,
        })
    }

    /// Key serializing concurrent runs against the same checkout
    pub fn lock_key(&self) -> String {
        match self.working_dir() {
            Some(dir) => dir.to_string_lossy().into_owned(),
            None => self.repo.clone(),
        }
    }
}

/// Matches the event against the configured repository and branch.
/// Returns None if there's no match; that is not an error.
pub fn plan(event: &PushEvent, config: &DeployConfig) -> Option<DeployPlan> {
    let branch = event.branch();
    if event.repository.url != config.repository_url() || branch != config.branch {
        debug!(
            "Push to '{}' branch '{}' does not match '{}' branch '{}'",
            event.repository.url,
            branch,
            config.repository_url(),
            config.branch
        );
        return None;
    }

    let mut steps = Vec::with_capacity(3);

    if config.cd {
        let path = PathBuf::from(&config.cd_path);
        if path.is_dir() {
            steps.push(PlanStep::ChangeDir(path));
        } else {
            warn!("cd_path '{}' is not a directory, skipping cd", config.cd_path);
        }
    }

    if config.git_reset {
        steps.push(PlanStep::HardReset {
            git: config.git.clone(),
        });
    }

    steps.push(PlanStep::Pull {
        git: config.git.clone(),
        remote: config.remote.clone(),
        branch: config.branch.clone(),
    });

    Some(DeployPlan {
        steps,
        repo: config.repo.clone(),
        branch: config.branch.clone(),
    })
}

/// Single-quotes `arg` unless it is made only of shell-safe characters.
fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-+:@%,=".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}
