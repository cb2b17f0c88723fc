use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Maximum size for run output before truncation (1MB)
pub const MAX_OUTPUT_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Success,
    Failed,
}

/// One execution of a deploy plan
#[derive(Debug, Clone, Serialize)]
pub struct DeployRun {
    pub id: String,
    pub repo: String,
    pub branch: String,
    pub command: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub output: Option<String>,
    pub output_truncated: bool,
    pub error: Option<String>,
}

impl DeployRun {
    pub fn start(repo: &str, branch: &str, command: String) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            repo: repo.to_string(),
            branch: branch.to_string(),
            command,
            status: RunStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            output: None,
            output_truncated: false,
            error: None,
        }
    }

    /// Mark run as successful with output (truncates if too large)
    pub fn mark_success(&mut self, mut output: String) {
        self.status = RunStatus::Success;
        self.completed_at = Some(Utc::now());

        if output.len() > MAX_OUTPUT_SIZE {
            let mut cut = MAX_OUTPUT_SIZE;
            while !output.is_char_boundary(cut) {
                cut -= 1;
            }
            output.truncate(cut);
            output.push_str("\n... (output truncated)");
            self.output_truncated = true;
        }

        self.output = Some(output);
    }

    pub fn mark_failed(&mut self, error: String) {
        self.status = RunStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error = Some(error);
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.completed_at
            .map(|done| (done - self.started_at).num_milliseconds())
    }
}
