use serde::{Deserialize, Serialize};
use std::time::SystemTime;

use crate::models::{RunPhase, TaskOutcome};

/// One line of the execution summary.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct SummaryRecord {
    pub task: String,
    pub sandbox: String,
    pub outcome: TaskOutcome,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
    /// Start of the body's sandbox execution window.
    pub started_at: Option<SystemTime>,
    /// End of the body's sandbox execution window.
    pub finished_at: Option<SystemTime>,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub task: String,
    pub phase: RunPhase,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
}
