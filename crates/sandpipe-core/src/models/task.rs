use serde::{Deserialize, Serialize};

/// Per-task lifecycle. `Succeeded`/`Failed` are reached from `Running`;
/// a task aborted while waiting or locking goes straight to `Failed`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Waiting,
    Locking,
    Running,
    Succeeded,
    Failed,
    Finalizing,
    Done,
}

impl TaskState {
    pub fn can_transition_to(self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Pending, Waiting)
                | (Pending, Failed)
                | (Waiting, Locking)
                | (Waiting, Failed)
                | (Locking, Running)
                | (Locking, Failed)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Succeeded, Finalizing)
                | (Failed, Finalizing)
                | (Finalizing, Done)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == TaskState::Done
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    Succeeded,
    Failed,
    Cancelled,
}

impl TaskOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskOutcome::Succeeded => "succeeded",
            TaskOutcome::Failed => "failed",
            TaskOutcome::Cancelled => "cancelled",
        }
    }
}

/// Which body of a task produced a log entry.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Body,
    OnSuccess,
    OnFailure,
    Finally,
}

impl RunPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            RunPhase::Body => "body",
            RunPhase::OnSuccess => "success",
            RunPhase::OnFailure => "fail",
            RunPhase::Finally => "finally",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::TaskState;

    #[test]
    fn waiting_task_can_fail_without_locking() {
        assert!(TaskState::Waiting.can_transition_to(TaskState::Failed));
        assert!(!TaskState::Waiting.can_transition_to(TaskState::Running));
    }

    #[test]
    fn done_is_the_only_terminal_state() {
        assert!(TaskState::Done.is_terminal());
        assert!(!TaskState::Finalizing.is_terminal());
        assert!(!TaskState::Done.can_transition_to(TaskState::Pending));
    }
}
