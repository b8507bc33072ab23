//! Concurrent task runner.
//!
//! Every submitted task runs as its own tokio task inside a child of the
//! pipeline scope and coordinates with its siblings only through the
//! [`WaitManager`] barriers and [`SharedMutex`] locks it declares.

pub mod log;
mod runner;
pub mod spec;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

pub use log::ExecutionLog;
pub use spec::{ConditionalHooks, TaskSpec, split_names};

use crate::coordination::{SharedMutex, WaitManager};
use crate::models::{
    CoreError, CoreErrorKind, CoreResult, LogRecord, ScopeErrors, SummaryRecord, TaskOutcome,
    TaskState,
};
use crate::sandbox::SandboxManager;
use crate::scope::Scope;
use crate::services;

/// Hook environment: the task name.
pub const TASK_ENV: &str = "SANDPIPE_TASK";
/// Hook environment: `succeeded` or `failed`.
pub const OUTCOME_ENV: &str = "SANDPIPE_TASK_OUTCOME";
/// Hook environment: the captured body error, when there is one.
pub const ERROR_ENV: &str = "SANDPIPE_TASK_ERROR";

#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<PipelineInner>,
}

pub(crate) struct PipelineInner {
    scope: Scope,
    sandboxes: Arc<SandboxManager>,
    waits: Arc<WaitManager>,
    mutex: Arc<SharedMutex>,
    tasks: Mutex<BTreeMap<String, TaskState>>,
    summary: Mutex<Vec<SummaryRecord>>,
    logs: ExecutionLog,
}

impl Pipeline {
    /// Resolves the coordination services through `scope`'s provider.
    pub fn new(scope: Scope) -> CoreResult<Self> {
        let provider = scope.provider().clone();
        Ok(Self {
            inner: Arc::new(PipelineInner {
                sandboxes: services::sandbox_manager(&provider)?,
                waits: services::wait_manager(&provider)?,
                mutex: services::shared_mutex(&provider)?,
                tasks: Mutex::new(BTreeMap::new()),
                summary: Mutex::new(Vec::new()),
                logs: ExecutionLog::new(scope.config().max_log_bytes),
                scope,
            }),
        })
    }

    pub fn scope(&self) -> &Scope {
        &self.inner.scope
    }

    pub async fn submit(&self, spec: TaskSpec) -> CoreResult<()> {
        let task_scope = self.inner.scope.child();
        self.submit_in(task_scope, spec).await
    }

    /// Starts `spec` inside `task_scope`, which must be a fresh child of the
    /// pipeline scope. The task scope is closed when the task is done, or
    /// right away when the task is rejected.
    pub async fn submit_in(&self, task_scope: Scope, spec: TaskSpec) -> CoreResult<()> {
        if let Err(error) = spec.validate().and_then(|()| self.inner.accept(&spec)) {
            let _ = task_scope.close().await;
            return Err(error);
        }

        tracing::info!(
            task = %spec.name,
            sandbox = %spec.sandbox,
            conditional = spec.is_conditional(),
            "task submitted"
        );

        let inner = self.inner.clone();
        tokio::spawn(async move {
            let name = spec.name.clone();
            let worker = tokio::spawn(runner::drive_task(inner.clone(), task_scope.clone(), spec));
            if let Err(join_error) = worker.await {
                tracing::error!(task = %name, error = %join_error, "task worker did not complete");
                task_scope.append_error(CoreError::for_task(
                    &name,
                    CoreErrorKind::Internal,
                    format!("task worker failed: {join_error}"),
                ));
                inner.abandon(&name);
            }
            if let Err(errors) = task_scope.close().await {
                tracing::debug!(task = %name, errors = errors.errors.len(), "task scope closed with errors");
            }
        });
        Ok(())
    }

    /// Blocks until every submitted task is done. Barriers that were waited
    /// on but never registered are resolved as unknown first.
    pub async fn wait(&self) -> Result<(), ScopeErrors> {
        self.inner.waits.reject_unregistered();
        self.inner.scope.wait().await
    }

    /// Waits for running tasks, then forgets their records, barriers and
    /// idle resource locks.
    pub async fn clear(&self) -> Result<(), ScopeErrors> {
        let result = self.wait().await;
        self.inner.lock_tasks().clear();
        self.inner.lock_summary().clear();
        self.inner.logs.clear();
        self.inner.waits.clear();
        self.inner.mutex.prune();
        result
    }

    /// One record per finished task, sorted by task name.
    pub fn summary(&self) -> Vec<SummaryRecord> {
        let mut records = self.inner.lock_summary().clone();
        records.sort_by(|left, right| left.task.cmp(&right.task));
        records
    }

    pub fn logs(&self) -> Vec<LogRecord> {
        self.inner.logs.records()
    }

    pub fn task_logs(&self, task: &str) -> Vec<LogRecord> {
        self.inner.logs.for_task(task)
    }

    pub fn state(&self, task: &str) -> Option<TaskState> {
        self.inner.lock_tasks().get(task).copied()
    }

    pub fn task_names(&self) -> Vec<String> {
        self.inner.lock_tasks().keys().cloned().collect()
    }
}

impl PipelineInner {
    fn accept(&self, spec: &TaskSpec) -> CoreResult<()> {
        let mut tasks = self.lock_tasks();
        if tasks.contains_key(&spec.name) || !self.waits.register(&spec.name) {
            return Err(CoreError::for_task(
                &spec.name,
                CoreErrorKind::InvalidInput,
                format!("task '{}' already exists in this pipeline", spec.name),
            ));
        }
        for name in &spec.wait {
            self.waits.reference(name);
        }
        tasks.insert(spec.name.clone(), TaskState::Pending);
        Ok(())
    }

    /// Moves `task` to `next` if the lifecycle allows it.
    fn transition(&self, task: &str, next: TaskState) -> bool {
        let mut tasks = self.lock_tasks();
        match tasks.get_mut(task) {
            Some(state) if state.can_transition_to(next) => {
                tracing::debug!(task, from = ?*state, to = ?next, "task state changed");
                *state = next;
                true
            }
            Some(state) => {
                tracing::warn!(task, from = ?*state, to = ?next, "rejected task state change");
                false
            }
            None => false,
        }
    }

    fn record(&self, record: SummaryRecord) {
        self.lock_summary().push(record);
    }

    /// Settles a task whose worker died without finishing its lifecycle.
    fn abandon(&self, task: &str) {
        self.waits.signal(task);
        if let Some(state) = self.lock_tasks().get_mut(task) {
            *state = TaskState::Done;
        }
        let mut summary = self.lock_summary();
        if !summary.iter().any(|record| record.task == task) {
            summary.push(SummaryRecord {
                task: task.to_string(),
                sandbox: String::new(),
                outcome: TaskOutcome::Failed,
                exit_code: None,
                error: Some("task worker failed".to_string()),
                started_at: None,
                finished_at: None,
            });
        }
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, TaskState>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_summary(&self) -> std::sync::MutexGuard<'_, Vec<SummaryRecord>> {
        self.summary.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
