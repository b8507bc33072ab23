use std::collections::BTreeMap;
use std::sync::Arc;

use crate::coordination::ResourceGuard;
use crate::execution::{ProcessExitStatus, ProcessOutput};
use crate::models::{
    CoreError, CoreErrorKind, CoreResult, RunPhase, SummaryRecord, TaskOutcome, TaskState,
};
use crate::pipeline::{ERROR_ENV, OUTCOME_ENV, PipelineInner, TASK_ENV, TaskSpec};
use crate::sandbox::{Sandbox, SandboxCommand};
use crate::scope::Scope;

/// Drives one task from `Pending` to `Done`.
pub(crate) async fn drive_task(pipeline: Arc<PipelineInner>, scope: Scope, spec: TaskSpec) {
    let mut run = TaskRun::new(pipeline, scope, spec);
    match run.acquire().await {
        Ok(guard) => run.execute(guard).await,
        Err(error) => {
            run.enter(TaskState::Failed);
            run.fail(error, false);
            run.finish(None);
        }
    }
}

struct TaskRun {
    pipeline: Arc<PipelineInner>,
    scope: Scope,
    spec: TaskSpec,
    state: TaskState,
    record: SummaryRecord,
    captured: Option<CoreError>,
}

impl TaskRun {
    fn new(pipeline: Arc<PipelineInner>, scope: Scope, spec: TaskSpec) -> Self {
        let record = SummaryRecord {
            task: spec.name.clone(),
            sandbox: spec.sandbox.clone(),
            outcome: TaskOutcome::Succeeded,
            exit_code: None,
            error: None,
            started_at: None,
            finished_at: None,
        };
        Self {
            pipeline,
            scope,
            spec,
            state: TaskState::Pending,
            record,
            captured: None,
        }
    }

    fn name(&self) -> &str {
        &self.spec.name
    }

    async fn acquire(&mut self) -> CoreResult<ResourceGuard> {
        self.enter(TaskState::Waiting);
        self.pipeline
            .waits
            .wait_for(&self.scope, &self.spec.wait)
            .await
            .map_err(|error| error.attributed_to(&self.spec.name))?;

        self.enter(TaskState::Locking);
        self.pipeline
            .mutex
            .lock_all(&self.scope, &self.spec.lock)
            .await
            .map_err(|error| error.attributed_to(&self.spec.name))
    }

    async fn execute(&mut self, guard: ResourceGuard) {
        self.enter(TaskState::Running);

        let sandbox = match self.pipeline.sandboxes.build(&self.spec.sandbox) {
            Ok(sandbox) => sandbox,
            Err(error) => {
                self.enter(TaskState::Failed);
                self.fail(error.attributed_to(&self.spec.name), false);
                self.finish(Some(guard));
                return;
            }
        };

        match self.run_body(sandbox.as_ref()).await {
            None => self.enter(TaskState::Succeeded),
            Some(error) => {
                self.enter(TaskState::Failed);
                let conditional = self.spec.is_conditional();
                self.fail(error, conditional);
            }
        }

        if let Some(hooks) = self.spec.hooks.clone()
            && self.record.outcome != TaskOutcome::Cancelled
        {
            let follow_up = match self.record.outcome {
                TaskOutcome::Succeeded => hooks.on_success.map(|body| (RunPhase::OnSuccess, body)),
                _ => hooks.on_failure.map(|body| (RunPhase::OnFailure, body)),
            };
            if let Some((phase, body)) = follow_up {
                self.run_hook(sandbox.as_ref(), phase, &body).await;
            }

            self.enter(TaskState::Finalizing);
            if let Some(body) = hooks.finally {
                self.run_hook(sandbox.as_ref(), RunPhase::Finally, &body).await;
            }
        }

        self.finish(Some(guard));
    }

    /// Runs the body; `Some` carries the reason it failed.
    async fn run_body(&mut self, sandbox: &dyn Sandbox) -> Option<CoreError> {
        let body = self.spec.body.clone();
        let env = BTreeMap::from([(TASK_ENV.to_string(), self.spec.name.clone())]);
        tracing::info!(task = %self.spec.name, sandbox = sandbox.name(), "running task body");

        match self.run_phase(sandbox, RunPhase::Body, &body, env).await {
            Ok(output) => {
                self.record.started_at = Some(output.started_at);
                self.record.finished_at = Some(output.finished_at);
                self.record.exit_code = output.status.code();
                (!output.status.success()).then(|| {
                    CoreError::for_task(
                        &self.spec.name,
                        CoreErrorKind::ProcessFailure,
                        format!("body {}", describe_exit(output.status)),
                    )
                })
            }
            Err(error) => Some(error.attributed_to(&self.spec.name)),
        }
    }

    /// Hook failures are never captured.
    async fn run_hook(&self, sandbox: &dyn Sandbox, phase: RunPhase, body: &str) {
        let mut env = BTreeMap::from([
            (TASK_ENV.to_string(), self.spec.name.clone()),
            (OUTCOME_ENV.to_string(), self.record.outcome.as_str().to_string()),
        ]);
        if let Some(error) = &self.captured {
            env.insert(ERROR_ENV.to_string(), error.message.clone());
        }

        match self.run_phase(sandbox, phase, body, env).await {
            Ok(output) if output.status.success() => {}
            Ok(output) => self.scope.append_error(CoreError::for_task(
                &self.spec.name,
                CoreErrorKind::ProcessFailure,
                format!("{} hook {}", phase.as_str(), describe_exit(output.status)),
            )),
            Err(error) if error.is_cancelled() => {
                tracing::info!(task = %self.spec.name, phase = phase.as_str(), "hook cancelled");
            }
            Err(error) => self.scope.append_error(error.attributed_to(&self.spec.name)),
        }
    }

    async fn run_phase(
        &self,
        sandbox: &dyn Sandbox,
        phase: RunPhase,
        body: &str,
        env: BTreeMap<String, String>,
    ) -> CoreResult<ProcessOutput> {
        let command = SandboxCommand {
            task: self.spec.name.clone(),
            command: body.to_string(),
            env,
            held: self.spec.lock.clone(),
        };
        let output = sandbox.run(&self.scope, command).await?;
        self.pipeline.logs.record(&self.spec.name, phase, &output);
        Ok(output)
    }

    /// Records a failure. Cancellation is not a failure and is never
    /// appended; a captured failure is kept for the hooks instead.
    fn fail(&mut self, error: CoreError, capture: bool) {
        if error.is_cancelled() {
            tracing::info!(task = %self.spec.name, "task cancelled");
            self.record.outcome = TaskOutcome::Cancelled;
            return;
        }

        self.record.outcome = TaskOutcome::Failed;
        self.record.error = Some(error.message.clone());
        if capture {
            tracing::info!(task = %self.spec.name, message = %error.message, "task failure captured");
            self.captured = Some(error);
        } else {
            tracing::warn!(task = %self.spec.name, kind = ?error.kind, message = %error.message, "task failed");
            self.scope.append_error(error);
        }
    }

    /// Releases locks, signals the task's barrier and publishes its record.
    fn finish(&mut self, guard: Option<ResourceGuard>) {
        if self.state != TaskState::Finalizing {
            self.enter(TaskState::Finalizing);
        }
        drop(guard);
        self.pipeline.waits.signal(&self.spec.name);
        self.pipeline.record(self.record.clone());
        self.enter(TaskState::Done);
        tracing::info!(task = %self.spec.name, outcome = self.record.outcome.as_str(), "task done");
    }

    fn enter(&mut self, next: TaskState) {
        if self.pipeline.transition(self.name(), next) {
            self.state = next;
        }
    }
}

fn describe_exit(status: ProcessExitStatus) -> String {
    match status {
        ProcessExitStatus::ExitCode(code) => format!("exited with status {code}"),
        ProcessExitStatus::Terminated => "was terminated by a signal".to_string(),
    }
}
