use std::sync::Arc;
use std::time::SystemTime;

use tokio::task::JoinHandle;

use crate::coordination::{SharedMutex, WaitManager};
use crate::dependency::DependencyProvider;
use crate::execution::{ProcessExitStatus, ProcessOutput};
use crate::models::error::cancelled_error;
use crate::models::CoreResult;
use crate::pipeline::Pipeline;
use crate::sandbox::{Sandbox, SandboxBuilder, SandboxCommand, SandboxRunFuture};
use crate::scope::Scope;
use crate::script::{Interpreter, render_errors, render_summary};
use crate::services;

/// Claims exactly the configured self token (`self` by default).
pub struct SelfSandboxBuilder {
    name: String,
}

impl SelfSandboxBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl SandboxBuilder for SelfSandboxBuilder {
    fn kind(&self) -> &'static str {
        "self"
    }

    fn is(&self, name: &str) -> bool {
        name == self.name
    }

    fn build(&self, name: &str) -> CoreResult<Arc<dyn Sandbox>> {
        Ok(Arc::new(SelfSandbox {
            name: name.to_string(),
        }))
    }
}

/// Runs a task body as a nested pipeline script.
///
/// The nested pipeline gets a root scope of its own: its failures kill only
/// the nested tree and reach the caller as exit status 1 with the errors on
/// stderr. Killing the calling scope kills the nested tree too. Barrier
/// names are private; locks go through [`SharedMutex::nested`], so resources
/// the calling task holds are not waited on again. Environment entries of
/// the command are not used.
pub struct SelfSandbox {
    name: String,
}

impl Sandbox for SelfSandbox {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, scope: &Scope, command: SandboxCommand) -> SandboxRunFuture {
        let scope = scope.clone();

        Box::pin(async move {
            if scope.is_killed() {
                return Err(cancelled_error(Some(&command.task), "scope killed before run"));
            }

            let started_at = SystemTime::now();
            let provider = nested_provider(&scope, &command.held)?;
            let nested = Scope::root(scope.config().clone(), provider);
            let follower = follow_cancellation(&scope, &nested);

            tracing::info!(task = %command.task, held = ?command.held, "starting nested pipeline");
            let mut stdout = Vec::new();
            let setup = run_nested(&nested, &command.command, &mut stdout).await;
            let closed = nested.close().await;
            follower.abort();
            setup?;

            if scope.is_killed() {
                return Err(cancelled_error(
                    Some(&command.task),
                    "nested pipeline cancelled with its scope",
                ));
            }

            let (status, stderr) = match closed {
                Ok(()) => (ProcessExitStatus::ExitCode(0), Vec::new()),
                Err(errors) => {
                    tracing::info!(task = %command.task, errors = errors.errors.len(), "nested pipeline failed");
                    (ProcessExitStatus::ExitCode(1), render_errors(&errors).into_bytes())
                }
            };

            Ok(ProcessOutput {
                status,
                stdout,
                stderr,
                started_at,
                finished_at: SystemTime::now(),
            })
        })
    }
}

/// Sub-provider with private barriers and a lock table that treats `held`
/// as already owned by the caller.
fn nested_provider(scope: &Scope, held: &[String]) -> CoreResult<Arc<DependencyProvider>> {
    let parent = scope.provider().clone();
    let enclosing = services::shared_mutex(&parent)?;
    let provider = Arc::new(DependencyProvider::with_parent(parent));
    provider.add_service(services::WAIT_MANAGER, |_| Ok(Arc::new(WaitManager::new())))?;

    let held = held.to_vec();
    provider.add_service(services::SHARED_MUTEX, move |_| {
        Ok(Arc::new(SharedMutex::nested(enclosing.clone(), held.clone())))
    })?;
    Ok(provider)
}

fn follow_cancellation(outer: &Scope, nested: &Scope) -> JoinHandle<()> {
    let outer = outer.clone();
    let nested = nested.clone();
    tokio::spawn(async move {
        outer.cancelled().await;
        tracing::debug!("calling scope killed, cancelling nested pipeline");
        nested.kill();
    })
}

async fn run_nested(nested: &Scope, script: &str, out: &mut Vec<u8>) -> CoreResult<()> {
    let interpreter = Interpreter::new(Pipeline::new(nested.clone())?);
    // Statement errors are already recorded on the nested scope.
    let _ = interpreter.run_script(script, out).await;
    let _ = interpreter.finish().await;
    out.extend_from_slice(render_summary(&interpreter.pipeline().summary()).as_bytes());
    Ok(())
}
