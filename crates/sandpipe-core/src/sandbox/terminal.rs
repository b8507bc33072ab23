use std::sync::Arc;

use crate::execution::{CommandSpec, ProcessExecutor, ProcessSpawnRequest, spawn_validated};
use crate::models::error::cancelled_error;
use crate::models::CoreResult;
use crate::sandbox::{Sandbox, SandboxBuilder, SandboxCommand, SandboxRunFuture};
use crate::scope::Scope;

/// Fallback builder: accepts every token. The empty token resolves to the
/// configured terminal name.
pub struct TerminalSandboxBuilder {
    executor: Arc<dyn ProcessExecutor>,
    name: String,
}

impl TerminalSandboxBuilder {
    pub fn new(executor: Arc<dyn ProcessExecutor>, name: impl Into<String>) -> Self {
        Self {
            executor,
            name: name.into(),
        }
    }
}

impl SandboxBuilder for TerminalSandboxBuilder {
    fn kind(&self) -> &'static str {
        "terminal"
    }

    fn is(&self, _name: &str) -> bool {
        true
    }

    fn build(&self, name: &str) -> CoreResult<Arc<dyn Sandbox>> {
        let name = if name.is_empty() {
            self.name.as_str()
        } else {
            if name != self.name {
                tracing::debug!(sandbox = name, fallback = %self.name, "unclaimed sandbox token runs on the host");
            }
            name
        };

        Ok(Arc::new(TerminalSandbox {
            name: name.to_string(),
            executor: self.executor.clone(),
        }))
    }
}

/// Runs bodies with the configured host shell.
pub struct TerminalSandbox {
    name: String,
    executor: Arc<dyn ProcessExecutor>,
}

impl Sandbox for TerminalSandbox {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, scope: &Scope, command: SandboxCommand) -> SandboxRunFuture {
        let scope = scope.clone();
        let executor = self.executor.clone();

        Box::pin(async move {
            if scope.is_killed() {
                return Err(cancelled_error(Some(&command.task), "scope killed before run"));
            }

            let config = scope.config();
            let spec = CommandSpec::new(&config.shell)
                .arg(config.shell_flag.clone())
                .arg(command.command)
                .envs(&command.env);
            let request = ProcessSpawnRequest::configured(command.task, spec, config);
            let process = spawn_validated(executor.as_ref(), request)?;
            process.wait(Some(scope.clone())).await
        })
    }
}
