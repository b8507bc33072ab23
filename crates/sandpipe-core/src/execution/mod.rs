//! Host process execution for sandboxes.
//!
//! Every spawned body leads its own process group. Waiting on it is tied to
//! a scope: when the scope is killed first, the group is stopped and the
//! wait reports a `Cancelled` error instead of an exit status.

pub mod output;
pub mod tokio_process;

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::{Duration, SystemTime};

pub use tokio_process::TokioProcessExecutor;

use crate::config::EngineConfig;
use crate::models::{CoreError, CoreErrorKind, CoreResult};
use crate::scope::Scope;

pub type ProcessWaitFuture = Pin<Box<dyn Future<Output = CoreResult<ProcessOutput>> + Send>>;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn envs(mut self, env: &BTreeMap<String, String>) -> Self {
        self.env.extend(env.clone());
        self
    }

    fn validate(&self, task: &str) -> CoreResult<()> {
        if self.program.as_os_str().is_empty() {
            return Err(invalid_input(task, "program must not be empty"));
        }
        if self.args.iter().any(|arg| arg.contains('\0')) {
            return Err(invalid_input(task, "arguments must not contain NUL bytes"));
        }
        if self
            .env
            .iter()
            .any(|(key, value)| key.is_empty() || key.contains(['\0', '=']) || value.contains('\0'))
        {
            return Err(invalid_input(
                task,
                "environment names must be non-empty without '=' or NUL, values without NUL",
            ));
        }
        Ok(())
    }
}

/// A command attributed to a task, with the capture and shutdown limits
/// taken from the engine configuration.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProcessSpawnRequest {
    pub task: String,
    pub command: CommandSpec,
    /// Each captured stream keeps only its last `output_limit` bytes.
    pub output_limit: usize,
    /// Time between SIGTERM and SIGKILL when the owning scope is killed.
    pub grace: Duration,
}

impl ProcessSpawnRequest {
    pub fn new(task: impl Into<String>, command: CommandSpec) -> Self {
        Self::configured(task, command, &EngineConfig::default())
    }

    pub fn configured(task: impl Into<String>, command: CommandSpec, config: &EngineConfig) -> Self {
        Self {
            task: task.into(),
            command,
            output_limit: config.max_log_bytes,
            grace: config.termination_grace(),
        }
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.output_limit == 0 {
            return Err(invalid_input(&self.task, "output limit must be greater than zero"));
        }
        self.command.validate(&self.task)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProcessTerminationMode {
    /// SIGTERM to the process group.
    Graceful,
    /// SIGKILL to the process group.
    Immediate,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProcessExitStatus {
    ExitCode(i32),
    Terminated,
}

impl ProcessExitStatus {
    pub fn success(self) -> bool {
        self == ProcessExitStatus::ExitCode(0)
    }

    pub fn code(self) -> Option<i32> {
        match self {
            ProcessExitStatus::ExitCode(code) => Some(code),
            ProcessExitStatus::Terminated => None,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProcessOutput {
    pub status: ProcessExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub started_at: SystemTime,
    pub finished_at: SystemTime,
}

pub trait RunningProcess: Send {
    fn pid(&self) -> Option<u32>;

    fn terminate(&self, mode: ProcessTerminationMode) -> CoreResult<()>;

    /// Waits for the process to exit. If `scope` is killed first, the group
    /// gets SIGTERM, then SIGKILL once the request's grace has elapsed, and
    /// the wait fails with `Cancelled`. `None` waits unconditionally.
    fn wait(self: Box<Self>, scope: Option<Scope>) -> ProcessWaitFuture;
}

pub trait ProcessExecutor: Send + Sync {
    fn spawn(&self, request: ProcessSpawnRequest) -> CoreResult<Box<dyn RunningProcess>>;
}

pub fn spawn_validated(
    executor: &dyn ProcessExecutor,
    request: ProcessSpawnRequest,
) -> CoreResult<Box<dyn RunningProcess>> {
    request.validate()?;
    executor.spawn(request)
}

fn invalid_input(task: &str, message: &str) -> CoreError {
    CoreError::for_task(task, CoreErrorKind::InvalidInput, message)
}
